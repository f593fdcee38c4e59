pub mod db;
pub mod stores;
pub mod types;
