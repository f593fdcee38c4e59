pub mod documents;
pub mod liveness;
pub mod query;
pub mod readiness;
pub mod upload;
