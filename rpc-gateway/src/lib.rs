#![allow(clippy::missing_docs_in_private_items)]

pub mod auth;
pub mod client;
pub mod protocol;
pub mod server;

pub use client::{GatewayClient, GatewayClientConfig};
pub use protocol::{ProxyId, ProxyValue, Request, Response, StreamId};
pub use server::GatewayServer;
