use std::sync::Arc;

use common::utils::config::get_config;
use docquery::{build_index_manager, init_tracing, prepare_index};
use rpc_gateway::GatewayServer;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Get config
    let config = get_config()?;
    config.validate_gateway()?;

    let manager = build_index_manager(&config).await?;
    prepare_index(&manager).await?;

    let listener = TcpListener::bind(&config.gateway_address).await?;
    let server = Arc::new(GatewayServer::new(manager, config.gateway_secret.clone()));

    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down index server"),
    }

    Ok(())
}
