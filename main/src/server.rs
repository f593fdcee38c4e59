use std::sync::Arc;

use common::utils::config::get_config;
use docquery::{http_app, init_tracing, serve_http};
use rpc_gateway::{GatewayClient, GatewayClientConfig};
use tracing::error;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Get config
    let config = get_config()?;
    config.validate_gateway()?;

    // Without the index server there is nothing to serve
    let client = match GatewayClient::connect(&GatewayClientConfig::from_config(&config)).await {
        Ok(client) => client,
        Err(err) => {
            error!(error = %err, "Could not reach the index server");
            return Err(err.into());
        }
    };

    let app = http_app(Arc::new(client), &config);
    serve_http(app, config.http_port).await?;

    Ok(())
}
