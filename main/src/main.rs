use common::utils::config::get_config;
use docquery::{build_index_manager, http_app, init_tracing, prepare_index, serve_http};
use index_manager::InProcessIndex;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Get config
    let config = get_config()?;

    // Index and HTTP surface share this process
    let manager = build_index_manager(&config).await?;
    prepare_index(&manager).await?;

    let app = http_app(Arc::new(InProcessIndex::new(manager)), &config);
    serve_http(app, config.http_port).await?;

    Ok(())
}
