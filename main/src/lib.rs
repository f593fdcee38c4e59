#![allow(clippy::missing_docs_in_private_items)]

use std::sync::Arc;

use api_router::{api_routes, api_state::ApiState};
use async_openai::{config::OpenAIConfig, Client};
use axum::Router;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, stores::StoreHandles},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use index_manager::{IndexManager, IndexService};
use retrieval_pipeline::OpenAiModel;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

pub async fn connect_database(config: &AppConfig) -> Result<Arc<SurrealDbClient>, AppError> {
    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await
    .map_err(|err| AppError::StoreUnavailable(format!("{}: {err}", config.surrealdb_address)))?;

    // Ensure db is initialized
    db.ensure_initialized().await?;

    Ok(Arc::new(db))
}

/// Builds the index manager hosted by this process, talking to OpenAI for
/// answers and to the configured embedding backend for vectors.
pub async fn build_index_manager(config: &AppConfig) -> Result<Arc<IndexManager>, AppError> {
    config.validate()?;

    let db = connect_database(config).await?;
    let openai_client = Arc::new(Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider =
        Arc::new(EmbeddingProvider::from_config(config, Some(Arc::clone(&openai_client))).await?);
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let model = OpenAiModel::from_config(openai_client, config);
    let manager = IndexManager::from_config(
        config,
        StoreHandles::surreal(db),
        embedding_provider,
        Arc::new(model),
    )?;

    Ok(Arc::new(manager))
}

/// Startup housekeeping for an index-hosting process: purge insertions that
/// never committed, then rebuild the document listing from the content store.
pub async fn prepare_index(manager: &IndexManager) -> Result<(), AppError> {
    let report = manager.reconcile().await?;
    if !report.abandoned.is_empty() {
        warn!(
            abandoned = report.abandoned.len(),
            "Purged partial insertions left by an earlier run"
        );
    }

    let documents = manager.rebuild_registry().await?;
    info!(documents, "Document registry rebuilt");

    Ok(())
}

pub fn http_app(index: Arc<dyn IndexService>, config: &AppConfig) -> Router {
    let api_state = ApiState::new(index, config);

    api_routes(&api_state)
        .with_state(api_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve_http(app: Router, port: u16) -> Result<(), AppError> {
    info!("Starting server listening on 0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
