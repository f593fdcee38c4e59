#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
    Router,
};
use routes::{
    documents::list_documents,
    liveness::live,
    query::{query, stream},
    readiness::ready,
    upload::upload_document,
};
use tower_http::cors::CorsLayer;

pub mod api_state;
pub mod error;
mod routes;

/// Router for the document query API
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes
    let probes = Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready));

    let documents = Router::new()
        .route("/query", get(query))
        .route("/stream", get(stream))
        .route("/documents", get(list_documents))
        .route("/getDocuments", get(list_documents))
        .route(
            "/upload",
            post(upload_document).layer(DefaultBodyLimit::max(
                app_state.config.upload_max_bytes,
            )),
        );

    probes.merge(documents).layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests;
