use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use common::{
    storage::{db::SurrealDbClient, stores::StoreHandles},
    utils::{
        config::AppConfig,
        embedding::{EmbeddingBackend, EmbeddingProvider},
    },
};
use index_manager::{IndexManager, InProcessIndex};
use retrieval_pipeline::echo::EchoModel;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use crate::{api_routes, api_state::ApiState};

const BOUNDARY: &str = "docquery-test-boundary";

async fn test_app() -> (Router, tempfile::TempDir) {
    let upload_dir = tempfile::tempdir().expect("upload dir");
    let config = AppConfig {
        embedding_backend: EmbeddingBackend::Hashed,
        embedding_dimensions: 64,
        chunk_min_chars: 20,
        chunk_max_chars: 200,
        upload_dir: upload_dir.path().to_string_lossy().into_owned(),
        ..AppConfig::default()
    };
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("Failed to start in-memory surrealdb");
    db.ensure_initialized().await.expect("schema");
    let provider = EmbeddingProvider::from_config(&config, None)
        .await
        .expect("embedding provider");
    let manager = IndexManager::from_config(
        &config,
        StoreHandles::surreal(Arc::new(db)),
        Arc::new(provider),
        Arc::new(EchoModel::new()),
    )
    .expect("manager");

    let state = ApiState::new(Arc::new(InProcessIndex::new(Arc::new(manager))), &config);
    let app = api_routes(&state).with_state(state);
    (app, upload_dir)
}

fn multipart_upload(file_name: &str, text: &str, doc_id: Option<&str>) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n{text}\r\n"
    );
    if let Some(doc_id) = doc_id {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"doc_id\"\r\n\r\n{doc_id}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("json body")
}

#[tokio::test]
async fn test_upload_then_query() {
    let (app, upload_dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(multipart_upload("sky.txt", "The sky is blue.", Some("a")))
        .await
        .expect("upload response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["uuid"], "a");

    // The staged copy is gone once the upload returns
    let leftovers = std::fs::read_dir(upload_dir.path()).expect("read dir").count();
    assert_eq!(leftovers, 0);

    let response = app
        .clone()
        .oneshot(get("/query?text=What%20color%20is%20the%20sky%3F&uuid=a"))
        .await
        .expect("query response");
    assert_eq!(response.status(), StatusCode::OK);
    let answer = body_json(response).await;
    assert!(answer["text"].as_str().is_some_and(|text| text.contains("blue")));

    let response = app
        .oneshot(get("/getDocuments"))
        .await
        .expect("documents response");
    assert_eq!(response.status(), StatusCode::OK);
    let documents = body_json(response).await;
    assert_eq!(documents[0]["id"], "a");
    assert!(documents[0]["preview"]
        .as_str()
        .is_some_and(|preview| preview.contains("sky")));
}

#[tokio::test]
async fn test_upload_without_doc_id_generates_one() {
    let (app, _upload_dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(multipart_upload("notes.md", "# Notes\n\nRockets launch from the pad.", None))
        .await
        .expect("upload response");
    assert_eq!(response.status(), StatusCode::OK);
    let uuid = body_json(response).await["uuid"]
        .as_str()
        .map(str::to_owned)
        .expect("uuid");
    assert!(Uuid::parse_str(&uuid).is_ok());

    let response = app
        .oneshot(get("/documents"))
        .await
        .expect("documents response");
    assert_eq!(body_json(response).await[0]["id"], uuid.as_str());
}

#[tokio::test]
async fn test_missing_parameters_are_bad_requests() {
    let (app, _upload_dir) = test_app().await;

    for uri in ["/query?uuid=a", "/query?text=sky", "/stream?text=sky", "/query?text=%20&uuid=a"] {
        let response = app.clone().oneshot(get(uri)).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn test_query_against_empty_namespace_is_not_found() {
    let (app, _upload_dir) = test_app().await;

    let response = app
        .oneshot(get("/query?text=sky&uuid=nobody"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["status"], "error");
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let (app, _upload_dir) = test_app().await;

    let response = app
        .oneshot(multipart_upload("blank.txt", "   ", Some("blank")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_emits_chunks_then_end() {
    let (app, _upload_dir) = test_app().await;
    app.clone()
        .oneshot(multipart_upload("sky.txt", "The sky is blue.", Some("a")))
        .await
        .expect("upload response");

    let response = app
        .oneshot(get("/stream?text=sky&uuid=a"))
        .await
        .expect("stream response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream")));

    let body = body_text(response).await;
    assert!(body.contains("event: chunk"));
    assert!(body.contains("blue"));
    assert!(body.trim_end().ends_with("data: Stream complete"));
    assert_eq!(body.matches("event: end").count(), 1);
}

#[tokio::test]
async fn test_stream_against_empty_namespace_sends_error_event() {
    let (app, _upload_dir) = test_app().await;

    let response = app
        .oneshot(get("/stream?text=sky&uuid=nobody"))
        .await
        .expect("stream response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("event: error"));
    assert!(!body.contains("event: end"));
}

#[tokio::test]
async fn test_probes_and_cors() {
    let (app, _upload_dir) = test_app().await;

    let response = app.clone().oneshot(get("/live")).await.expect("live");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/ready")).await.expect("ready");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/documents")
                .header(header::ORIGIN, "http://example.com")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("cors response");
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|value| value.to_str().ok()),
        Some("*")
    );
}
