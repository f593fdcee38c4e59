use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    error::{AppError, ErrorKind, StoreKind},
    storage::{
        db::SurrealDbClient,
        stores::{StoreHandles, VectorStore},
        types::{
            document_node::DocumentNode,
            index_node_entry::IndexNodeEntry,
            node_embedding::{NodeEmbedding, ScoredNode},
            pending_insertion::{InsertionState, PendingInsertion},
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingBackend, embedding::EmbeddingProvider},
};
use futures::StreamExt;
use retrieval_pipeline::echo::EchoModel;
use tempfile::TempDir;
use uuid::Uuid;

use crate::{
    events::StreamEvent,
    manager::IndexManager,
    service::{InProcessIndex, IndexService},
    worker::StreamingQueryWorker,
};

struct Harness {
    manager: Arc<IndexManager>,
    db: Arc<SurrealDbClient>,
    model: EchoModel,
    dir: TempDir,
}

impl Harness {
    fn write(&self, name: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, text).expect("write document");
        path
    }

    fn stores(&self) -> StoreHandles {
        StoreHandles::surreal(Arc::clone(&self.db))
    }
}

fn test_config(dimension: u32) -> AppConfig {
    AppConfig {
        embedding_backend: EmbeddingBackend::Hashed,
        embedding_dimensions: dimension,
        chunk_min_chars: 20,
        chunk_max_chars: 200,
        reconcile_grace_secs: 0,
        ..AppConfig::default()
    }
}

async fn manager_on(db: &Arc<SurrealDbClient>, config: &AppConfig, model: &EchoModel) -> IndexManager {
    let provider = EmbeddingProvider::from_config(config, None)
        .await
        .expect("embedding provider");
    IndexManager::from_config(
        config,
        StoreHandles::surreal(Arc::clone(db)),
        Arc::new(provider),
        Arc::new(model.clone()),
    )
    .expect("manager")
}

async fn harness_with(model: EchoModel) -> Harness {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("Failed to start in-memory surrealdb");
    db.ensure_initialized().await.expect("schema");
    let db = Arc::new(db);
    let manager = manager_on(&db, &test_config(64), &model).await;

    Harness {
        manager: Arc::new(manager),
        db,
        model,
        dir: tempfile::tempdir().expect("temp dir"),
    }
}

async fn harness() -> Harness {
    harness_with(EchoModel::new()).await
}

async fn drain(mut handoff: crate::worker::Handoff) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = handoff.next().await {
        events.push(event);
    }
    events
}

fn chunk_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Chunk { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_insert_then_query_answers_from_content() {
    let h = harness().await;
    let path = h.write("sky.txt", "The sky is blue.");

    let doc_id = h
        .manager
        .insert(&path, Some("a".into()))
        .await
        .expect("insert");
    assert_eq!(doc_id, "a");

    let answer = h
        .manager
        .query("What color is the sky?", "a")
        .await
        .expect("query");
    assert!(answer.text.contains("blue"));
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources.first().map(|s| s.doc_id.as_str()), Some("a"));
}

#[tokio::test]
async fn test_insert_generates_doc_id_when_missing() {
    let h = harness().await;
    let path = h.write("note.txt", "Generated identifiers are version four uuids.");

    let doc_id = h.manager.insert(&path, None).await.expect("insert");
    assert!(Uuid::parse_str(&doc_id).is_ok());

    let snapshot = h.manager.active_snapshot(&doc_id).await.expect("snapshot");
    assert_eq!(snapshot.node_count(), 1);
}

#[tokio::test]
async fn test_stream_chunks_concatenate_to_query_answer() {
    let h = harness().await;
    let path = h.write("sky.txt", "The sky is blue and the grass is green.");
    h.manager
        .insert(&path, Some("a".into()))
        .await
        .expect("insert");

    let answer = h.manager.query("sky color", "a").await.expect("query");

    let worker = StreamingQueryWorker::new(Arc::clone(&h.manager));
    let events = drain(worker.start_stream("sky color".into(), "a".into())).await;

    assert!(events.len() > 2);
    assert_eq!(chunk_text(&events), answer.text);
    assert_eq!(events.iter().filter(|e| e.is_sentinel()).count(), 1);
    assert_eq!(events.last(), Some(&StreamEvent::End));
}

#[tokio::test]
async fn test_handoff_yields_nothing_after_sentinel() {
    let h = harness().await;
    let path = h.write("sky.txt", "The sky is blue.");
    h.manager
        .insert(&path, Some("a".into()))
        .await
        .expect("insert");

    let worker = StreamingQueryWorker::new(Arc::clone(&h.manager));
    let mut handoff = worker.start_stream("sky".into(), "a".into());
    let mut sentinel = None;
    while let Some(event) = handoff.next().await {
        if event.is_sentinel() {
            sentinel = Some(event);
            break;
        }
    }
    assert_eq!(sentinel, Some(StreamEvent::End));
    assert!(handoff.is_finished());
    assert!(handoff.next().await.is_none());
    assert!(handoff.next().await.is_none());
}

#[tokio::test]
async fn test_query_against_empty_namespace_is_empty_index() {
    let h = harness().await;

    let result = h.manager.query("anything", "nobody").await;
    assert!(matches!(result, Err(AppError::EmptyIndex(ns)) if ns == "nobody"));

    let result = h.manager.query_stream("anything", "nobody").await;
    assert!(matches!(result, Err(AppError::EmptyIndex(_))));

    let worker = StreamingQueryWorker::new(Arc::clone(&h.manager));
    let events = drain(worker.start_stream("anything".into(), "nobody".into())).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events.first(),
        Some(StreamEvent::Error {
            kind: ErrorKind::EmptyIndex,
            ..
        })
    ));
}

#[tokio::test]
async fn test_blank_inputs_are_rejected() {
    let h = harness().await;
    assert!(matches!(
        h.manager.activate_namespace("  ").await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.manager.query("", "a").await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_list_documents_keeps_insertion_order_and_skips_failures() {
    let h = harness().await;
    let first = h.write("one.txt", "First document body text.");
    let second = h.write("two.txt", "Second document body text.");
    let empty = h.write("empty.txt", "   ");

    h.manager
        .insert(&first, Some("one".into()))
        .await
        .expect("insert");
    h.manager
        .insert(&second, Some("two".into()))
        .await
        .expect("insert");
    assert!(matches!(
        h.manager.insert(&empty, Some("bad".into())).await,
        Err(AppError::Parse(_))
    ));
    assert!(matches!(
        h.manager
            .insert(&h.dir.path().join("missing.txt"), Some("gone".into()))
            .await,
        Err(AppError::Load(_))
    ));

    let replacement = h.write("one-again.txt", "Replacement text for the first document.");
    h.manager
        .insert(&replacement, Some("one".into()))
        .await
        .expect("reinsert");

    let listing = h.manager.list_documents().await;
    let ids: Vec<&str> = listing.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["one", "two"]);
    assert_eq!(
        listing.first().map(|l| l.preview.as_str()),
        Some("Replacement text for the first document.")
    );
}

struct FullVectorStore;

#[async_trait]
impl VectorStore for FullVectorStore {
    async fn add(&self, _embeddings: Vec<NodeEmbedding>) -> Result<(), AppError> {
        Err(AppError::store_write(StoreKind::Vector, "no space left on device"))
    }

    async fn query(
        &self,
        _namespace: &str,
        _embedding: Vec<f32>,
        _top_k: usize,
    ) -> Result<Vec<ScoredNode>, AppError> {
        Ok(Vec::new())
    }

    async fn count(&self, _namespace: &str) -> Result<usize, AppError> {
        Ok(0)
    }

    async fn purge_insertion(&self, _insertion_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_store_write_failure_never_reaches_the_listing() {
    let h = harness().await;
    let kept = h.write("kept.txt", "A document that made it into every store.");
    h.manager
        .insert(&kept, Some("kept".into()))
        .await
        .expect("insert");

    let config = AppConfig {
        reconcile_grace_secs: 300,
        ..test_config(64)
    };
    let provider = EmbeddingProvider::from_config(&config, None)
        .await
        .expect("embedding provider");
    let failing = IndexManager::from_config(
        &config,
        StoreHandles {
            vectors: Arc::new(FullVectorStore),
            ..h.stores()
        },
        Arc::new(provider),
        Arc::new(h.model.clone()),
    )
    .expect("manager");

    let broken = h.write("broken.txt", "This text is written to content but never to vectors.");
    let result = failing.insert(&broken, Some("broken".into())).await;
    assert!(matches!(
        result,
        Err(AppError::StoreWrite {
            store: StoreKind::Vector,
            ..
        })
    ));
    assert!(failing.list_documents().await.is_empty());

    // Restart inside the grace period: the partial insertion is still pending
    let restarted = manager_on(&h.db, &config, &h.model).await;
    assert!(restarted.reconcile().await.expect("reconcile").abandoned.is_empty());
    assert_eq!(restarted.rebuild_registry().await.expect("rebuild"), 1);

    let ids: Vec<String> = restarted
        .list_documents()
        .await
        .into_iter()
        .map(|listing| listing.id)
        .collect();
    assert_eq!(ids, vec!["kept".to_string()]);
}

#[tokio::test]
async fn test_fresh_pending_insertion_is_not_listed_after_restart() {
    let h = harness().await;
    let stores = h.stores();

    let pending = PendingInsertion::new("ghost".into(), "ghost".into(), vec![]);
    stores
        .structure
        .begin_insertion(&pending)
        .await
        .expect("begin");
    stores
        .content
        .put_nodes(&[DocumentNode::new(
            "ghost".into(),
            "ghost".into(),
            pending.id.clone(),
            0,
            "never indexed".into(),
        )])
        .await
        .expect("content");

    let config = AppConfig {
        reconcile_grace_secs: 300,
        ..test_config(64)
    };
    let restarted = manager_on(&h.db, &config, &h.model).await;
    assert!(restarted.reconcile().await.expect("reconcile").abandoned.is_empty());
    assert_eq!(restarted.rebuild_registry().await.expect("rebuild"), 0);
    assert!(restarted.list_documents().await.is_empty());
}

#[tokio::test]
async fn test_stream_activates_a_fresh_snapshot() {
    let h = harness().await;
    let path = h.write("sky.txt", "The sky is blue.");
    h.manager
        .insert(&path, Some("a".into()))
        .await
        .expect("insert");
    let before = h.manager.index_for("a").await.expect("snapshot");

    let worker = StreamingQueryWorker::new(Arc::clone(&h.manager));
    let events = drain(worker.start_stream("sky".into(), "a".into())).await;
    assert_eq!(events.last(), Some(&StreamEvent::End));

    let after = h.manager.active_snapshot("a").await.expect("snapshot");
    assert!(!Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_concurrent_inserts_into_different_namespaces() {
    let h = harness().await;
    let left = h.write("left.txt", "Left side talks about apples only.");
    let right = h.write("right.txt", "Right side talks about rockets only.");

    let (left_id, right_id) = tokio::join!(
        h.manager.insert(&left, Some("left".into())),
        h.manager.insert(&right, Some("right".into()))
    );
    assert_eq!(left_id.expect("left"), "left");
    assert_eq!(right_id.expect("right"), "right");

    let left_answer = h.manager.query("apples", "left").await.expect("query");
    let right_answer = h.manager.query("rockets", "right").await.expect("query");
    assert!(left_answer.text.contains("apples"));
    assert!(!left_answer.text.contains("rockets"));
    assert!(right_answer.text.contains("rockets"));
    assert_eq!(h.manager.list_documents().await.len(), 2);
}

#[tokio::test]
async fn test_dropping_handoff_stops_the_producer() {
    let model = EchoModel::new().with_token_delay(Duration::from_millis(20));
    let h = harness_with(model).await;
    let path = h.write("long.txt", &"word ".repeat(35));
    h.manager
        .insert(&path, Some("long".into()))
        .await
        .expect("insert");

    let worker = StreamingQueryWorker::new(Arc::clone(&h.manager));
    let mut handoff = worker.start_stream("word".into(), "long".into());
    assert!(matches!(handoff.next().await, Some(StreamEvent::Chunk { .. })));
    drop(handoff);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let after_drop = h.model.tokens_emitted();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.model.tokens_emitted(), after_drop);
    assert!(after_drop < 35);
}

#[tokio::test]
async fn test_cancel_ends_the_handoff_quietly() {
    let model = EchoModel::new().with_token_delay(Duration::from_millis(20));
    let h = harness_with(model).await;
    let path = h.write("long.txt", &"word ".repeat(35));
    h.manager
        .insert(&path, Some("long".into()))
        .await
        .expect("insert");

    let worker = StreamingQueryWorker::new(Arc::clone(&h.manager));
    let mut handoff = worker.start_stream("word".into(), "long".into());
    handoff.cancel();

    // Whatever was already queued may still arrive, but no sentinel follows
    let mut events = Vec::new();
    while let Some(event) = handoff.next().await {
        events.push(event);
    }
    assert!(events.iter().all(|event| !event.is_sentinel()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handoff.producer_done());
}

#[tokio::test]
async fn test_query_timeout_surfaces_inference_timeout() {
    let model = EchoModel::new().with_token_delay(Duration::from_millis(200));
    let h = harness_with(model).await;
    let path = h.write("sky.txt", "The sky is blue.");
    h.manager
        .insert(&path, Some("a".into()))
        .await
        .expect("insert");

    let result = h
        .manager
        .query_with_timeout("sky", "a", Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(AppError::InferenceTimeout(_))));
}

#[tokio::test]
async fn test_stream_deadline_ends_with_timeout_sentinel() {
    let model = EchoModel::new().with_token_delay(Duration::from_millis(40));
    let h = harness_with(model).await;
    let path = h.write("long.txt", &"word ".repeat(35));
    h.manager
        .insert(&path, Some("long".into()))
        .await
        .expect("insert");

    let events: Vec<StreamEvent> = h
        .manager
        .query_stream_with_timeout("word", "long", Duration::from_millis(150))
        .await
        .expect("stream starts")
        .collect()
        .await;

    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error {
            kind: ErrorKind::InferenceTimeout { .. },
            ..
        })
    ));
    assert_eq!(events.iter().filter(|e| e.is_sentinel()).count(), 1);
}

#[tokio::test]
async fn test_mid_stream_failure_becomes_error_sentinel() {
    let h = harness_with(EchoModel::new().failing_after(2)).await;
    let path = h.write("sky.txt", "The sky is very blue today.");
    h.manager
        .insert(&path, Some("a".into()))
        .await
        .expect("insert");

    let worker = StreamingQueryWorker::new(Arc::clone(&h.manager));
    let events = drain(worker.start_stream("sky".into(), "a".into())).await;

    assert_eq!(events.len(), 3);
    assert_eq!(chunk_text(&events), "The sky ");
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error {
            kind: ErrorKind::Inference,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_consumer_receives_whole_stream() {
    let h = harness().await;
    let path = h.write("sky.txt", "The sky is blue.");
    h.manager
        .insert(&path, Some("a".into()))
        .await
        .expect("insert");

    let worker = StreamingQueryWorker::new(Arc::clone(&h.manager));
    let mut handoff = worker.start_stream("sky".into(), "a".into());
    let events = tokio::task::spawn_blocking(move || {
        let mut events = Vec::new();
        while let Some(event) = handoff.blocking_next() {
            events.push(event);
        }
        events
    })
    .await
    .expect("blocking consumer");

    assert_eq!(chunk_text(&events), "The sky is blue.");
    assert_eq!(events.last(), Some(&StreamEvent::End));
}

#[tokio::test]
async fn test_in_flight_snapshot_survives_reactivation() {
    let h = harness().await;
    let path = h.write("one.txt", "The first fragment of text.");
    h.manager
        .insert(&path, Some("ns".into()))
        .await
        .expect("insert");

    let captured = h.manager.index_for("ns").await.expect("snapshot");
    assert_eq!(captured.node_count(), 1);

    let again = h.write("two.txt", "A second fragment for the same namespace.");
    h.manager
        .insert(&again, Some("ns".into()))
        .await
        .expect("insert");

    let current = h.manager.index_for("ns").await.expect("snapshot");
    assert_eq!(current.node_count(), 2);
    assert_eq!(captured.node_count(), 1);
    assert!(!Arc::ptr_eq(&captured, &current));
}

#[tokio::test]
async fn test_dimension_mismatch_is_a_configuration_error() {
    let h = harness().await;
    h.manager.activate_namespace("ns").await.expect("activate");

    let other = manager_on(&h.db, &test_config(32), &EchoModel::new()).await;
    assert!(matches!(
        other.activate_namespace("ns").await,
        Err(AppError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_registry_rebuilds_from_content_store() {
    let h = harness().await;
    let first = h.write("one.txt", "Alpha document text.");
    let second = h.write("two.txt", "Beta document text.");
    h.manager
        .insert(&first, Some("alpha".into()))
        .await
        .expect("insert");
    h.manager
        .insert(&second, Some("beta".into()))
        .await
        .expect("insert");

    let restarted = manager_on(&h.db, &test_config(64), &h.model).await;
    assert!(restarted.list_documents().await.is_empty());

    assert_eq!(restarted.rebuild_registry().await.expect("rebuild"), 2);
    assert_eq!(restarted.list_documents().await, h.manager.list_documents().await);
}

#[tokio::test]
async fn test_reconcile_purges_partial_insertion() {
    let h = harness().await;
    let stores = h.stores();

    let mut pending = PendingInsertion::new("ns".into(), "doc".into(), vec![]);
    pending.created_at = Utc::now() - chrono::Duration::minutes(1);
    let node = DocumentNode::new("doc".into(), "ns".into(), pending.id.clone(), 0, "partial".into());
    pending.node_ids = vec![node.id.clone()];

    stores
        .structure
        .begin_insertion(&pending)
        .await
        .expect("begin");
    stores
        .content
        .put_nodes(std::slice::from_ref(&node))
        .await
        .expect("content");
    stores
        .structure
        .add_members(&[IndexNodeEntry::new(
            "ns".into(),
            "doc".into(),
            node.id.clone(),
            pending.id.clone(),
        )])
        .await
        .expect("members");
    stores
        .vectors
        .add(vec![NodeEmbedding::new(
            node.id.clone(),
            "doc".into(),
            "ns".into(),
            pending.id.clone(),
            vec![0.5; 64],
        )])
        .await
        .expect("vectors");

    let committed = h.write("ok.txt", "A fully committed document.");
    h.manager
        .insert(&committed, Some("ok".into()))
        .await
        .expect("insert");

    let report = h.manager.reconcile().await.expect("reconcile");
    assert_eq!(report.abandoned, vec![pending.id.clone()]);

    assert!(stores
        .content
        .get_nodes(&[node.id])
        .await
        .expect("fetch")
        .is_empty());
    assert_eq!(stores.structure.member_count("ns").await.expect("count"), 0);
    assert_eq!(stores.vectors.count("ns").await.expect("count"), 0);
    assert_eq!(stores.vectors.count("ok").await.expect("count"), 1);

    let record = h
        .db
        .get_item::<PendingInsertion>(&pending.id)
        .await
        .expect("fetch")
        .expect("record");
    assert_eq!(record.state, InsertionState::Abandoned);

    assert!(h.manager.reconcile().await.expect("reconcile").abandoned.is_empty());
}

#[tokio::test]
async fn test_in_process_service_round_trip() {
    let h = harness().await;
    let service = InProcessIndex::new(Arc::clone(&h.manager));
    let path = h.write("sky.txt", "The sky is blue.");

    let doc_id = service
        .insert(&path, Some("a".into()))
        .await
        .expect("insert");
    let summary = service.activate(&doc_id).await.expect("activate");
    assert_eq!(summary.node_count, 1);
    assert_eq!(summary.embedding_backend, "hashed");
    assert_eq!(summary.embedding_dimension, 64);

    let events: Vec<StreamEvent> = service
        .start_stream("What color is the sky?", "a")
        .await
        .expect("stream")
        .collect()
        .await;
    assert_eq!(chunk_text(&events), "The sky is blue.");

    let listing = service.list_documents().await.expect("list");
    assert_eq!(listing.len(), 1);
}
