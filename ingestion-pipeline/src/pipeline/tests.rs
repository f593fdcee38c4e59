use std::{
    io::Write,
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use common::{
    error::{AppError, StoreKind},
    storage::{
        db::SurrealDbClient,
        stores::{StoreHandles, VectorStore},
        types::{
            node_embedding::{NodeEmbedding, ScoredNode},
            pending_insertion::{InsertionState, PendingInsertion},
        },
    },
    utils::embedding::EmbeddingProvider,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    config::IngestionConfig, services::DefaultPipelineServices, IngestionPipeline,
    IngestionRequest, PipelineServices,
};
use crate::utils::{
    chunking::TextSplitterParser,
    file_text_extraction::{DocumentKind, FileDocumentLoader, LoadedDocument},
};

async fn setup_db() -> Arc<SurrealDbClient> {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("Failed to start in-memory surrealdb");
    db.ensure_initialized().await.expect("schema");
    Arc::new(db)
}

fn default_services() -> Arc<dyn PipelineServices> {
    Arc::new(DefaultPipelineServices::new(
        Arc::new(FileDocumentLoader),
        Arc::new(TextSplitterParser::new(20, 80, 0).expect("parser")),
        Arc::new(EmbeddingProvider::new_hashed(32).expect("hashed provider")),
    ))
}

fn text_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".txt")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write");
    file
}

fn request(path: &Path, doc_id: &str) -> IngestionRequest {
    IngestionRequest {
        path: path.to_path_buf(),
        doc_id: doc_id.to_string(),
        namespace: doc_id.to_string(),
    }
}

struct MockServices {
    calls: Mutex<Vec<&'static str>>,
    fail_embedding: bool,
}

impl MockServices {
    fn new(fail_embedding: bool) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_embedding,
        }
    }
}

#[async_trait]
impl PipelineServices for MockServices {
    async fn load_document(&self, path: &Path) -> Result<LoadedDocument, AppError> {
        self.calls.lock().await.push("load");
        Ok(LoadedDocument {
            path: path.to_path_buf(),
            kind: DocumentKind::PlainText,
            text: "first fragment. second fragment.".into(),
        })
    }

    fn parse_nodes(&self, _document: &LoadedDocument) -> Result<Vec<String>, AppError> {
        Ok(vec!["first fragment.".into(), "second fragment.".into()])
    }

    async fn embed_nodes(
        &self,
        texts: Vec<String>,
        _batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        self.calls.lock().await.push("embed");
        if self.fail_embedding {
            return Err(AppError::Inference("embedding backend offline".into()));
        }
        Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect())
    }
}

struct RejectingVectorStore;

#[async_trait]
impl VectorStore for RejectingVectorStore {
    async fn add(&self, _embeddings: Vec<NodeEmbedding>) -> Result<(), AppError> {
        Err(AppError::store_write(StoreKind::Vector, "disk full"))
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
async fn test_ingest_writes_all_three_stores() {
    let db = setup_db().await;
    let stores = StoreHandles::surreal(Arc::clone(&db));
    let pipeline =
        IngestionPipeline::new(stores.clone(), IngestionConfig::default(), default_services());

    let file = text_file("The sky is blue. Grass is green and the sun is warm today.");
    let outcome = pipeline
        .ingest(&request(file.path(), "a"))
        .await
        .expect("ingest");

    assert!(outcome.node_count >= 1);
    assert!(outcome.preview.starts_with("The sky is blue."));
    assert_eq!(
        stores.structure.member_count("a").await.expect("count"),
        outcome.node_count
    );
    assert_eq!(
        stores.vectors.count("a").await.expect("count"),
        outcome.node_count
    );

    let record = db
        .get_item::<PendingInsertion>(&outcome.insertion_id)
        .await
        .expect("fetch")
        .expect("write-ahead record");
    assert_eq!(record.state, InsertionState::Committed);
    assert_eq!(record.node_ids.len(), outcome.node_count);
}

#[tokio::test]
async fn test_preview_is_truncated_to_configured_length() {
    let db = setup_db().await;
    let mut config = IngestionConfig::default();
    config.tuning.preview_chars = 7;
    let pipeline = IngestionPipeline::new(StoreHandles::surreal(db), config, default_services());

    let file = text_file("The sky is blue.");
    let outcome = pipeline
        .ingest(&request(file.path(), "a"))
        .await
        .expect("ingest");
    assert_eq!(outcome.preview, "The sky");
}

#[tokio::test]
async fn test_empty_document_fails_before_any_write() {
    let db = setup_db().await;
    let stores = StoreHandles::surreal(Arc::clone(&db));
    let pipeline =
        IngestionPipeline::new(stores.clone(), IngestionConfig::default(), default_services());

    let file = text_file("   \n  ");
    let result = pipeline.ingest(&request(file.path(), "empty")).await;

    assert!(matches!(result, Err(AppError::Parse(_))));
    let pending: Vec<PendingInsertion> = db.get_all_stored_items().await.expect("fetch");
    assert!(pending.is_empty());
    assert_eq!(stores.vectors.count("empty").await.expect("count"), 0);
}

#[tokio::test]
async fn test_embedding_failure_is_an_inference_error() {
    let db = setup_db().await;
    let services = Arc::new(MockServices::new(true));
    let pipeline = IngestionPipeline::new(
        StoreHandles::surreal(Arc::clone(&db)),
        IngestionConfig::default(),
        services.clone(),
    );

    let result = pipeline
        .ingest(&request(Path::new("unused.txt"), "a"))
        .await;

    assert!(matches!(result, Err(AppError::Inference(_))));
    assert_eq!(*services.calls.lock().await, vec!["load", "embed"]);
    let pending: Vec<PendingInsertion> = db.get_all_stored_items().await.expect("fetch");
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_vector_write_failure_leaves_pending_record() {
    let db = setup_db().await;
    let stores = StoreHandles {
        vectors: Arc::new(RejectingVectorStore),
        ..StoreHandles::surreal(Arc::clone(&db))
    };
    let pipeline = IngestionPipeline::new(
        stores.clone(),
        IngestionConfig::default(),
        Arc::new(MockServices::new(false)),
    );

    let started = Utc::now();
    let result = pipeline
        .ingest(&request(Path::new("unused.txt"), "a"))
        .await;

    assert!(matches!(
        result,
        Err(AppError::StoreWrite {
            store: StoreKind::Vector,
            ..
        })
    ));
    // Content and membership were written before the vector store failed
    assert_eq!(stores.structure.member_count("a").await.expect("count"), 2);

    let pending: Vec<PendingInsertion> = db.get_all_stored_items().await.expect("fetch");
    assert_eq!(pending.len(), 1);
    let record = pending.first().expect("record");
    assert_eq!(record.state, InsertionState::Pending);
    assert!(record.created_at >= started - chrono::Duration::seconds(1));
}
