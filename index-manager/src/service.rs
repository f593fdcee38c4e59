use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use common::error::AppError;
use futures::stream::BoxStream;
use retrieval_pipeline::Answer;
use serde::{Deserialize, Serialize};

use crate::{
    events::StreamEvent,
    manager::IndexManager,
    registry::DocumentListing,
    snapshot::NamespaceIndex,
    worker::StreamingQueryWorker,
};

pub type EventStream = BoxStream<'static, StreamEvent>;

/// What an activation found for a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub namespace: String,
    pub node_count: usize,
    pub embedding_backend: String,
    pub embedding_model: Option<String>,
    pub embedding_dimension: u32,
}

impl From<&NamespaceIndex> for IndexSummary {
    fn from(index: &NamespaceIndex) -> Self {
        let structure = index.structure();
        Self {
            namespace: index.namespace().to_owned(),
            node_count: index.node_count(),
            embedding_backend: structure.embedding_backend.clone(),
            embedding_model: structure.embedding_model.clone(),
            embedding_dimension: structure.embedding_dimension,
        }
    }
}

/// The index operations the serving layer needs, whether the index lives in
/// this process or behind the gateway.
#[async_trait]
pub trait IndexService: Send + Sync {
    async fn activate(&self, namespace: &str) -> Result<IndexSummary, AppError>;

    async fn insert(&self, path: &Path, doc_id: Option<String>) -> Result<String, AppError>;

    async fn query(&self, text: &str, namespace: &str) -> Result<Answer, AppError>;

    /// Events of a streamed answer, ending with exactly one sentinel.
    async fn start_stream(&self, text: &str, namespace: &str) -> Result<EventStream, AppError>;

    async fn list_documents(&self) -> Result<Vec<DocumentListing>, AppError>;
}

/// [`IndexService`] backed by an [`IndexManager`] in the same process.
#[derive(Clone)]
pub struct InProcessIndex {
    manager: Arc<IndexManager>,
    worker: StreamingQueryWorker,
}

impl InProcessIndex {
    pub fn new(manager: Arc<IndexManager>) -> Self {
        Self {
            worker: StreamingQueryWorker::new(Arc::clone(&manager)),
            manager,
        }
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    pub fn worker(&self) -> &StreamingQueryWorker {
        &self.worker
    }
}

#[async_trait]
impl IndexService for InProcessIndex {
    async fn activate(&self, namespace: &str) -> Result<IndexSummary, AppError> {
        let index = self.manager.activate_namespace(namespace).await?;
        Ok(IndexSummary::from(index.as_ref()))
    }

    async fn insert(&self, path: &Path, doc_id: Option<String>) -> Result<String, AppError> {
        self.manager.insert(path, doc_id).await
    }

    async fn query(&self, text: &str, namespace: &str) -> Result<Answer, AppError> {
        self.manager.query(text, namespace).await
    }

    async fn start_stream(&self, text: &str, namespace: &str) -> Result<EventStream, AppError> {
        Ok(self
            .worker
            .start_stream(text.to_owned(), namespace.to_owned())
            .into_events())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentListing>, AppError> {
        Ok(self.manager.list_documents().await)
    }
}
