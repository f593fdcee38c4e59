//! Adapters for the three backing stores an index is composed from.
//!
//! Each store is an async trait so that the index manager and the insertion
//! pipeline never touch SurrealDB directly. The SurrealDB implementations each
//! own a client handle; the handles may point at the same database or at
//! different ones.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::{AppError, StoreKind},
    storage::{
        db::SurrealDbClient,
        types::{
            document_node::{DocumentHead, DocumentNode},
            index_node_entry::IndexNodeEntry,
            index_struct::{EmbeddingSignature, IndexStruct},
            node_embedding::{NodeEmbedding, ScoredNode},
            pending_insertion::{InsertionState, PendingInsertion},
        },
    },
};

/// Holds the text of every node.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn ping(&self) -> Result<(), AppError>;
    async fn put_nodes(&self, nodes: &[DocumentNode]) -> Result<(), AppError>;
    /// Nodes in the order of `ids`; unknown ids are skipped.
    async fn get_nodes(&self, ids: &[String]) -> Result<Vec<DocumentNode>, AppError>;
    /// Leading fragments of every committed document.
    async fn document_heads(&self, max_fragments: u32) -> Result<Vec<DocumentHead>, AppError>;
    async fn purge_insertion(&self, insertion_id: &str) -> Result<(), AppError>;
}

/// Holds per-namespace index metadata, node membership and the write-ahead
/// insertion records.
#[async_trait]
pub trait IndexStructureStore: Send + Sync {
    async fn load_or_create(
        &self,
        namespace: &str,
        signature: &EmbeddingSignature,
    ) -> Result<IndexStruct, AppError>;
    async fn add_members(&self, entries: &[IndexNodeEntry]) -> Result<(), AppError>;
    async fn member_count(&self, namespace: &str) -> Result<usize, AppError>;
    async fn purge_insertion(&self, insertion_id: &str) -> Result<(), AppError>;
    async fn begin_insertion(&self, pending: &PendingInsertion) -> Result<(), AppError>;
    async fn set_insertion_state(
        &self,
        insertion_id: &str,
        state: InsertionState,
    ) -> Result<(), AppError>;
    async fn stale_insertions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingInsertion>, AppError>;
}

/// Holds node embeddings, searchable by cosine similarity within a namespace.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, embeddings: Vec<NodeEmbedding>) -> Result<(), AppError>;
    async fn query(
        &self,
        namespace: &str,
        embedding: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<ScoredNode>, AppError>;
    async fn count(&self, namespace: &str) -> Result<usize, AppError>;
    async fn purge_insertion(&self, insertion_id: &str) -> Result<(), AppError>;
}

/// The three store handles, shared by everything that builds or reads an index.
#[derive(Clone)]
pub struct StoreHandles {
    pub content: Arc<dyn ContentStore>,
    pub structure: Arc<dyn IndexStructureStore>,
    pub vectors: Arc<dyn VectorStore>,
}

impl StoreHandles {
    /// All three stores backed by one database.
    pub fn surreal(db: Arc<SurrealDbClient>) -> Self {
        Self {
            content: Arc::new(SurrealContentStore::new(Arc::clone(&db))),
            structure: Arc::new(SurrealIndexStructureStore::new(Arc::clone(&db))),
            vectors: Arc::new(SurrealVectorStore::new(db)),
        }
    }
}

fn unavailable(store: StoreKind) -> impl Fn(AppError) -> AppError {
    move |err| AppError::StoreUnavailable(format!("{store} store: {}", err.detail()))
}

fn write_failed(store: StoreKind) -> impl Fn(AppError) -> AppError {
    move |err| AppError::store_write(store, err.detail())
}

pub struct SurrealContentStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealContentStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ContentStore for SurrealContentStore {
    async fn ping(&self) -> Result<(), AppError> {
        self.db
            .ping()
            .await
            .map_err(AppError::Database)
            .map_err(unavailable(StoreKind::Content))
    }

    async fn put_nodes(&self, nodes: &[DocumentNode]) -> Result<(), AppError> {
        for node in nodes {
            self.db
                .store_item(node.clone())
                .await
                .map_err(AppError::Database)
                .map_err(write_failed(StoreKind::Content))?;
        }
        Ok(())
    }

    async fn get_nodes(&self, ids: &[String]) -> Result<Vec<DocumentNode>, AppError> {
        DocumentNode::get_many(ids, &self.db)
            .await
            .map_err(unavailable(StoreKind::Content))
    }

    async fn document_heads(&self, max_fragments: u32) -> Result<Vec<DocumentHead>, AppError> {
        DocumentNode::document_heads(max_fragments, &self.db)
            .await
            .map_err(unavailable(StoreKind::Content))
    }

    async fn purge_insertion(&self, insertion_id: &str) -> Result<(), AppError> {
        DocumentNode::delete_by_insertion(insertion_id, &self.db)
            .await
            .map_err(write_failed(StoreKind::Content))
    }
}

pub struct SurrealIndexStructureStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealIndexStructureStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IndexStructureStore for SurrealIndexStructureStore {
    async fn load_or_create(
        &self,
        namespace: &str,
        signature: &EmbeddingSignature,
    ) -> Result<IndexStruct, AppError> {
        IndexStruct::load_or_create(namespace, signature, &self.db)
            .await
            .map_err(unavailable(StoreKind::IndexStructure))
    }

    async fn add_members(&self, entries: &[IndexNodeEntry]) -> Result<(), AppError> {
        for entry in entries {
            self.db
                .store_item(entry.clone())
                .await
                .map_err(AppError::Database)
                .map_err(write_failed(StoreKind::IndexStructure))?;
        }
        Ok(())
    }

    async fn member_count(&self, namespace: &str) -> Result<usize, AppError> {
        IndexNodeEntry::count_for_namespace(namespace, &self.db)
            .await
            .map_err(unavailable(StoreKind::IndexStructure))
    }

    async fn purge_insertion(&self, insertion_id: &str) -> Result<(), AppError> {
        IndexNodeEntry::delete_by_insertion(insertion_id, &self.db)
            .await
            .map_err(write_failed(StoreKind::IndexStructure))
    }

    async fn begin_insertion(&self, pending: &PendingInsertion) -> Result<(), AppError> {
        self.db
            .store_item(pending.clone())
            .await
            .map_err(AppError::Database)
            .map_err(write_failed(StoreKind::IndexStructure))?;
        Ok(())
    }

    async fn set_insertion_state(
        &self,
        insertion_id: &str,
        state: InsertionState,
    ) -> Result<(), AppError> {
        PendingInsertion::set_state(insertion_id, state, &self.db)
            .await
            .map_err(write_failed(StoreKind::IndexStructure))
    }

    async fn stale_insertions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingInsertion>, AppError> {
        PendingInsertion::stale(cutoff, &self.db)
            .await
            .map_err(unavailable(StoreKind::IndexStructure))
    }
}

pub struct SurrealVectorStore {
    db: Arc<SurrealDbClient>,
}

impl SurrealVectorStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VectorStore for SurrealVectorStore {
    async fn add(&self, embeddings: Vec<NodeEmbedding>) -> Result<(), AppError> {
        for embedding in embeddings {
            self.db
                .upsert_item(embedding)
                .await
                .map_err(AppError::Database)
                .map_err(write_failed(StoreKind::Vector))?;
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        embedding: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<ScoredNode>, AppError> {
        NodeEmbedding::nearest(namespace, embedding, top_k, &self.db)
            .await
            .map_err(unavailable(StoreKind::Vector))
    }

    async fn count(&self, namespace: &str) -> Result<usize, AppError> {
        NodeEmbedding::count_for_namespace(namespace, &self.db)
            .await
            .map_err(unavailable(StoreKind::Vector))
    }

    async fn purge_insertion(&self, insertion_id: &str) -> Result<(), AppError> {
        NodeEmbedding::delete_by_insertion(insertion_id, &self.db)
            .await
            .map_err(write_failed(StoreKind::Vector))
    }
}
