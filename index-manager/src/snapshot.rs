use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{stores::StoreHandles, types::index_struct::IndexStruct},
    utils::embedding::EmbeddingProvider,
};
use retrieval_pipeline::{retrieve_nodes, RetrievedNode};

/// Immutable retrieval view of one namespace, built on activation. Queries
/// hold on to the `Arc` they started with even if the namespace is
/// re-activated underneath them.
pub struct NamespaceIndex {
    namespace: String,
    structure: IndexStruct,
    node_count: usize,
    activated_at: DateTime<Utc>,
    stores: StoreHandles,
    embedding_provider: Arc<EmbeddingProvider>,
}

impl NamespaceIndex {
    pub fn new(
        namespace: String,
        structure: IndexStruct,
        node_count: usize,
        stores: StoreHandles,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            namespace,
            structure,
            node_count,
            activated_at: Utc::now(),
            stores,
            embedding_provider,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn structure(&self) -> &IndexStruct {
        &self.structure
    }

    /// Vectors present when the snapshot was taken.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn is_empty(&self) -> bool {
        self.node_count == 0
    }

    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedNode>, AppError> {
        retrieve_nodes(
            &self.stores,
            &self.embedding_provider,
            &self.namespace,
            query,
            top_k,
        )
        .await
    }
}
