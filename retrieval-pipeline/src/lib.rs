pub mod answer_retrieval;
#[cfg(any(test, feature = "test-utils"))]
pub mod echo;
pub mod model;

use common::{
    error::AppError,
    storage::{stores::StoreHandles, types::document_node::DocumentNode},
    utils::embedding::EmbeddingProvider,
};
use tracing::{debug, instrument};

pub use answer_retrieval::{Answer, SourceRef};
pub use model::{AnswerRequest, LanguageModel, OpenAiModel, TokenStream};

/// A node returned by similarity search, with its cosine score.
#[derive(Debug, Clone)]
pub struct RetrievedNode {
    pub node: DocumentNode,
    pub score: f32,
}

/// Embeds `query` and returns at most `top_k` nodes of `namespace`, best first.
#[instrument(skip_all, fields(namespace = %namespace, top_k))]
pub async fn retrieve_nodes(
    stores: &StoreHandles,
    embedding_provider: &EmbeddingProvider,
    namespace: &str,
    query: &str,
    top_k: usize,
) -> Result<Vec<RetrievedNode>, AppError> {
    let embedding = embedding_provider.embed(query).await?;

    let hits = stores
        .vectors
        .query(namespace, embedding, top_k.max(1))
        .await?;
    let ids: Vec<String> = hits.iter().map(|hit| hit.node_id.clone()).collect();
    let nodes = stores.content.get_nodes(&ids).await?;

    // Vector hits whose node is missing from the content store are dropped
    let retrieved: Vec<RetrievedNode> = hits
        .into_iter()
        .filter_map(|hit| {
            nodes
                .iter()
                .find(|node| node.id == hit.node_id)
                .map(|node| RetrievedNode {
                    node: node.clone(),
                    score: hit.score,
                })
        })
        .collect();

    debug!(
        namespace = %namespace,
        hits = ids.len(),
        retrieved = retrieved.len(),
        "similarity retrieval finished"
    );

    Ok(retrieved)
}
