use serde::{Deserialize, Serialize};

use crate::{
    model::{AnswerRequest, LanguageModel, TokenStream},
    RetrievedNode,
};
use common::error::AppError;

/// Where part of an answer came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub node_id: String,
    pub doc_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

pub fn create_user_message(context: &str, query: &str) -> String {
    format!(
        "Context Information:\n==================\n{context}\n\nUser Question:\n==================\n{query}"
    )
}

/// Node texts in retrieval order, separated by blank lines.
pub fn nodes_to_context(nodes: &[RetrievedNode]) -> String {
    nodes
        .iter()
        .map(|retrieved| retrieved.node.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn source_refs(nodes: &[RetrievedNode]) -> Vec<SourceRef> {
    nodes
        .iter()
        .map(|retrieved| SourceRef {
            node_id: retrieved.node.id.clone(),
            doc_id: retrieved.node.doc_id.clone(),
            score: retrieved.score,
        })
        .collect()
}

pub fn answer_request(query: &str, nodes: &[RetrievedNode]) -> AnswerRequest {
    AnswerRequest {
        query: query.to_string(),
        context: nodes_to_context(nodes),
    }
}

pub async fn synthesize_answer(
    model: &dyn LanguageModel,
    query: &str,
    nodes: &[RetrievedNode],
) -> Result<Answer, AppError> {
    let text = model.complete(&answer_request(query, nodes)).await?;

    Ok(Answer {
        text,
        sources: source_refs(nodes),
    })
}

pub async fn stream_answer(
    model: &dyn LanguageModel,
    query: &str,
    nodes: &[RetrievedNode],
) -> Result<TokenStream, AppError> {
    model.stream(&answer_request(query, nodes)).await
}
