use std::collections::HashMap;

use surrealdb::RecordId;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::pending_insertion::PendingInsertion},
    stored_object,
};

stored_object!(DocumentNode, "document_node", {
    /// Document the fragment was cut from
    doc_id: String,
    /// Namespace the owning document was indexed into
    namespace: String,
    /// Write-ahead insertion that produced this node
    insertion_id: String,
    /// Ordinal of the fragment inside its document
    position: u32,
    text: String
});

/// First fragments of one document, as needed to rebuild a listing preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHead {
    pub doc_id: String,
    pub text: String,
}

impl DocumentNode {
    pub fn new(
        doc_id: String,
        namespace: String,
        insertion_id: String,
        position: u32,
        text: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            doc_id,
            namespace,
            insertion_id,
            position,
            text,
        }
    }

    /// Fetches nodes by id, returned in the order of `ids`. Unknown ids are skipped.
    pub async fn get_many(ids: &[String], db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let record_ids: Vec<RecordId> = ids
            .iter()
            .map(|id| RecordId::from_table_key(Self::table_name(), id.as_str()))
            .collect();

        let mut response = db
            .client
            .query(format!("SELECT * FROM {} WHERE id IN $ids", Self::table_name()))
            .bind(("ids", record_ids))
            .await?;
        let nodes: Vec<Self> = response.take(0)?;

        let mut by_id: HashMap<String, Self> =
            nodes.into_iter().map(|node| (node.id.clone(), node)).collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub async fn for_document(doc_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE doc_id = $doc_id ORDER BY position ASC",
                Self::table_name()
            ))
            .bind(("doc_id", doc_id.to_owned()))
            .await?;

        Ok(response.take(0)?)
    }

    pub async fn delete_by_insertion(
        insertion_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(format!(
                "DELETE {} WHERE insertion_id = $insertion_id",
                Self::table_name()
            ))
            .bind(("insertion_id", insertion_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    /// Reassembles the leading text of every committed document from its first
    /// `max_fragments` nodes, ordered by the time its first committed insertion
    /// was written. When a document was inserted more than once, the text of its
    /// latest insertion wins but it keeps its original slot. Nodes of pending or
    /// abandoned insertions are never read.
    pub async fn document_heads(
        max_fragments: u32,
        db: &SurrealDbClient,
    ) -> Result<Vec<DocumentHead>, AppError> {
        let committed = PendingInsertion::committed_ids(db).await?;
        if committed.is_empty() || max_fragments == 0 {
            return Ok(Vec::new());
        }

        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE insertion_id IN $committed AND position < $max_fragments \
                 ORDER BY created_at ASC, position ASC",
                Self::table_name()
            ))
            .bind(("committed", committed))
            .bind(("max_fragments", max_fragments))
            .await?;
        let nodes: Vec<Self> = response.take(0)?;

        let mut order: Vec<String> = Vec::new();
        // doc_id -> (latest insertion id, latest insertion timestamp, fragments)
        let mut latest: HashMap<String, (String, DateTime<Utc>, Vec<(u32, String)>)> =
            HashMap::new();

        for node in nodes {
            match latest.get_mut(&node.doc_id) {
                None => {
                    order.push(node.doc_id.clone());
                    latest.insert(
                        node.doc_id,
                        (node.insertion_id, node.created_at, vec![(node.position, node.text)]),
                    );
                }
                Some(entry) if entry.0 == node.insertion_id => {
                    entry.2.push((node.position, node.text));
                }
                Some(entry) if node.created_at >= entry.1 => {
                    *entry = (node.insertion_id, node.created_at, vec![(node.position, node.text)]);
                }
                Some(_) => {}
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|doc_id| {
                let (_, _, mut fragments) = latest.remove(&doc_id)?;
                fragments.sort_by_key(|(position, _)| *position);
                let text = fragments
                    .into_iter()
                    .map(|(_, text)| text)
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(DocumentHead { doc_id, text })
            })
            .collect())
    }
}
