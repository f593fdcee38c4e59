use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(NodeEmbedding, "node_embedding", {
    /// Id of the embedded `document_node`
    node_id: String,
    doc_id: String,
    namespace: String,
    insertion_id: String,
    embedding: Vec<f32>
});

/// A vector hit: which node matched and how closely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    pub node_id: String,
    pub doc_id: String,
    pub score: f32,
}

impl NodeEmbedding {
    /// The record is keyed by its node id, so a node never has two vectors.
    pub fn new(
        node_id: String,
        doc_id: String,
        namespace: String,
        insertion_id: String,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: node_id.clone(),
            created_at: now,
            updated_at: now,
            node_id,
            doc_id,
            namespace,
            insertion_id,
            embedding,
        }
    }

    /// Exact cosine scan over one namespace, best match first.
    pub async fn nearest(
        namespace: &str,
        embedding: Vec<f32>,
        take: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ScoredNode>, AppError> {
        let query = format!(
            "SELECT node_id, doc_id, vector::similarity::cosine(embedding, $embedding) AS score \
             FROM {} WHERE namespace = $namespace ORDER BY score DESC LIMIT $take",
            Self::table_name()
        );

        let mut response = db
            .client
            .query(query)
            .bind(("embedding", embedding))
            .bind(("namespace", namespace.to_owned()))
            .bind(("take", take))
            .await
            .map_err(AppError::Database)?;

        response.take(0).map_err(AppError::Database)
    }

    pub async fn count_for_namespace(
        namespace: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            total: usize,
        }

        let mut response = db
            .client
            .query(format!(
                "SELECT count() AS total FROM {} WHERE namespace = $namespace GROUP ALL",
                Self::table_name()
            ))
            .bind(("namespace", namespace.to_owned()))
            .await
            .map_err(AppError::Database)?;
        let rows: Vec<CountRow> = response.take(0).map_err(AppError::Database)?;

        Ok(rows.first().map_or(0, |row| row.total))
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
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }
}
