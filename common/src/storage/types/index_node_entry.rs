use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(IndexNodeEntry, "index_node", {
    namespace: String,
    doc_id: String,
    node_id: String,
    insertion_id: String
});

impl IndexNodeEntry {
    pub fn new(namespace: String, doc_id: String, node_id: String, insertion_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            namespace,
            doc_id,
            node_id,
            insertion_id,
        }
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
