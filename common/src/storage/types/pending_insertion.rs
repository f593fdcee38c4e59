use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum InsertionState {
    #[default]
    Pending,
    Committed,
    /// Partial writes were purged by reconciliation
    Abandoned,
}

impl InsertionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertionState::Pending => "Pending",
            InsertionState::Committed => "Committed",
            InsertionState::Abandoned => "Abandoned",
        }
    }
}

stored_object!(PendingInsertion, "pending_insertion", {
    namespace: String,
    doc_id: String,
    /// Ids of every node the insertion is about to write
    node_ids: Vec<String>,
    state: InsertionState
});

impl PendingInsertion {
    pub fn new(namespace: String, doc_id: String, node_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            namespace,
            doc_id,
            node_ids,
            state: InsertionState::Pending,
        }
    }

    pub async fn set_state(
        id: &str,
        state: InsertionState,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing($table, $id) SET state = $state, updated_at = $now")
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("state", state.as_str()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Ids of every insertion that reached `Committed`.
    pub async fn committed_ids(db: &SurrealDbClient) -> Result<Vec<String>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE state = $state",
                Self::table_name()
            ))
            .bind(("state", InsertionState::Committed.as_str()))
            .await
            .map_err(AppError::Database)?;
        let committed: Vec<Self> = response.take(0).map_err(AppError::Database)?;

        Ok(committed.into_iter().map(|pending| pending.id).collect())
    }

    /// Insertions still `Pending` that were started before `cutoff`.
    pub async fn stale(
        cutoff: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE state = $state AND created_at < $cutoff ORDER BY created_at ASC",
                Self::table_name()
            ))
            .bind(("state", InsertionState::Pending.as_str()))
            .bind(("cutoff", SurrealDatetime::from(cutoff)))
            .await
            .map_err(AppError::Database)?;

        response.take(0).map_err(AppError::Database)
    }
}
