use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new datbase client
    ///
    /// # Arguments
    ///
    /// # Returns
    /// * `SurrealDbClient` initialized
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.build_indexes().await?;
        Ok(())
    }

    /// Lookup indexes for the namespace-scoped tables. Vector similarity is
    /// computed with an exact cosine scan per namespace, so no HNSW index is
    /// defined here.
    pub async fn build_indexes(&self) -> Result<(), Error> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_node_doc ON document_node FIELDS doc_id")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_index_node_namespace ON index_node FIELDS namespace")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_node_embedding_namespace ON node_embedding FIELDS namespace")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_pending_insertion_state ON pending_insertion FIELDS state")
            .await?;

        Ok(())
    }

    /// Cheap round trip used to check that the database answers.
    pub async fn ping(&self) -> Result<(), Error> {
        self.client.query("RETURN true").await?.check()?;
        Ok(())
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to store or replace an object under its id.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .upsert((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Every record of one table, in no particular order.
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::pending_insertion::{InsertionState, PendingInsertion};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_store_fetch_and_upsert_records() {
        let database = &Uuid::new_v4().to_string(); // ensures isolation per test run
        let db = SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");

        let pending = PendingInsertion::new("ns".into(), "doc".into(), vec!["n1".into()]);

        let stored = db.store_item(pending.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<PendingInsertion>(&pending.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched.map(|p| p.doc_id), Some("doc".to_string()));

        // Upsert replaces the whole record
        let committed = PendingInsertion {
            state: InsertionState::Committed,
            ..pending.clone()
        };
        db.upsert_item(committed).await.expect("Failed to upsert");

        let all = db
            .get_all_stored_items::<PendingInsertion>()
            .await
            .expect("Failed to fetch all");
        assert_eq!(all.len(), 1);
        assert_eq!(all.first().map(|p| p.state), Some(InsertionState::Committed));

        assert!(db
            .get_item::<PendingInsertion>("missing")
            .await
            .expect("Failed to fetch")
            .is_none());
    }

    #[tokio::test]
    async fn test_ping_and_build_indexes() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ping().await.expect("ping");
        db.build_indexes().await.expect("Failed to build indexes");
        // Idempotent
        db.build_indexes().await.expect("Failed to rebuild indexes");
    }
}
