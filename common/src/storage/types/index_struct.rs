use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(IndexStruct, "index_struct", {
    namespace: String,
    /// Embedding backend the namespace was built with
    embedding_backend: String,
    embedding_model: Option<String>,
    embedding_dimension: u32
});

/// Which embedding produced a namespace's vectors. Vectors from different
/// signatures are not comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSignature {
    pub backend: String,
    pub model: Option<String>,
    pub dimension: u32,
}

impl IndexStruct {
    pub fn new(namespace: &str, signature: &EmbeddingSignature) -> Self {
        let now = Utc::now();
        Self {
            // One structure per namespace, keyed by the namespace itself
            id: namespace.to_owned(),
            created_at: now,
            updated_at: now,
            namespace: namespace.to_owned(),
            embedding_backend: signature.backend.clone(),
            embedding_model: signature.model.clone(),
            embedding_dimension: signature.dimension,
        }
    }

    pub fn signature(&self) -> EmbeddingSignature {
        EmbeddingSignature {
            backend: self.embedding_backend.clone(),
            model: self.embedding_model.clone(),
            dimension: self.embedding_dimension,
        }
    }

    /// Returns the stored structure for `namespace`, creating it with
    /// `signature` when the namespace has never been activated.
    pub async fn load_or_create(
        namespace: &str,
        signature: &EmbeddingSignature,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if let Some(existing) = db.get_item::<Self>(namespace).await? {
            return Ok(existing);
        }

        let created = Self::new(namespace, signature);
        db.upsert_item(created.clone()).await?;
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn signature(dimension: u32) -> EmbeddingSignature {
        EmbeddingSignature {
            backend: "hashed".into(),
            model: None,
            dimension,
        }
    }

    #[tokio::test]
    async fn test_load_or_create_keeps_first_signature() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let created = IndexStruct::load_or_create("tenant", &signature(8), &db)
            .await
            .expect("create");
        assert_eq!(created.id, "tenant");

        let loaded = IndexStruct::load_or_create("tenant", &signature(16), &db)
            .await
            .expect("load");
        assert_eq!(loaded.signature(), signature(8));
    }
}
