use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use common::{error::AppError, utils::embedding::EmbeddingProvider};

use crate::utils::{
    chunking::NodeParser,
    file_text_extraction::{DocumentLoader, LoadedDocument},
};

/// The work the pipeline stages delegate: reading, splitting and embedding.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn load_document(&self, path: &Path) -> Result<LoadedDocument, AppError>;

    fn parse_nodes(&self, document: &LoadedDocument) -> Result<Vec<String>, AppError>;

    async fn embed_nodes(
        &self,
        texts: Vec<String>,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, AppError>;
}

pub struct DefaultPipelineServices {
    loader: Arc<dyn DocumentLoader>,
    parser: Arc<dyn NodeParser>,
    embedding_provider: Arc<EmbeddingProvider>,
}

impl DefaultPipelineServices {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        parser: Arc<dyn NodeParser>,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        Self {
            loader,
            parser,
            embedding_provider,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn load_document(&self, path: &Path) -> Result<LoadedDocument, AppError> {
        self.loader.load(path).await
    }

    fn parse_nodes(&self, document: &LoadedDocument) -> Result<Vec<String>, AppError> {
        self.parser.parse(document)
    }

    async fn embed_nodes(
        &self,
        texts: Vec<String>,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size.max(1)) {
            embeddings.extend(self.embedding_provider.embed_batch(batch.to_vec()).await?);
        }

        Ok(embeddings)
    }
}
