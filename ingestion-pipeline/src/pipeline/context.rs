use common::{
    error::AppError,
    storage::{stores::StoreHandles, types::document_node::DocumentNode},
};
use tracing::error;

use super::{config::IngestionConfig, services::PipelineServices, IngestionRequest};
use crate::utils::file_text_extraction::LoadedDocument;

pub struct PipelineContext<'a> {
    pub request: &'a IngestionRequest,
    /// Id of the write-ahead record guarding this insertion
    pub insertion_id: String,
    pub stores: &'a StoreHandles,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub document: Option<LoadedDocument>,
    pub nodes: Vec<DocumentNode>,
    pub embeddings: Vec<Vec<f32>>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        request: &'a IngestionRequest,
        insertion_id: String,
        stores: &'a StoreHandles,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            request,
            insertion_id,
            stores,
            pipeline_config,
            services,
            document: None,
            nodes: Vec::new(),
            embeddings: Vec::new(),
        }
    }

    pub fn document(&self) -> Result<&LoadedDocument, AppError> {
        self.document
            .as_ref()
            .ok_or_else(|| AppError::InternalError("loaded document expected to be available".into()))
    }

    /// Leading characters of the document, used as its listing preview.
    pub fn preview(&self) -> String {
        self.document
            .as_ref()
            .map(|doc| {
                doc.text
                    .chars()
                    .take(self.pipeline_config.tuning.preview_chars)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            doc_id = %self.request.doc_id,
            namespace = %self.request.namespace,
            insertion_id = %self.insertion_id,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
