mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{error::AppError, storage::stores::StoreHandles};
use tracing::info;
use uuid::Uuid;

use self::{
    context::PipelineContext,
    stages::{embed, load, parse, persist},
    state::ready,
};

/// One document to index into one namespace.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub path: PathBuf,
    pub doc_id: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionOutcome {
    pub doc_id: String,
    pub insertion_id: String,
    pub node_count: usize,
    pub preview: String,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    stores: StoreHandles,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        stores: StoreHandles,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            stores,
            pipeline_config,
            services,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.pipeline_config
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Loads, parses, embeds and persists one document. Nothing written by a
    /// failed run is rolled back here.
    #[tracing::instrument(
        skip_all,
        fields(doc_id = %request.doc_id, namespace = %request.namespace)
    )]
    pub async fn ingest(&self, request: &IngestionRequest) -> Result<IngestionOutcome, AppError> {
        let mut ctx = PipelineContext::new(
            request,
            Uuid::new_v4().to_string(),
            &self.stores,
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let machine = ready();
        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = load(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let load_ms = Self::duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = parse(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let parse_ms = Self::duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = embed(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let embed_ms = Self::duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let _machine = persist(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_ms = Self::duration_millis(stage_start.elapsed());

        info!(
            doc_id = %request.doc_id,
            namespace = %request.namespace,
            node_count = ctx.nodes.len(),
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            load_ms,
            parse_ms,
            embed_ms,
            persist_ms,
            "ingestion pipeline finished"
        );

        Ok(IngestionOutcome {
            doc_id: request.doc_id.clone(),
            insertion_id: ctx.insertion_id.clone(),
            node_count: ctx.nodes.len(),
            preview: ctx.preview(),
        })
    }
}

#[cfg(test)]
mod tests;
