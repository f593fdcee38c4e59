use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use async_stream::stream;
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        stores::StoreHandles,
        types::pending_insertion::InsertionState,
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use futures::StreamExt;
use ingestion_pipeline::{
    DefaultPipelineServices, FileDocumentLoader, IngestionConfig, IngestionPipeline,
    IngestionRequest, PipelineServices, TextSplitterParser,
};
use retrieval_pipeline::{
    answer_retrieval::{stream_answer, synthesize_answer},
    Answer, LanguageModel, RetrievedNode, TokenStream,
};
use tokio::{sync::RwLock, time::Instant};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    events::{AnswerStream, StreamEvent},
    registry::{DocumentListing, DocumentRegistry},
    snapshot::NamespaceIndex,
};

#[derive(Debug, Clone)]
pub struct ManagerTuning {
    pub similarity_top_k: usize,
    pub query_timeout: Duration,
    /// Age after which a still-pending insertion is treated as crashed
    pub reconcile_grace: Duration,
}

impl Default for ManagerTuning {
    fn default() -> Self {
        Self {
            similarity_top_k: 1,
            query_timeout: Duration::from_secs(60),
            reconcile_grace: Duration::from_secs(300),
        }
    }
}

impl ManagerTuning {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            similarity_top_k: config.similarity_top_k.max(1),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            reconcile_grace: Duration::from_secs(config.reconcile_grace_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Insertions that were purged and marked abandoned
    pub abandoned: Vec<String>,
}

/// Owns the namespaced indexes of one process: activation, insertion,
/// querying and the document registry.
pub struct IndexManager {
    stores: StoreHandles,
    embedding_provider: Arc<EmbeddingProvider>,
    model: Arc<dyn LanguageModel>,
    pipeline: IngestionPipeline,
    tuning: ManagerTuning,
    snapshots: RwLock<HashMap<String, Arc<NamespaceIndex>>>,
    registry: RwLock<DocumentRegistry>,
}

impl IndexManager {
    pub fn new(
        stores: StoreHandles,
        embedding_provider: Arc<EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
        services: Arc<dyn PipelineServices>,
        ingestion: IngestionConfig,
        tuning: ManagerTuning,
    ) -> Self {
        Self {
            pipeline: IngestionPipeline::new(stores.clone(), ingestion, services),
            stores,
            embedding_provider,
            model,
            tuning,
            snapshots: RwLock::new(HashMap::new()),
            registry: RwLock::new(DocumentRegistry::default()),
        }
    }

    /// Wires the default file loader and character splitter from `config`.
    pub fn from_config(
        config: &AppConfig,
        stores: StoreHandles,
        embedding_provider: Arc<EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self, AppError> {
        let parser = TextSplitterParser::from_config(config)?;
        let services = DefaultPipelineServices::new(
            Arc::new(FileDocumentLoader),
            Arc::new(parser),
            Arc::clone(&embedding_provider),
        );

        Ok(Self::new(
            stores,
            embedding_provider,
            model,
            Arc::new(services),
            IngestionConfig::from_app_config(config),
            ManagerTuning::from_config(config),
        ))
    }

    pub fn tuning(&self) -> &ManagerTuning {
        &self.tuning
    }

    /// Builds a fresh snapshot of `namespace` from the three stores and makes
    /// it the active one.
    #[instrument(skip(self))]
    pub async fn activate_namespace(&self, namespace: &str) -> Result<Arc<NamespaceIndex>, AppError> {
        if namespace.trim().is_empty() {
            return Err(AppError::Validation("namespace must not be empty".into()));
        }

        self.stores.content.ping().await?;

        let signature = self.embedding_provider.signature()?;
        let structure = self
            .stores
            .structure
            .load_or_create(namespace, &signature)
            .await?;
        if structure.embedding_dimension != signature.dimension {
            return Err(AppError::Configuration(format!(
                "namespace '{namespace}' was built with {}-dimensional {} embeddings, \
                 the configured provider produces {} dimensions",
                structure.embedding_dimension, structure.embedding_backend, signature.dimension
            )));
        }
        if structure.embedding_backend != signature.backend {
            warn!(
                namespace,
                stored = %structure.embedding_backend,
                configured = %signature.backend,
                "namespace was built with a different embedding backend"
            );
        }

        let node_count = self.stores.vectors.count(namespace).await?;
        let member_count = self.stores.structure.member_count(namespace).await?;
        if member_count != node_count {
            warn!(
                namespace,
                member_count, node_count, "index membership and vectors disagree; a partial insertion may be pending"
            );
        }

        let snapshot = Arc::new(NamespaceIndex::new(
            namespace.to_owned(),
            structure,
            node_count,
            self.stores.clone(),
            Arc::clone(&self.embedding_provider),
        ));
        self.snapshots
            .write()
            .await
            .insert(namespace.to_owned(), Arc::clone(&snapshot));

        info!(namespace, node_count, "namespace activated");
        Ok(snapshot)
    }

    /// The active snapshot of `namespace`, activating it if there is none.
    pub async fn index_for(&self, namespace: &str) -> Result<Arc<NamespaceIndex>, AppError> {
        if let Some(snapshot) = self.snapshots.read().await.get(namespace) {
            return Ok(Arc::clone(snapshot));
        }
        self.activate_namespace(namespace).await
    }

    pub async fn active_snapshot(&self, namespace: &str) -> Option<Arc<NamespaceIndex>> {
        self.snapshots.read().await.get(namespace).cloned()
    }

    /// Indexes the file at `path` into the namespace named by its doc id and
    /// returns that id. The caller owns the file and may delete it afterwards.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn insert(&self, path: &Path, doc_id: Option<String>) -> Result<String, AppError> {
        let doc_id = doc_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let namespace = doc_id.clone();

        self.activate_namespace(&namespace).await?;

        if self.registry.read().await.contains(&doc_id) {
            // Earlier nodes of this document stay in the stores and remain retrievable
            warn!(doc_id = %doc_id, "document id already indexed; previous nodes are kept");
        }

        let outcome = self
            .pipeline
            .ingest(&IngestionRequest {
                path: path.to_path_buf(),
                doc_id: doc_id.clone(),
                namespace: namespace.clone(),
            })
            .await?;

        self.registry
            .write()
            .await
            .upsert(doc_id.clone(), outcome.preview);

        if let Err(err) = self.activate_namespace(&namespace).await {
            warn!(namespace = %namespace, error = %err, "snapshot refresh after insert failed");
            self.snapshots.write().await.remove(&namespace);
        }

        info!(doc_id = %doc_id, node_count = outcome.node_count, "document inserted");
        Ok(doc_id)
    }

    async fn retrieve_for(
        &self,
        text: &str,
        namespace: &str,
    ) -> Result<Vec<RetrievedNode>, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("query text must not be empty".into()));
        }

        let mut index = self.index_for(namespace).await?;
        if index.is_empty() {
            // Another writer may have filled the namespace since the snapshot was taken
            index = self.activate_namespace(namespace).await?;
        }
        if index.is_empty() {
            return Err(AppError::EmptyIndex(namespace.to_owned()));
        }

        let nodes = index.retrieve(text, self.tuning.similarity_top_k).await?;
        if nodes.is_empty() {
            return Err(AppError::EmptyIndex(namespace.to_owned()));
        }
        Ok(nodes)
    }

    pub async fn query(&self, text: &str, namespace: &str) -> Result<Answer, AppError> {
        self.query_with_timeout(text, namespace, self.tuning.query_timeout)
            .await
    }

    #[instrument(skip(self, text), fields(query_chars = text.chars().count()))]
    pub async fn query_with_timeout(
        &self,
        text: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<Answer, AppError> {
        tokio::time::timeout(timeout, async {
            let nodes = self.retrieve_for(text, namespace).await?;
            synthesize_answer(self.model.as_ref(), text, &nodes).await
        })
        .await
        .map_err(|_| AppError::InferenceTimeout(timeout))?
    }

    pub async fn query_stream(&self, text: &str, namespace: &str) -> Result<AnswerStream, AppError> {
        self.query_stream_with_timeout(text, namespace, self.tuning.query_timeout)
            .await
    }

    /// Failures before the first token are returned as `Err`; later ones end
    /// the stream with an `Error` sentinel. `timeout` covers the whole stream.
    #[instrument(skip(self, text), fields(query_chars = text.chars().count()))]
    pub async fn query_stream_with_timeout(
        &self,
        text: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<AnswerStream, AppError> {
        let deadline = Instant::now() + timeout;

        let tokens = tokio::time::timeout_at(deadline, async {
            let nodes = self.retrieve_for(text, namespace).await?;
            stream_answer(self.model.as_ref(), text, &nodes).await
        })
        .await
        .map_err(|_| AppError::InferenceTimeout(timeout))??;

        Ok(bounded_by_deadline(tokens, deadline, timeout))
    }

    pub async fn list_documents(&self) -> Vec<DocumentListing> {
        self.registry.read().await.list()
    }

    /// Repopulates the registry from the committed documents in the content
    /// store. Returns the number of documents found.
    #[instrument(skip(self))]
    pub async fn rebuild_registry(&self) -> Result<usize, AppError> {
        let preview_chars = self.pipeline_preview_chars();
        // Every stored fragment holds at least one character
        let max_fragments = u32::try_from(preview_chars).unwrap_or(u32::MAX);
        let heads = self.stores.content.document_heads(max_fragments).await?;

        let listings = heads.into_iter().map(|head| DocumentListing {
            preview: head.text.chars().take(preview_chars).collect(),
            id: head.doc_id,
        });

        let mut registry = self.registry.write().await;
        registry.replace_all(listings);
        info!(documents = registry.len(), "document registry rebuilt");
        Ok(registry.len())
    }

    fn pipeline_preview_chars(&self) -> usize {
        self.pipeline.config().tuning.preview_chars
    }

    /// Purges insertions that have been pending for longer than the grace
    /// period from all three stores and marks them abandoned.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport, AppError> {
        let grace = chrono::Duration::from_std(self.tuning.reconcile_grace)
            .map_err(|err| AppError::Configuration(format!("invalid reconcile grace: {err}")))?;
        let cutoff = Utc::now() - grace;

        let stale = self.stores.structure.stale_insertions(cutoff).await?;
        let mut report = ReconcileReport::default();

        for pending in stale {
            // Vectors go first so that a half-purged insertion is never retrieved
            self.stores.vectors.purge_insertion(&pending.id).await?;
            self.stores.structure.purge_insertion(&pending.id).await?;
            self.stores.content.purge_insertion(&pending.id).await?;
            self.stores
                .structure
                .set_insertion_state(&pending.id, InsertionState::Abandoned)
                .await?;

            warn!(
                insertion_id = %pending.id,
                doc_id = %pending.doc_id,
                namespace = %pending.namespace,
                nodes = pending.node_ids.len(),
                "abandoned partial insertion"
            );

            self.snapshots.write().await.remove(&pending.namespace);
            report.abandoned.push(pending.id);
        }

        Ok(report)
    }
}

fn bounded_by_deadline(
    mut tokens: TokenStream,
    deadline: Instant,
    timeout: Duration,
) -> AnswerStream {
    stream! {
        loop {
            match tokio::time::timeout_at(deadline, tokens.next()).await {
                Ok(Some(Ok(token))) => yield StreamEvent::chunk(token),
                Ok(Some(Err(err))) => {
                    yield StreamEvent::from_error(&err);
                    break;
                }
                Ok(None) => {
                    yield StreamEvent::End;
                    break;
                }
                Err(_) => {
                    yield StreamEvent::from_error(&AppError::InferenceTimeout(timeout));
                    break;
                }
            }
        }
    }
    .boxed()
}
