use common::{
    error::AppError,
    storage::types::{
        document_node::DocumentNode,
        index_node_entry::IndexNodeEntry,
        node_embedding::NodeEmbedding,
        pending_insertion::{InsertionState, PendingInsertion},
    },
};
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use super::{
    context::PipelineContext,
    state::{Embedded, IngestionMachine, Loaded, Parsed, Persisted, Ready},
};

#[instrument(
    level = "trace",
    skip_all,
    fields(doc_id = %ctx.request.doc_id, namespace = %ctx.request.namespace)
)]
pub async fn load(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Loaded>, AppError> {
    let document = ctx.services.load_document(&ctx.request.path).await?;

    debug!(
        doc_id = %ctx.request.doc_id,
        kind = ?document.kind,
        text_chars = document.text.chars().count(),
        "document loaded"
    );

    ctx.document = Some(document);

    machine
        .load()
        .map_err(|(_, guard)| map_guard_error("load", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(doc_id = %ctx.request.doc_id, namespace = %ctx.request.namespace)
)]
pub async fn parse(
    machine: IngestionMachine<(), Loaded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Parsed>, AppError> {
    let fragments = ctx.services.parse_nodes(ctx.document()?)?;

    let mut nodes = Vec::with_capacity(fragments.len());
    for (position, text) in fragments.into_iter().enumerate() {
        let position = u32::try_from(position)
            .map_err(|_| AppError::Parse("document produced too many nodes".into()))?;
        nodes.push(DocumentNode::new(
            ctx.request.doc_id.clone(),
            ctx.request.namespace.clone(),
            ctx.insertion_id.clone(),
            position,
            text,
        ));
    }

    debug!(doc_id = %ctx.request.doc_id, node_count = nodes.len(), "document parsed");
    ctx.nodes = nodes;

    machine
        .parse()
        .map_err(|(_, guard)| map_guard_error("parse", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(doc_id = %ctx.request.doc_id, namespace = %ctx.request.namespace)
)]
pub async fn embed(
    machine: IngestionMachine<(), Parsed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let texts = ctx.nodes.iter().map(|node| node.text.clone()).collect();
    ctx.embeddings = ctx
        .services
        .embed_nodes(texts, ctx.pipeline_config.tuning.embedding_batch_size)
        .await?;
    if ctx.embeddings.len() != ctx.nodes.len() {
        return Err(AppError::Inference(format!(
            "received {} embeddings for {} nodes",
            ctx.embeddings.len(),
            ctx.nodes.len()
        )));
    }

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

/// Writes the insertion in a fixed order: write-ahead record, content,
/// membership, vectors, commit. A failure part way leaves the record
/// `Pending` for reconciliation to purge.
#[instrument(
    level = "trace",
    skip_all,
    fields(doc_id = %ctx.request.doc_id, namespace = %ctx.request.namespace)
)]
pub async fn persist(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    let request = ctx.request;
    let node_ids: Vec<String> = ctx.nodes.iter().map(|node| node.id.clone()).collect();

    let pending = PendingInsertion {
        id: ctx.insertion_id.clone(),
        ..PendingInsertion::new(
            request.namespace.clone(),
            request.doc_id.clone(),
            node_ids,
        )
    };
    ctx.stores.structure.begin_insertion(&pending).await?;

    ctx.stores.content.put_nodes(&ctx.nodes).await?;

    let members: Vec<IndexNodeEntry> = ctx
        .nodes
        .iter()
        .map(|node| {
            IndexNodeEntry::new(
                request.namespace.clone(),
                request.doc_id.clone(),
                node.id.clone(),
                ctx.insertion_id.clone(),
            )
        })
        .collect();
    ctx.stores.structure.add_members(&members).await?;

    let embeddings = std::mem::take(&mut ctx.embeddings);
    let vectors: Vec<NodeEmbedding> = ctx
        .nodes
        .iter()
        .zip(embeddings)
        .map(|(node, embedding)| {
            NodeEmbedding::new(
                node.id.clone(),
                request.doc_id.clone(),
                request.namespace.clone(),
                ctx.insertion_id.clone(),
                embedding,
            )
        })
        .collect();
    ctx.stores.vectors.add(vectors).await?;

    ctx.stores
        .structure
        .set_insertion_state(&ctx.insertion_id, InsertionState::Committed)
        .await?;

    debug!(
        doc_id = %request.doc_id,
        insertion_id = %ctx.insertion_id,
        node_count = ctx.nodes.len(),
        "insertion committed"
    );

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
