#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod pipeline;
pub mod utils;

pub use pipeline::{
    DefaultPipelineServices, IngestionConfig, IngestionOutcome, IngestionPipeline,
    IngestionRequest, IngestionTuning, PipelineServices,
};
pub use utils::{
    chunking::{NodeParser, TextSplitterParser},
    file_text_extraction::{DocumentKind, DocumentLoader, FileDocumentLoader, LoadedDocument},
};
