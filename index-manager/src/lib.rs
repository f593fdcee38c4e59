#![allow(clippy::missing_docs_in_private_items)]

pub mod events;
pub mod manager;
pub mod registry;
pub mod service;
pub mod snapshot;
pub mod worker;

pub use events::{AnswerStream, StreamEvent};
pub use manager::{IndexManager, ManagerTuning, ReconcileReport};
pub use registry::{DocumentListing, DocumentRegistry};
pub use service::{EventStream, InProcessIndex, IndexService, IndexSummary};
pub use snapshot::NamespaceIndex;
pub use worker::{Handoff, StreamingQueryWorker};

#[cfg(test)]
mod tests;
