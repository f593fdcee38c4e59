use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentListing {
    pub id: String,
    pub preview: String,
}

/// Insertion-ordered `doc_id -> preview` cache of what has been indexed.
/// Overwriting an id keeps its original position.
#[derive(Debug, Default, Clone)]
pub struct DocumentRegistry {
    entries: Vec<DocumentListing>,
}

impl DocumentRegistry {
    pub fn contains(&self, doc_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == doc_id)
    }

    /// Returns `true` when an existing entry was overwritten.
    pub fn upsert(&mut self, doc_id: String, preview: String) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == doc_id) {
            entry.preview = preview;
            return true;
        }
        self.entries.push(DocumentListing { id: doc_id, preview });
        false
    }

    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = DocumentListing>) {
        self.entries.clear();
        for entry in entries {
            self.upsert(entry.id, entry.preview);
        }
    }

    pub fn list(&self) -> Vec<DocumentListing> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
