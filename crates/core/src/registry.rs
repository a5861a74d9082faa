use crate::models::{DocumentEntry, IngestionOutcome, SourceCount};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Known documents, keyed by exact filename. Owned by the serving layer; the
/// pipeline only reads it to validate source filters.
pub trait DocumentRegistry: Send + Sync {
    fn register(&self, entry: DocumentEntry);

    fn lookup(&self, filename: &str) -> Option<DocumentEntry>;

    fn list(&self) -> Vec<String>;

    fn is_empty(&self) -> bool {
        self.list().is_empty()
    }
}

impl DocumentEntry {
    pub fn new(filename: impl Into<String>, chunk_count: usize) -> Self {
        Self {
            filename: filename.into(),
            chunk_count,
            checksum: None,
            registered_at: Utc::now(),
        }
    }
}

impl From<&IngestionOutcome> for DocumentEntry {
    fn from(value: &IngestionOutcome) -> Self {
        Self {
            checksum: Some(value.checksum.clone()),
            ..Self::new(value.filename.clone(), value.chunk_count)
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: RwLock<BTreeMap<String, DocumentEntry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds entries from what a persisted index already holds.
    pub fn from_source_counts(counts: &[SourceCount]) -> Self {
        let registry = Self::new();
        for count in counts {
            registry.register(DocumentEntry::new(count.source.clone(), count.chunks));
        }
        registry
    }
}

impl DocumentRegistry for InMemoryRegistry {
    fn register(&self, entry: DocumentEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.filename.clone(), entry);
    }

    fn lookup(&self, filename: &str) -> Option<DocumentEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(filename).cloned()
    }

    fn list(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }
}
