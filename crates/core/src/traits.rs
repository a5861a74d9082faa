use crate::error::IndexError;
use crate::models::{IndexedRecord, QueryFilters, SearchHit, SourceCount, StoredChunk};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Persists records in batches. A failure part-way through leaves earlier
    /// batches committed.
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), IndexError>;

    /// Up to `k` records ordered by ascending cosine distance. An empty store or
    /// a filter that matches nothing yields an empty list.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<SearchHit>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    async fn source_counts(&self) -> Result<Vec<SourceCount>, IndexError>;

    async fn sample(&self, limit: usize) -> Result<Vec<StoredChunk>, IndexError>;

    /// Deletes every stored record.
    async fn reset(&self) -> Result<(), IndexError>;
}
