use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A span of normalized document text, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub size: usize,
}

impl Chunk {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        let text = text.into();
        let size = text.chars().count();
        Self {
            text,
            source: source.into(),
            size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordMetadata {
    pub source: String,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: RecordMetadata,
}

impl IndexedRecord {
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            vector,
            metadata: RecordMetadata {
                source: chunk.source,
                chunk_size: chunk.size,
            },
            text: chunk.text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct QueryFilters {
    pub source: Option<String>,
}

impl QueryFilters {
    pub fn by_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
        }
    }

    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        self.source
            .as_deref()
            .map_or(true, |source| metadata.source == source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub metadata: RecordMetadata,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceCount {
    pub source: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub filename: String,
    pub chunk_count: usize,
    pub checksum: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionOutcome {
    pub filename: String,
    pub chunk_count: usize,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
    pub chunks_used: usize,
}

impl Answer {
    pub fn without_sources(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
            chunks_used: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub default_top_k: usize,
    pub max_contexts: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            default_top_k: 5,
            max_contexts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: RecordMetadata,
}

impl From<&IndexedRecord> for StoredChunk {
    fn from(value: &IndexedRecord) -> Self {
        Self {
            id: value.id.clone(),
            text: value.text.clone(),
            metadata: value.metadata.clone(),
        }
    }
}
