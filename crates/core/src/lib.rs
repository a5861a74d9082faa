pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod selector;
pub mod store;
pub mod stores;
pub mod synthesis;
pub mod traits;

pub use chunking::{chunk_text, normalize_whitespace, split_sentences, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IndexError, IngestError, LlmError, PipelineError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{discover_pdf_files, expand_inputs, IngestionReport, SkippedPdf};
pub use llm::{GeminiClient, GeminiConfig, GenerationConfig, LlmClient, UnavailableLlm};
pub use models::{
    Answer, Chunk, DocumentEntry, IndexedRecord, IngestionOutcome, PipelineOptions,
    QueryFilters, RecordMetadata, SearchHit, SourceCount, StoredChunk,
};
pub use pipeline::QaPipeline;
pub use registry::{DocumentRegistry, InMemoryRegistry};
pub use selector::ContextSelector;
pub use stores::{LocalVectorStore, QdrantStore};
pub use synthesis::{AnswerSynthesizer, RetryPolicy, Sleeper, TokioSleeper};
pub use traits::VectorIndex;
