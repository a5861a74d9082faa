use crate::chunking::{chunk_text, ChunkingConfig};
use crate::embeddings::{ensure_batch_shape, Embedder};
use crate::error::{IngestError, PipelineError};
use crate::extractor::{file_name, PdfExtractor};
use crate::ingest::{digest_bytes, digest_file, expand_inputs, IngestionReport, SkippedPdf};
use crate::models::{
    Answer, IndexedRecord, IngestionOutcome, PipelineOptions, QueryFilters, SourceCount,
};
use crate::registry::DocumentRegistry;
use crate::selector::ContextSelector;
use crate::synthesis::AnswerSynthesizer;
use crate::traits::VectorIndex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const UPLOAD_FIRST_MESSAGE: &str = "Please upload some PDF documents first.";
pub const NO_RELEVANT_CHUNKS_MESSAGE: &str = "No relevant information found in the uploaded documents. Try uploading more PDFs or rephrasing your question.";

/// Ingestion and query paths over one shared embedder and index.
pub struct QaPipeline {
    extractor: Arc<dyn PdfExtractor>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    selector: ContextSelector,
    synthesizer: AnswerSynthesizer,
    options: PipelineOptions,
}

impl QaPipeline {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        synthesizer: AnswerSynthesizer,
        options: PipelineOptions,
    ) -> Result<Self, IngestError> {
        ChunkingConfig::from(&options).validate()?;
        Ok(Self {
            extractor,
            embedder,
            index,
            selector: ContextSelector {
                max_contexts: options.max_contexts,
            },
            synthesizer,
            options,
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Digest and PDF parsing run on the blocking pool.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestionOutcome, PipelineError> {
        let filename = file_name(path)?;
        let extractor = Arc::clone(&self.extractor);
        let path = path.to_path_buf();
        let (checksum, text) =
            tokio::task::spawn_blocking(move || -> Result<_, IngestError> {
                Ok((digest_file(&path)?, extractor.extract_text(&path)?))
            })
            .await
            .map_err(IngestError::from)??;
        self.ingest_text(&filename, &text, checksum).await
    }

    pub async fn ingest_bytes(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<IngestionOutcome, PipelineError> {
        let extractor = Arc::clone(&self.extractor);
        let name = filename.to_string();
        let bytes = bytes.to_vec();
        let (checksum, text) =
            tokio::task::spawn_blocking(move || -> Result<_, IngestError> {
                Ok((digest_bytes(&bytes), extractor.extract_bytes(&name, &bytes)?))
            })
            .await
            .map_err(IngestError::from)??;
        self.ingest_text(filename, &text, checksum).await
    }

    /// Chunks, embeds and stores already-extracted text under `filename`.
    pub async fn ingest_text(
        &self,
        filename: &str,
        text: &str,
        checksum: String,
    ) -> Result<IngestionOutcome, PipelineError> {
        let chunks = chunk_text(text, filename, ChunkingConfig::from(&self.options))?;
        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();

        let vectors = self.embedder.embed_many(&texts).await?;
        ensure_batch_shape(&vectors, texts.len(), self.embedder.dimensions())?;

        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedRecord::from_chunk(chunk, vector))
            .collect::<Vec<_>>();
        self.index.upsert(&records).await?;

        tracing::info!(filename, chunk_count = records.len(), "ingested document");
        Ok(IngestionOutcome {
            filename: filename.to_string(),
            chunk_count: records.len(),
            checksum,
        })
    }

    /// Best effort over many files: a failing document is recorded and skipped.
    pub async fn ingest_paths(&self, inputs: &[PathBuf]) -> Result<IngestionReport, IngestError> {
        let files = expand_inputs(inputs)?;
        let mut report = IngestionReport::default();

        for path in files {
            match self.ingest_file(&path).await {
                Ok(outcome) => report.ingested.push(outcome),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipped pdf");
                    report.skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Unknown source names degrade to an unfiltered query.
    pub fn resolve_filter(
        &self,
        source_filter: Option<&str>,
        registry: &dyn DocumentRegistry,
    ) -> QueryFilters {
        let Some(requested) = source_filter.map(str::trim).filter(|name| !name.is_empty()) else {
            return QueryFilters::default();
        };

        match registry.lookup(requested) {
            Some(entry) => QueryFilters::by_source(entry.filename),
            None => {
                tracing::warn!(
                    source = requested,
                    available = ?registry.list(),
                    "source filter not found, searching all documents"
                );
                QueryFilters::default()
            }
        }
    }

    pub async fn ask(
        &self,
        question: &str,
        source_filter: Option<&str>,
        top_k: Option<usize>,
        registry: &dyn DocumentRegistry,
    ) -> Result<Answer, PipelineError> {
        if registry.is_empty() {
            return Ok(Answer::without_sources(UPLOAD_FIRST_MESSAGE));
        }

        let k = top_k.unwrap_or(self.options.default_top_k);
        let filters = self.resolve_filter(source_filter, registry);
        tracing::info!(question, k, source = filters.source.as_deref(), "answering question");

        let vector = self.embedder.embed(question).await?;
        let hits = match self.index.query(&vector, k, &filters).await {
            Ok(hits) => hits,
            Err(error) => {
                tracing::error!(%error, "vector query failed, continuing without context");
                Vec::new()
            }
        };

        if hits.is_empty() {
            return Ok(Answer::without_sources(NO_RELEVANT_CHUNKS_MESSAGE));
        }

        let selected = self.selector.select_hits(question, &hits);
        let contexts = selected
            .iter()
            .map(|hit| hit.text.clone())
            .collect::<Vec<_>>();
        let sources = selected
            .iter()
            .map(|hit| hit.metadata.source.clone())
            .collect::<BTreeSet<_>>();

        let answer = self.synthesizer.synthesize(question, &contexts).await;
        Ok(Answer {
            answer,
            sources: sources.into_iter().collect(),
            chunks_used: contexts.len(),
        })
    }

    pub async fn status(&self) -> Result<(usize, Vec<SourceCount>), PipelineError> {
        Ok((self.index.count().await?, self.index.source_counts().await?))
    }

    pub async fn reset(&self) -> Result<(), PipelineError> {
        Ok(self.index.reset().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::{IndexError, LlmError};
    use crate::llm::{GenerationConfig, LlmClient, UnavailableLlm};
    use crate::models::{DocumentEntry, SearchHit, StoredChunk};
    use crate::registry::InMemoryRegistry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeExtractor {
        texts: HashMap<String, String>,
    }

    impl PdfExtractor for FakeExtractor {
        fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
            self.extract_bytes(&file_name(path)?, &[])
        }

        fn extract_bytes(&self, filename: &str, _bytes: &[u8]) -> Result<String, IngestError> {
            self.texts
                .get(filename)
                .cloned()
                .ok_or_else(|| IngestError::PdfParse(format!("cannot open {filename}")))
        }
    }

    #[derive(Default)]
    struct MemoryIndex {
        records: Mutex<Vec<IndexedRecord>>,
        fail_queries: bool,
    }

    #[async_trait]
    impl VectorIndex for MemoryIndex {
        async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), IndexError> {
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        async fn query(
            &self,
            vector: &[f32],
            k: usize,
            filters: &QueryFilters,
        ) -> Result<Vec<SearchHit>, IndexError> {
            if self.fail_queries {
                return Err(IndexError::Request("offline".to_string()));
            }
            let records = self.records.lock().unwrap();
            Ok(crate::store::rank_records(records.iter(), vector, k, filters))
        }

        async fn count(&self) -> Result<usize, IndexError> {
            Ok(self.records.lock().unwrap().len())
        }

        async fn source_counts(&self) -> Result<Vec<SourceCount>, IndexError> {
            let records = self.records.lock().unwrap();
            Ok(crate::store::count_sources(
                records.iter().map(|record| record.metadata.source.as_str()),
            ))
        }

        async fn sample(&self, limit: usize) -> Result<Vec<StoredChunk>, IndexError> {
            let records = self.records.lock().unwrap();
            Ok(records.iter().take(limit).map(StoredChunk::from).collect())
        }

        async fn reset(&self) -> Result<(), IndexError> {
            self.records.lock().unwrap().clear();
            Ok(())
        }
    }

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String, LlmError> {
            Ok(format!("echo: {}", prompt.lines().count()))
        }
    }

    fn pipeline_with(index: Arc<MemoryIndex>, llm: Arc<dyn LlmClient>) -> QaPipeline {
        let texts = HashMap::from([
            (
                "cats.pdf".to_string(),
                "Cats are mammals. Cats purr when content.".to_string(),
            ),
            (
                "pumps.pdf".to_string(),
                "Hydraulic pumps move fluid under pressure.".to_string(),
            ),
        ]);
        QaPipeline::new(
            Arc::new(FakeExtractor { texts }),
            Arc::new(CharacterNgramEmbedder::default()),
            index,
            AnswerSynthesizer::new(llm, GenerationConfig::default()),
            PipelineOptions::default(),
        )
        .expect("default options are valid")
    }

    fn unavailable() -> Arc<dyn LlmClient> {
        Arc::new(UnavailableLlm {
            reason: "tests".to_string(),
        })
    }

    #[tokio::test]
    async fn ask_without_documents_asks_for_uploads() {
        let pipeline = pipeline_with(Arc::new(MemoryIndex::default()), unavailable());
        let answer = pipeline
            .ask("What are cats?", None, None, &InMemoryRegistry::new())
            .await
            .unwrap();
        assert_eq!(answer.answer, UPLOAD_FIRST_MESSAGE);
        assert_eq!(answer.chunks_used, 0);
    }

    #[tokio::test]
    async fn filtered_question_uses_only_that_document() {
        let index = Arc::new(MemoryIndex::default());
        let pipeline = pipeline_with(index.clone(), Arc::new(EchoLlm));
        let registry = InMemoryRegistry::new();

        for name in ["cats.pdf", "pumps.pdf"] {
            let outcome = pipeline.ingest_bytes(name, b"%PDF").await.unwrap();
            assert_eq!(outcome.chunk_count, 1);
            registry.register(DocumentEntry::from(&outcome));
        }

        let answer = pipeline
            .ask("How do pumps work?", Some("pumps.pdf"), None, &registry)
            .await
            .unwrap();
        assert_eq!(answer.sources, vec!["pumps.pdf".to_string()]);
        assert_eq!(answer.chunks_used, 1);
        assert!(answer.answer.starts_with("echo:"));

        let unfiltered = pipeline
            .ask("How do pumps work?", None, None, &registry)
            .await
            .unwrap();
        assert_eq!(unfiltered.chunks_used, 2);
        assert_eq!(
            unfiltered.sources,
            vec!["cats.pdf".to_string(), "pumps.pdf".to_string()]
        );
    }

    #[tokio::test]
    async fn query_failures_degrade_to_no_results() {
        let index = Arc::new(MemoryIndex {
            fail_queries: true,
            ..MemoryIndex::default()
        });
        let pipeline = pipeline_with(index, unavailable());
        let registry = InMemoryRegistry::new();
        registry.register(DocumentEntry::new("cats.pdf", 1));

        let answer = pipeline
            .ask("What are cats?", None, None, &registry)
            .await
            .unwrap();
        assert_eq!(answer.answer, NO_RELEVANT_CHUNKS_MESSAGE);
    }

    #[tokio::test]
    async fn failing_documents_are_skipped_in_batches() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let good = dir.path().join("cats.pdf");
        let bad = dir.path().join("unknown.pdf");
        std::fs::write(&good, b"%PDF")?;
        std::fs::write(&bad, b"%PDF")?;

        let index = Arc::new(MemoryIndex::default());
        let pipeline = pipeline_with(index.clone(), unavailable());
        let report = pipeline.ingest_paths(&[dir.path().to_path_buf()]).await?;

        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.ingested[0].filename, "cats.pdf");
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(report.total_chunks(), 1);
        assert_eq!(index.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn reset_clears_the_index() {
        let index = Arc::new(MemoryIndex::default());
        let pipeline = pipeline_with(index, unavailable());
        pipeline.ingest_bytes("cats.pdf", b"%PDF").await.unwrap();

        let (count, sources) = pipeline.status().await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(sources[0].source, "cats.pdf");

        pipeline.reset().await.unwrap();
        assert_eq!(pipeline.status().await.unwrap().0, 0);
    }

    #[derive(Default)]
    struct ThreadRecordingExtractor {
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl PdfExtractor for ThreadRecordingExtractor {
        fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
            self.extract_bytes(&file_name(path)?, &[])
        }

        fn extract_bytes(&self, _filename: &str, _bytes: &[u8]) -> Result<String, IngestError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok("Valves regulate the direction of flow.".to_string())
        }
    }

    #[tokio::test]
    async fn extraction_runs_off_the_runtime_thread() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("valves.pdf");
        std::fs::write(&path, b"%PDF")?;

        let extractor = Arc::new(ThreadRecordingExtractor::default());
        let pipeline = QaPipeline::new(
            extractor.clone(),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(MemoryIndex::default()),
            AnswerSynthesizer::new(unavailable(), GenerationConfig::default()),
            PipelineOptions::default(),
        )?;

        let from_file = pipeline.ingest_file(&path).await?;
        let from_bytes = pipeline.ingest_bytes("valves.pdf", b"%PDF").await?;
        assert_eq!(from_file.checksum, from_bytes.checksum);

        let runtime_thread = std::thread::current().id();
        let threads = extractor.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|thread| *thread != runtime_thread));
        Ok(())
    }

    #[test]
    fn invalid_chunking_options_are_rejected() {
        let result = QaPipeline::new(
            Arc::new(FakeExtractor {
                texts: HashMap::new(),
            }),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(MemoryIndex::default()),
            AnswerSynthesizer::new(unavailable(), GenerationConfig::default()),
            PipelineOptions {
                chunk_overlap: 1_000,
                ..PipelineOptions::default()
            },
        );
        assert!(result.is_err());
    }
}
