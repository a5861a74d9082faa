use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_qa_core::llm::{DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
use pdf_qa_core::{
    AnswerSynthesizer, CharacterNgramEmbedder, DocumentEntry, DocumentRegistry, Embedder,
    GeminiClient, GeminiConfig, GenerationConfig, HttpEmbedder, HttpEmbedderConfig,
    InMemoryRegistry, LlmClient, LocalVectorStore, LopdfExtractor, PipelineOptions, QaPipeline,
    QdrantStore, UnavailableLlm, VectorIndex, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Local,
    Qdrant,
}

#[derive(Parser)]
#[command(name = "pdf-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of the local vector store
    #[arg(long, env = "PDF_QA_STORE_DIR", default_value = "./vector_store")]
    store_dir: PathBuf,

    /// Vector index backend
    #[arg(long, value_enum, default_value_t = Backend::Local)]
    backend: Backend,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "pdf_documents")]
    qdrant_collection: String,

    /// Chunk size in characters
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Characters repeated between consecutive chunks
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Gemini API key; without it answers use local sentence extraction
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// Generative Language API base URL
    #[arg(long, env = "GEMINI_ENDPOINT", default_value = DEFAULT_GEMINI_ENDPOINT)]
    gemini_endpoint: String,

    /// Sampling temperature
    #[arg(long, env = "TEMPERATURE", default_value = "0.2")]
    temperature: f32,

    /// Maximum output tokens
    #[arg(long, env = "MAX_TOKENS", default_value = "1024")]
    max_tokens: u32,

    /// OpenAI-compatible embeddings URL; the local n-gram embedder is used when unset
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Remote embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "all-MiniLM-L6-v2")]
    embedding_model: String,

    /// Remote embedding API key
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Embedding dimension
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest PDF files or folders into the vector store.
    Ingest {
        /// PDF files or folders searched recursively.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Answer a question from the ingested documents.
    Ask {
        /// Question to answer
        question: String,
        /// Restrict retrieval to one document (exact filename).
        #[arg(long)]
        source: Option<String>,
        /// Number of chunks to retrieve.
        #[arg(long, default_value = "5")]
        num_results: usize,
    },
    /// List documents known to the store.
    Files,
    /// Show store statistics and a sample of stored chunks.
    Status {
        /// Number of chunks to preview.
        #[arg(long, default_value = "3")]
        sample: usize,
    },
    /// Delete every stored chunk.
    Reset {
        /// Confirm the irreversible reset.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

fn build_embedder(cli: &Cli) -> Arc<dyn Embedder> {
    match &cli.embedding_endpoint {
        Some(endpoint) => Arc::new(HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: endpoint.clone(),
            model: cli.embedding_model.clone(),
            api_key: cli.embedding_api_key.clone(),
            dimensions: cli.embedding_dimensions,
        })),
        None => Arc::new(CharacterNgramEmbedder {
            dimensions: cli.embedding_dimensions,
        }),
    }
}

async fn build_index(cli: &Cli, embedder: &dyn Embedder) -> anyhow::Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match cli.backend {
        Backend::Local => Arc::new(
            LocalVectorStore::open(&cli.store_dir, embedder.model_name(), embedder.dimensions())
                .await
                .with_context(|| format!("opening store at {}", cli.store_dir.display()))?,
        ),
        Backend::Qdrant => {
            let store = QdrantStore::new(
                &cli.qdrant_url,
                &cli.qdrant_collection,
                embedder.dimensions(),
            )?;
            store.ensure_collection().await?;
            Arc::new(store)
        }
    };
    Ok(index)
}

fn build_llm(cli: &Cli) -> anyhow::Result<Arc<dyn LlmClient>> {
    let api_key = cli
        .gemini_api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty() && *key != "your_gemini_api_key_here");

    let llm: Arc<dyn LlmClient> = match api_key {
        Some(api_key) => Arc::new(GeminiClient::new(GeminiConfig {
            endpoint: cli.gemini_endpoint.clone(),
            model: cli.gemini_model.clone(),
            ..GeminiConfig::new(api_key)
        })?),
        None => {
            warn!("GEMINI_API_KEY not set, answers will use local extraction");
            Arc::new(UnavailableLlm {
                reason: "no GEMINI_API_KEY configured".to_string(),
            })
        }
    };
    Ok(llm)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder = build_embedder(&cli);
    let index = build_index(&cli, embedder.as_ref()).await?;
    let generation = GenerationConfig {
        temperature: cli.temperature,
        max_output_tokens: cli.max_tokens,
        ..GenerationConfig::default()
    };
    let synthesizer = AnswerSynthesizer::new(build_llm(&cli)?, generation);
    let options = PipelineOptions {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        ..PipelineOptions::default()
    };
    let pipeline = QaPipeline::new(
        Arc::new(LopdfExtractor),
        embedder,
        index.clone(),
        synthesizer,
        options,
    )?;

    // Uploads from earlier runs live only in the store, so rebuild the registry from it.
    let registry = InMemoryRegistry::from_source_counts(&index.source_counts().await?);
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        documents = registry.list().len(),
        "pdf-qa boot"
    );

    match cli.command {
        Command::Ingest { paths } => {
            let report = pipeline.ingest_paths(&paths).await?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                println!("error  {}: {}", skipped.path.display(), skipped.reason);
            }
            for outcome in &report.ingested {
                registry.register(DocumentEntry::from(outcome));
                println!("ok     {} ({} chunks)", outcome.filename, outcome.chunk_count);
            }

            println!(
                "{} chunks from {} file(s) ingested at {}",
                report.total_chunks(),
                report.ingested.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            question,
            source,
            num_results,
        } => {
            let answer = pipeline
                .ask(&question, source.as_deref(), Some(num_results), &registry)
                .await?;

            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                println!("sources: {}", answer.sources.join(", "));
                println!("chunks used: {}", answer.chunks_used);
            }
        }
        Command::Files => {
            for filename in registry.list() {
                let chunks = registry
                    .lookup(&filename)
                    .map(|entry| entry.chunk_count)
                    .unwrap_or_default();
                println!("{filename}\t{chunks} chunks");
            }
        }
        Command::Status { sample } => {
            let (count, sources) = pipeline.status().await?;
            println!("chunks in store: {count}");
            for source in sources {
                println!("- {}: {} chunks", source.source, source.chunks);
            }

            for (position, chunk) in index.sample(sample).await?.into_iter().enumerate() {
                let preview = chunk.text.chars().take(100).collect::<String>();
                println!("{}. source={} id={}", position + 1, chunk.metadata.source, chunk.id);
                println!("   {preview}...");
            }
        }
        Command::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete all stored chunks without --yes");
            }
            pipeline.reset().await?;
            println!("vector store reset");
        }
    }

    Ok(())
}
