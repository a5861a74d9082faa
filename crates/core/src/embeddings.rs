use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// One model instance serves both indexing and querying; vectors from
/// different models are not comparable.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Returns exactly one vector per input, in input order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::Shape(format!(
                "expected a single vector, got {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }
}

pub fn ensure_batch_shape(
    vectors: &[Vec<f32>],
    expected_len: usize,
    dimensions: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_len {
        return Err(EmbeddingError::Shape(format!(
            "{} vectors for {} inputs",
            vectors.len(),
            expected_len
        )));
    }
    if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimensions) {
        return Err(EmbeddingError::Shape(format!(
            "vector dimension {} != {}",
            vector.len(),
            dimensions
        )));
    }
    Ok(())
}

/// Hashed character trigrams, L2-normalized. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn model_name(&self) -> &str {
        "character-trigram"
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    /// Full URL of an OpenAI-compatible `/embeddings` route.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
}

/// Remote embedding model behind an OpenAI-compatible API.
pub struct HttpEmbedder {
    client: Client,
    config: HttpEmbedderConfig,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

fn order_embeddings(response: EmbeddingResponse) -> Vec<Vec<f32>> {
    let mut items = response
        .data
        .into_iter()
        .enumerate()
        .map(|(position, item)| (item.index.unwrap_or(position), item.embedding))
        .collect::<Vec<_>>();
    items.sort_by_key(|(index, _)| *index);
    items.into_iter().map(|(_, embedding)| embedding).collect()
}

/// Puts remote vectors back at the positions of the non-blank inputs; blank
/// inputs get a zero vector.
fn splice_embeddings(
    input_len: usize,
    positions: &[usize],
    embedded: Vec<Vec<f32>>,
    dimensions: usize,
) -> Vec<Vec<f32>> {
    let mut vectors = vec![vec![0.0; dimensions]; input_len];
    for (position, vector) in positions.iter().zip(embedded) {
        vectors[*position] = vector;
    }
    vectors
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let positions = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(position, _)| position)
            .collect::<Vec<_>>();
        if positions.is_empty() {
            return Ok(splice_embeddings(texts.len(), &[], Vec::new(), self.config.dimensions));
        }
        let inputs = positions
            .iter()
            .map(|position| texts[*position].as_str())
            .collect::<Vec<_>>();

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&json!({ "model": self.config.model, "input": inputs }));
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                details,
            });
        }

        let embedded = order_embeddings(response.json().await?);
        ensure_batch_shape(&embedded, inputs.len(), self.config.dimensions)?;
        Ok(splice_embeddings(
            texts.len(),
            &positions,
            embedded,
            self.config.dimensions,
        ))
    }
}
