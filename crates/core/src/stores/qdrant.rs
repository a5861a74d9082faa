use crate::error::IndexError;
use crate::models::{IndexedRecord, QueryFilters, RecordMetadata, SearchHit, SourceCount, StoredChunk};
use crate::store::{count_sources, UPSERT_BATCH_SIZE};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use url::Url;

const SCROLL_PAGE: usize = 256;

/// Qdrant collection with cosine distance. Payload carries `source`,
/// `chunk_size` and `text`.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, IndexError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, path)
    }

    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.url("")).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.url(""))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;
        check(response).await?;
        tracing::info!(collection = %self.collection, "created qdrant collection");
        Ok(())
    }

    async fn scroll(&self, limit: usize, with_payload: Value) -> Result<Vec<Value>, IndexError> {
        let mut points = Vec::new();
        let mut offset = Value::Null;

        loop {
            let page = limit.saturating_sub(points.len()).min(SCROLL_PAGE);
            if page == 0 {
                break;
            }

            let mut body = json!({
                "limit": page,
                "with_payload": with_payload,
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.url("/points/scroll"))
                .json(&body)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                break;
            }
            let parsed = check(response).await?;

            let batch = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            points.extend(batch);

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() {
                break;
            }
        }

        Ok(points)
    }
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

async fn check(response: Response) -> Result<Value, IndexError> {
    if !response.status().is_success() {
        return Err(backend_error(response.status()));
    }
    Ok(response.json().await?)
}

pub(crate) fn point(record: &IndexedRecord) -> Value {
    json!({
        "id": record.id,
        "vector": record.vector,
        "payload": {
            "source": record.metadata.source,
            "chunk_size": record.metadata.chunk_size,
            "text": record.text,
        },
    })
}

pub(crate) fn search_body(vector: &[f32], k: usize, filters: &QueryFilters) -> Value {
    let mut body = json!({
        "vector": vector,
        "limit": k,
        "with_payload": true,
    });
    if let Some(source) = &filters.source {
        body["filter"] = json!({
            "must": [{ "key": "source", "match": { "value": source } }]
        });
    }
    body
}

fn metadata_of(point: &Value) -> RecordMetadata {
    RecordMetadata {
        source: point
            .pointer("/payload/source")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        chunk_size: point
            .pointer("/payload/chunk_size")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize,
    }
}

fn text_of(point: &Value) -> String {
    point
        .pointer("/payload/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Qdrant reports cosine similarity; convert to distance.
pub(crate) fn parse_search_hits(parsed: &Value) -> Vec<SearchHit> {
    parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|hit| SearchHit {
                    text: text_of(hit),
                    metadata: metadata_of(hit),
                    distance: 1.0 - hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), IndexError> {
        if let Some(record) = records
            .iter()
            .find(|record| record.vector.len() != self.vector_size)
        {
            return Err(IndexError::Request(format!(
                "embedding dimension {} != {}",
                record.vector.len(),
                self.vector_size
            )));
        }

        for (batch_no, batch) in records.chunks(UPSERT_BATCH_SIZE).enumerate() {
            let points = batch.iter().map(point).collect::<Vec<_>>();
            let response = self
                .client
                .put(self.url("/points?wait=true"))
                .json(&json!({ "points": points }))
                .send()
                .await?;
            check(response).await?;
            tracing::debug!(batch = batch_no + 1, size = batch.len(), "upserted qdrant batch");
        }

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.vector_size {
            return Err(IndexError::Request(format!(
                "query vector dim {} is not {}",
                vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(self.url("/points/search"))
            .json(&search_body(vector, k, filters))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let parsed = check(response).await?;
        Ok(parse_search_hits(&parsed))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let response = self
            .client
            .post(self.url("/points/count"))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }

        let parsed = check(response).await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize)
    }

    async fn source_counts(&self) -> Result<Vec<SourceCount>, IndexError> {
        let points = self.scroll(usize::MAX, json!(["source"])).await?;
        let sources = points.iter().map(metadata_of).collect::<Vec<_>>();
        Ok(count_sources(sources.iter().map(|metadata| metadata.source.as_str())))
    }

    async fn sample(&self, limit: usize) -> Result<Vec<StoredChunk>, IndexError> {
        let points = self.scroll(limit, Value::Bool(true)).await?;
        Ok(points
            .iter()
            .map(|point| StoredChunk {
                id: match point.pointer("/id") {
                    Some(Value::String(id)) => id.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                },
                text: text_of(point),
                metadata: metadata_of(point),
            })
            .collect())
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let response = self.client.delete(self.url("")).send().await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }
        tracing::warn!(collection = %self.collection, "qdrant collection dropped");
        self.ensure_collection().await
    }
}
