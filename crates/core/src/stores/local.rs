use crate::error::IndexError;
use crate::models::{IndexedRecord, QueryFilters, SearchHit, SourceCount, StoredChunk};
use crate::store::{count_sources, rank_records, UPSERT_BATCH_SIZE};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

const RECORDS_FILE: &str = "records.jsonl";
const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct StoreManifest {
    version: u32,
    model: String,
    dimensions: usize,
}

impl StoreManifest {
    fn describe(&self) -> String {
        format!("{} ({} dims)", self.model, self.dimensions)
    }
}

#[derive(Default)]
struct StoreState {
    records: Vec<IndexedRecord>,
    positions: HashMap<String, usize>,
}

impl StoreState {
    fn apply(&mut self, record: IndexedRecord) {
        match self.positions.get(&record.id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }
}

/// Directory-backed vector store. Records are appended to a JSON-lines log and
/// replayed on open; writes are serialized by the state lock.
pub struct LocalVectorStore {
    root: PathBuf,
    manifest: StoreManifest,
    state: RwLock<StoreState>,
}

impl LocalVectorStore {
    pub async fn open(
        root: impl Into<PathBuf>,
        model: &str,
        dimensions: usize,
    ) -> Result<Self, IndexError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let manifest = StoreManifest {
            version: MANIFEST_VERSION,
            model: model.to_string(),
            dimensions,
        };

        let manifest_path = root.join(MANIFEST_FILE);
        if fs::try_exists(&manifest_path).await? {
            let stored: StoreManifest =
                serde_json::from_str(&fs::read_to_string(&manifest_path).await?)?;
            if stored.model != manifest.model || stored.dimensions != manifest.dimensions {
                return Err(IndexError::ModelMismatch {
                    stored: stored.describe(),
                    requested: manifest.describe(),
                });
            }
        } else {
            fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?).await?;
        }

        let state = replay(&root.join(RECORDS_FILE), dimensions).await?;
        tracing::info!(
            path = %root.display(),
            records = state.records.len(),
            model,
            "opened local vector store"
        );

        Ok(Self {
            root,
            manifest,
            state: RwLock::new(state),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn records_path(&self) -> PathBuf {
        self.root.join(RECORDS_FILE)
    }
}

async fn replay(path: &Path, dimensions: usize) -> Result<StoreState, IndexError> {
    let mut state = StoreState::default();
    if !fs::try_exists(path).await? {
        return Ok(state);
    }

    let contents = fs::read_to_string(path).await?;
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IndexedRecord>(line) {
            Ok(record) if record.vector.len() == dimensions => state.apply(record),
            Ok(record) => tracing::warn!(
                line = line_no + 1,
                id = %record.id,
                dimension = record.vector.len(),
                "skipping record with wrong dimension"
            ),
            Err(error) => tracing::warn!(line = line_no + 1, %error, "skipping malformed record"),
        }
    }

    Ok(state)
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    async fn upsert(&self, records: &[IndexedRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            tracing::debug!("no records to add to the vector store");
            return Ok(());
        }

        if let Some(record) = records
            .iter()
            .find(|record| record.vector.len() != self.manifest.dimensions)
        {
            return Err(IndexError::Request(format!(
                "record {} has dimension {}, store expects {}",
                record.id,
                record.vector.len(),
                self.manifest.dimensions
            )));
        }

        let mut state = self.state.write().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.records_path())
            .await?;

        for (batch_no, batch) in records.chunks(UPSERT_BATCH_SIZE).enumerate() {
            let mut lines = Vec::new();
            for record in batch {
                serde_json::to_writer(&mut lines, record)?;
                lines.push(b'\n');
            }
            file.write_all(&lines).await?;
            file.flush().await?;

            for record in batch {
                state.apply(record.clone());
            }
            tracing::debug!(batch = batch_no + 1, size = batch.len(), "committed batch");
        }

        file.sync_data().await?;
        tracing::info!(
            added = records.len(),
            total = state.records.len(),
            "added records to vector store"
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let state = self.state.read().await;
        let hits = rank_records(&state.records, vector, k, filters);
        tracing::debug!(
            k,
            source = filters.source.as_deref(),
            found = hits.len(),
            "queried local store"
        );
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.state.read().await.records.len())
    }

    async fn source_counts(&self) -> Result<Vec<SourceCount>, IndexError> {
        let state = self.state.read().await;
        Ok(count_sources(
            state.records.iter().map(|record| record.metadata.source.as_str()),
        ))
    }

    async fn sample(&self, limit: usize) -> Result<Vec<StoredChunk>, IndexError> {
        let state = self.state.read().await;
        Ok(state.records.iter().take(limit).map(StoredChunk::from).collect())
    }

    async fn reset(&self) -> Result<(), IndexError> {
        let mut state = self.state.write().await;
        fs::write(self.records_path(), b"").await?;
        *state = StoreState::default();
        tracing::warn!(path = %self.root.display(), "vector store reset");
        Ok(())
    }
}
