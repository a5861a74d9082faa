use crate::error::IngestError;
use crate::models::IngestionOutcome;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Expands folders into the PDFs they contain; plain files pass through.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(discover_pdf_files(input));
        } else {
            files.push(input.clone());
        }
    }

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            inputs
                .iter()
                .map(|input| input.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(files)
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    Ok(digest_bytes(&fs::read(path)?))
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub ingested: Vec<IngestionOutcome>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl IngestionReport {
    pub fn total_chunks(&self) -> usize {
        self.ingested.iter().map(|outcome| outcome.chunk_count).sum()
    }
}
