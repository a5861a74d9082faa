use crate::models::{IndexedRecord, QueryFilters, SearchHit, SourceCount};
use std::collections::BTreeMap;

pub const UPSERT_BATCH_SIZE: usize = 100;

/// `1 - cosine similarity`; zero vectors and mismatched lengths sit at distance 1.
pub fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 1.0;
    }

    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm == 0.0 || right_norm == 0.0 {
        1.0
    } else {
        1.0 - dot / (left_norm * right_norm)
    }
}

/// Brute-force nearest neighbours. Ties keep insertion order.
pub fn rank_records<'a>(
    records: impl IntoIterator<Item = &'a IndexedRecord>,
    vector: &[f32],
    k: usize,
    filters: &QueryFilters,
) -> Vec<SearchHit> {
    if k == 0 {
        return Vec::new();
    }

    let mut hits = records
        .into_iter()
        .filter(|record| filters.matches(&record.metadata))
        .map(|record| SearchHit {
            text: record.text.clone(),
            metadata: record.metadata.clone(),
            distance: cosine_distance(vector, &record.vector),
        })
        .collect::<Vec<_>>();

    hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
    hits.truncate(k);
    hits
}

pub fn count_sources<'a>(sources: impl IntoIterator<Item = &'a str>) -> Vec<SourceCount> {
    let mut counts = BTreeMap::<&str, usize>::new();
    for source in sources {
        *counts.entry(source).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(source, chunks)| SourceCount {
            source: source.to_string(),
            chunks,
        })
        .collect()
}
