use crate::models::SearchHit;

pub const MAX_CONTEXTS: usize = 5;

/// Keeps the highest-ranked hits in the order the index returned them. No
/// re-ranking.
#[derive(Debug, Clone, Copy)]
pub struct ContextSelector {
    pub max_contexts: usize,
}

impl Default for ContextSelector {
    fn default() -> Self {
        Self {
            max_contexts: MAX_CONTEXTS,
        }
    }
}

impl ContextSelector {
    pub fn select_hits<'a>(&self, question: &str, candidates: &'a [SearchHit]) -> &'a [SearchHit] {
        let kept = candidates.len().min(self.max_contexts);
        tracing::debug!(
            question,
            candidates = candidates.len(),
            kept,
            "selected contexts"
        );
        &candidates[..kept]
    }

    pub fn select(&self, question: &str, candidates: &[SearchHit]) -> Vec<String> {
        self.select_hits(question, candidates)
            .iter()
            .map(|hit| hit.text.clone())
            .collect()
    }
}
