use crate::error::IngestError;
use crate::models::Chunk;

/// Paragraph units below this count fall back to sentence units.
const MIN_PARAGRAPH_UNITS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 200,
        }
    }
}

impl From<&crate::models::PipelineOptions> for ChunkingConfig {
    fn from(value: &crate::models::PipelineOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits on blank lines. Whitespace-normalized text has none, so it comes back
/// as a single unit.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        paragraphs.push(current.join("\n").trim().to_string());
    }

    paragraphs.retain(|paragraph| !paragraph.is_empty());
    paragraphs
}

/// Splits after `.`, `!` or `?` when followed by whitespace. Punctuation stays
/// with its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        let boundary = matches!(ch, '.' | '!' | '?')
            && chars.peek().is_some_and(|next| next.is_whitespace());
        if boundary {
            push_trimmed(&mut sentences, &current);
            current.clear();
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
        }
    }

    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(target: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        target.push(trimmed.to_string());
    }
}

fn placeholder(source: &str) -> Chunk {
    Chunk::new(format!("[No processable content in document: {source}]"), source)
}

fn tail_chars(text: &str, count: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(count)).collect()
}

/// Splits `text` into overlapping chunks of roughly `config.chunk_size`
/// characters. Units are never cut, so a single long sentence may produce an
/// oversized chunk.
pub fn chunk_text(
    text: &str,
    source: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        tracing::warn!(source, "no processable text, emitting placeholder chunk");
        return Ok(vec![placeholder(source)]);
    }

    let normalized_len = normalized.chars().count();
    if normalized_len < config.chunk_size {
        tracing::debug!(source, length = normalized_len, "text fits in a single chunk");
        return Ok(vec![Chunk::new(normalized, source)]);
    }

    let mut units = split_paragraphs(&normalized);
    if units.len() < MIN_PARAGRAPH_UNITS {
        tracing::debug!(source, paragraphs = units.len(), "few paragraphs, splitting by sentence");
        units = split_sentences(&normalized);
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for unit in units {
        let unit_len = unit.chars().count();

        if current_len + unit_len > config.chunk_size && current_len > 0 {
            let closed = std::mem::take(&mut current);
            if config.overlap > 0 && current_len > config.overlap {
                current = tail_chars(&closed, config.overlap);
                current.push(' ');
            }
            current.push_str(&unit);
            current_len = current.chars().count();
            chunks.push(Chunk::new(closed, source));
        } else {
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(&unit);
            current_len += unit_len;
        }
    }

    if !current.is_empty() {
        chunks.push(Chunk::new(current, source));
    }

    if chunks.is_empty() {
        chunks.push(placeholder(source));
    }

    tracing::debug!(source, chunk_count = chunks.len(), "chunked document");
    Ok(chunks)
}
