//! Text chunking for the embedding pipeline.
//!
//! The default strategy splits prose into sentence-aware windows with
//! overlap: sentences are packed into windows up to a character budget, and
//! consecutive windows share the last few sentences so context survives the
//! cut.

use opennotes_domain::error::Result;

/// Configuration for the sentence-window chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Soft character budget per chunk.
    pub max_chars: usize,
    /// Skip fragments shorter than this (whitespace-trimmed).
    pub min_chars: usize,
    /// Number of trailing sentences repeated at the start of the next window.
    pub overlap_sentences: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            min_chars: 20,
            overlap_sentences: 1,
        }
    }
}

/// Sentence-aware window chunker with overlap.
#[derive(Debug, Clone, Default)]
pub struct SentenceWindowChunker {
    config: ChunkerConfig,
}

impl SentenceWindowChunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunk strings, in order.
    ///
    /// Empty and too-short inputs produce no chunks. A single sentence
    /// longer than the budget becomes its own chunk; sentences are never
    /// cut mid-way.
    pub fn chunk(&self, text: &str) -> Result<Vec<String>> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut window_len = 0usize;

        for sentence in &sentences {
            let sep = usize::from(!window.is_empty());
            if !window.is_empty() && window_len + sep + sentence.len() > self.config.max_chars {
                chunks.push(window.join(" "));

                let overlap_start = window.len().saturating_sub(self.config.overlap_sentences);
                window = window[overlap_start..].to_vec();
                window_len = window.iter().map(|s| s.len()).sum::<usize>()
                    + window.len().saturating_sub(1);
            }
            if !window.is_empty() {
                window_len += 1;
            }
            window_len += sentence.len();
            window.push(sentence);
        }

        if !window.is_empty() {
            let tail = window.join(" ");
            // The tail may be pure overlap of the previous chunk.
            if chunks.last().map(String::as_str) != Some(tail.as_str()) {
                chunks.push(tail);
            }
        }

        chunks.retain(|c| c.trim().len() >= self.config.min_chars);
        Ok(chunks)
    }
}

/// Split prose into trimmed sentences on `.`, `!`, `?` and newlines,
/// keeping the terminator attached.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, b) in bytes.iter().enumerate() {
        let boundary = matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).is_none_or(|next| next.is_ascii_whitespace());
        if boundary || *b == b'\n' {
            let end = if *b == b'\n' { i } else { i + 1 };
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
