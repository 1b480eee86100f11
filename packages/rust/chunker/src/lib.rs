//! Sliding-window document chunker.
//!
//! Splits document text into overlapping fixed-size windows measured in
//! characters. Window start advances by `chunk_size - overlap`; a window is
//! opened only while it would contribute at least one character beyond the
//! previous chunk's coverage, so a trailing window that is fully contained
//! in its predecessor is never emitted. For text of `L` characters this
//! yields exactly `ceil((L - overlap) / (chunk_size - overlap))` chunks.

use tracing::debug;

use handbookqa_shared::{Chunk, ChunkId, HandbookQaError, Result};

/// Chunking parameters. Invariant: `overlap < chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerOptions {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of one document.
    pub overlap: usize,
}

impl ChunkerOptions {
    /// Build validated options.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(HandbookQaError::validation("chunk_size must be positive"));
        }
        if overlap >= chunk_size {
            return Err(HandbookQaError::validation(format!(
                "overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 100,
        }
    }
}

/// Split `text` into overlapping chunks attributed to `document_url`.
///
/// Deterministic: the same input always yields the same chunk sequence,
/// with stable, monotonic sequence indexes and derived ids. Empty text
/// yields no chunks.
pub fn chunk_document(document_url: &str, text: &str, opts: &ChunkerOptions) -> Vec<Chunk> {
    // Byte offset of every char boundary, plus the end of the text, so
    // character-counted windows slice cleanly out of the UTF-8 buffer.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;

    if total_chars == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + opts.chunk_size).min(total_chars);
        let seq = chunks.len();
        chunks.push(Chunk {
            id: ChunkId::derive(document_url, seq),
            document_url: document_url.to_string(),
            seq,
            text: text[bounds[start]..bounds[end]].to_string(),
        });

        let next = start + opts.step();
        // The next window must reach past the previous chunk's coverage.
        if next + opts.overlap >= total_chars {
            break;
        }
        start = next;
    }

    debug!(
        document_url,
        chars = total_chars,
        chunks = chunks.len(),
        "chunked document"
    );

    chunks
}
