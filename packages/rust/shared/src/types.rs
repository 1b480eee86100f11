//! Core domain types for the HandbookQA retrieval pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

// ---------------------------------------------------------------------------
// ChunkId
// ---------------------------------------------------------------------------

/// Deterministic chunk identifier: `<url-hash>-<seq>`.
///
/// Derived from the document URL and the chunk's sequence index, so an
/// identical re-ingestion run reproduces the same ids and upserts stay
/// idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    /// Derive the id for chunk `seq` of the document at `document_url`.
    pub fn derive(document_url: &str, seq: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(document_url.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(format!("{}-{seq:04}", &digest[..12]))
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ChunkId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Ingestion-time types
// ---------------------------------------------------------------------------

/// A fetched source document, reduced to plain text.
///
/// Exists only for the duration of an ingestion batch; chunks are derived
/// from it and the document itself is discarded.
#[derive(Debug, Clone)]
pub struct Document {
    /// Source URL the text was fetched from.
    pub url: Url,
    /// Extracted plain text.
    pub text: String,
}

/// A bounded, overlapping window of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier, unique within a store.
    pub id: ChunkId,
    /// URL of the originating document.
    pub document_url: String,
    /// 0-based position of this chunk within its document.
    pub seq: usize,
    /// Window text, at most `chunk_size` characters.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Store types
// ---------------------------------------------------------------------------

/// The persisted unit of the vector store, keyed by `chunk_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk_id: ChunkId,
    pub document_url: String,
    pub seq: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Tag identifying what a persisted store was built with.
///
/// A store whose tag does not match the active configuration must be
/// refused on load and rebuilt via explicit re-ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Embedding vector dimension shared by all records.
    pub dimensions: usize,
    /// Embedding model identifier the vectors were produced with.
    pub model_version: String,
    /// Fingerprint of the configured document set and chunking parameters.
    pub corpus_fingerprint: String,
}

/// A retrieval hit: a stored record plus its similarity to the query.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub record: VectorRecord,
    /// Cosine similarity in `[-1, 1]`, higher is more similar.
    pub score: f32,
}

/// Fingerprint over the embedding model, chunking parameters, and sorted
/// source URL list. Changing any of them invalidates a persisted store.
pub fn corpus_fingerprint(
    embedding_model: &str,
    chunk_size: usize,
    overlap: usize,
    urls: &[String],
) -> String {
    let mut sorted: Vec<&str> = urls.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(embedding_model.as_bytes());
    hasher.update(chunk_size.to_le_bytes());
    hasher.update(overlap.to_le_bytes());
    for url in sorted {
        hasher.update(url.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// One cited source backing an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSource {
    /// Originating document URL.
    pub source: String,
    /// Exact chunk text that was placed in the prompt.
    pub content: String,
}

/// A synthesized answer with its supporting sources, in prompt order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<AnswerSource>,
}

/// Outcome marker for the transport-facing envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
}

/// The serializable envelope handed to the outer transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<AnswerSource>,
    pub status: QueryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    /// Successful outcome wrapping an [`Answer`].
    pub fn success(answer: Answer) -> Self {
        Self {
            answer: answer.text,
            sources: answer.sources,
            status: QueryStatus::Success,
            error: None,
        }
    }

    /// Error outcome with a caller-facing message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            answer: String::new(),
            sources: Vec::new(),
            status: QueryStatus::Error,
            error: Some(message.into()),
        }
    }
}

/// Summary of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestionReport {
    /// Documents fetched and extracted successfully.
    pub documents_fetched: usize,
    /// Documents that failed to fetch (logged and skipped).
    pub documents_failed: usize,
    /// Chunks embedded and written to the store.
    pub chunks_embedded: usize,
    /// True when a matching persisted store made ingestion unnecessary.
    pub skipped: bool,
    /// Wall-clock time of the run.
    pub elapsed: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic() {
        let a = ChunkId::derive("https://example.com/handbook", 0);
        let b = ChunkId::derive("https://example.com/handbook", 0);
        assert_eq!(a, b);

        let c = ChunkId::derive("https://example.com/handbook", 1);
        assert_ne!(a, c);

        let d = ChunkId::derive("https://example.com/other", 0);
        assert_ne!(a, d);
    }

    #[test]
    fn chunk_id_format() {
        let id = ChunkId::derive("https://example.com/handbook", 7);
        let (hash, seq) = id.0.split_once('-').expect("hash-seq format");
        assert_eq!(hash.len(), 12);
        assert_eq!(seq, "0007");
    }

    #[test]
    fn fingerprint_ignores_url_order() {
        let a = corpus_fingerprint(
            "text-embedding-ada-002",
            500,
            100,
            &["https://a.example".into(), "https://b.example".into()],
        );
        let b = corpus_fingerprint(
            "text-embedding-ada-002",
            500,
            100,
            &["https://b.example".into(), "https://a.example".into()],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_parameters() {
        let urls = vec!["https://a.example".to_string()];
        let base = corpus_fingerprint("text-embedding-ada-002", 500, 100, &urls);

        assert_ne!(base, corpus_fingerprint("text-embedding-3-small", 500, 100, &urls));
        assert_ne!(base, corpus_fingerprint("text-embedding-ada-002", 400, 100, &urls));
        assert_ne!(base, corpus_fingerprint("text-embedding-ada-002", 500, 50, &urls));
    }

    #[test]
    fn query_response_serialization() {
        let ok = QueryResponse::success(Answer {
            text: "Unlimited PTO.".into(),
            sources: vec![AnswerSource {
                source: "https://example.com/benefits".into(),
                content: "Basecamp offers unlimited PTO.".into(),
            }],
        });
        let json = serde_json::to_value(&ok).expect("serialize");
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
        assert_eq!(json["sources"][0]["source"], "https://example.com/benefits");

        let err = QueryResponse::failure("embedding provider unavailable");
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "embedding provider unavailable");
    }
}
