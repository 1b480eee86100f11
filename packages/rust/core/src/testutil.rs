//! Deterministic provider stand-ins shared by the core tests.

use handbookqa_providers::{EmbeddingClient, GenerationClient};
use handbookqa_shared::{HandbookQaError, Result};

/// Bag-of-words embedder: hashes each word into one of 32 buckets.
/// Deterministic across runs, so retrieval tests are reproducible.
pub(crate) struct HashEmbedder {
    pub model: String,
}

impl HashEmbedder {
    pub(crate) fn new() -> Self {
        Self::with_model("hash-embedding-001")
    }

    pub(crate) fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }

    pub(crate) fn vector_for(text: &str) -> Vec<f32> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let mut vector = vec![0.0f32; 32];
        for word in text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() % 32) as usize] += 1.0;
        }
        vector
    }
}

impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Embedder that fails like a provider with exhausted retries.
pub(crate) struct FailingEmbedder;

impl EmbeddingClient for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(HandbookQaError::provider("embeddings request failed (503)"))
    }

    fn model(&self) -> &str {
        "failing-embedder"
    }
}

/// Generator that returns the rendered prompt verbatim, so tests can assert
/// on what would have been sent to the model.
pub(crate) struct EchoGenerator;

impl GenerationClient for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }

    fn model(&self) -> &str {
        "echo-generator"
    }
}
