//! Question retrieval: embed the question, search the store.

use tracing::debug;

use handbookqa_providers::EmbeddingClient;
use handbookqa_shared::{Result, RetrievedChunk};
use handbookqa_storage::VectorStore;

/// Retrieve the `k` chunks most similar to `question`.
///
/// Returns the store's ordered result list unchanged. Deterministic for a
/// fixed corpus, question, and k.
pub async fn retrieve<E: EmbeddingClient>(
    embedder: &E,
    store: &VectorStore,
    question: &str,
    k: usize,
) -> Result<Vec<RetrievedChunk>> {
    if store.is_empty() {
        return Ok(Vec::new());
    }

    let query = vec![question.to_string()];
    let mut vectors = embedder.embed(&query).await?;
    if vectors.is_empty() {
        return Err(handbookqa_shared::HandbookQaError::provider(
            "embedding provider returned no vector for the question",
        ));
    }
    let query_vector = vectors.remove(0);

    let results = store.query(&query_vector, k)?;
    debug!(
        question_chars = question.chars().count(),
        k,
        hits = results.len(),
        "retrieved chunks"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::HashEmbedder;
    use handbookqa_shared::{ChunkId, StoreMeta, VectorRecord};
    use uuid::Uuid;

    async fn seeded_store(texts: &[&str]) -> (VectorStore, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("hbqa_retriever_{}.db", Uuid::now_v7()));
        let mut store = VectorStore::open(&path).await.unwrap();
        store
            .set_meta(StoreMeta {
                dimensions: 32,
                model_version: "hash-embedding-001".into(),
                corpus_fingerprint: "fp".into(),
            })
            .await
            .unwrap();

        for (seq, text) in texts.iter().enumerate() {
            store
                .upsert(&VectorRecord {
                    chunk_id: ChunkId::derive("https://example.com/handbook", seq),
                    document_url: "https://example.com/handbook".into(),
                    seq,
                    text: text.to_string(),
                    vector: HashEmbedder::vector_for(text),
                })
                .await
                .unwrap();
        }
        (store, path)
    }

    #[tokio::test]
    async fn retrieves_most_similar_chunk_first() {
        let (store, path) = seeded_store(&[
            "Our pricing is simple and public.",
            "Basecamp offers unlimited PTO and full healthcare.",
            "Use the internal systems guide for deployment.",
        ])
        .await;

        let embedder = HashEmbedder::new();
        let results = retrieve(&embedder, &store, "unlimited PTO and healthcare", 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].record.text.contains("unlimited PTO"));
        assert!(results[0].score >= results[1].score);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn retrieval_is_deterministic() {
        let (store, path) = seeded_store(&[
            "Working remotely is the default at Basecamp.",
            "Benefits include a sabbatical every three years.",
            "Communication happens in writing first.",
        ])
        .await;

        let embedder = HashEmbedder::new();
        let question = "What benefits do employees get?";

        let first = retrieve(&embedder, &store, question, 3).await.unwrap();
        let second = retrieve(&embedder, &store, question, 3).await.unwrap();

        let ids = |rs: &[RetrievedChunk]| {
            rs.iter().map(|r| r.record.chunk_id.0.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn empty_store_returns_no_results_without_embedding() {
        let path = std::env::temp_dir().join(format!("hbqa_retriever_{}.db", Uuid::now_v7()));
        let store = VectorStore::open(&path).await.unwrap();

        let embedder = HashEmbedder::new();
        let results = retrieve(&embedder, &store, "anything", 3).await.unwrap();
        assert!(results.is_empty());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn k_larger_than_store_returns_everything() {
        let (store, path) = seeded_store(&["Only one chunk."]).await;
        let embedder = HashEmbedder::new();
        let results = retrieve(&embedder, &store, "one chunk", 50).await.unwrap();
        assert_eq!(results.len(), 1);
        let _ = std::fs::remove_file(path);
    }
}
