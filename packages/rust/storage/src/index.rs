//! In-memory similarity index over the persisted records.
//!
//! Brute-force cosine similarity is plenty for a handbook-sized corpus
//! (hundreds of chunks). Records keep their insertion order so equal
//! scores rank deterministically.

use handbookqa_shared::{RetrievedChunk, VectorRecord};

#[derive(Debug, Default)]
pub(crate) struct VectorIndex {
    records: Vec<VectorRecord>,
}

impl VectorIndex {
    pub(crate) fn from_records(records: Vec<VectorRecord>) -> Self {
        Self { records }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    /// Insert or replace by chunk id, preserving the original position of
    /// a replaced record.
    pub(crate) fn upsert(&mut self, record: VectorRecord) {
        match self
            .records
            .iter_mut()
            .find(|r| r.chunk_id == record.chunk_id)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Top-k records by cosine similarity, descending. The sort is stable,
    /// so ties fall back to insertion order.
    pub(crate) fn search(&self, query: &[f32], k: usize) -> Vec<RetrievedChunk> {
        let mut results: Vec<RetrievedChunk> = self
            .records
            .iter()
            .map(|record| RetrievedChunk {
                record: record.clone(),
                score: cosine_similarity(query, &record.vector),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        results
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 means identical direction; 0 when
/// either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have same length");

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
