//! Core pipeline orchestration for HandbookQA.
//!
//! This crate ties together fetching, chunking, embedding, storage,
//! retrieval, and answer synthesis into the question-answering pipeline
//! exposed to the outer service.

pub mod pipeline;
pub mod retriever;
pub mod synthesizer;

#[cfg(test)]
pub(crate) mod testutil;
