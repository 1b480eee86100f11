//! External model provider clients.
//!
//! The pipeline talks to the outside world through two narrow capability
//! traits, [`EmbeddingClient`] and [`GenerationClient`], so tests can
//! substitute deterministic stand-ins for the network. The shipped
//! implementations target OpenAI-compatible HTTP APIs.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;

use handbookqa_shared::Result;

mod openai;

pub use openai::{OpenAiEmbedder, OpenAiGenerator};

/// Converts text into fixed-dimension embedding vectors.
pub trait EmbeddingClient: Send + Sync {
    /// Embed `texts`, returning one vector per input, in input order.
    fn embed(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;

    /// Model identifier the vectors are produced with.
    fn model(&self) -> &str;
}

/// Produces completion text from a rendered prompt.
pub trait GenerationClient: Send + Sync {
    /// Generate an answer for `prompt`.
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;

    /// Model identifier used for generation.
    fn model(&self) -> &str;
}

/// Retry policy shared by the provider clients.
///
/// Authentication and rate-limit rejections, server errors, and transport
/// failures are retried with exponential backoff; other client errors are
/// surfaced immediately.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: usize,
}

impl RetryPolicy {
    pub(crate) fn should_retry_status(status: StatusCode) -> bool {
        status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }

    pub(crate) fn should_retry_transport(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
    }

    pub(crate) fn backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}
