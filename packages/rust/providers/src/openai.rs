//! OpenAI-compatible embedding and chat-completion clients.

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use handbookqa_shared::config::OpenAiConfig;
use handbookqa_shared::{HandbookQaError, Result};

use crate::{EmbeddingClient, GenerationClient, RetryPolicy};

/// Build the shared HTTP client with auth headers and timeout.
fn build_client(api_key: &str, config: &OpenAiConfig) -> Result<Client> {
    if api_key.trim().is_empty() {
        return Err(HandbookQaError::config("missing provider API key"));
    }

    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", api_key.trim());
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth)
            .map_err(|_| HandbookQaError::config("provider API key is not a valid header value"))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_secs))
        .default_headers(headers)
        .build()
        .map_err(|e| HandbookQaError::provider(format!("failed to build HTTP client: {e}")))
}

/// POST a JSON body, retrying per [`RetryPolicy`], and return the response
/// body text of the first successful attempt.
async fn post_with_retry<B: Serialize>(
    client: &Client,
    endpoint: &str,
    body: &B,
    policy: RetryPolicy,
    what: &str,
) -> Result<String> {
    let mut attempt = 0usize;
    loop {
        let response = client.post(endpoint).json(body).send().await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return resp.text().await.map_err(|e| {
                        HandbookQaError::provider(format!("{what}: body read failed: {e}"))
                    });
                }

                let text = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                if RetryPolicy::should_retry_status(status) && attempt + 1 < policy.max_attempts {
                    attempt += 1;
                    warn!(%status, attempt, what, "provider request rejected, retrying");
                    sleep(RetryPolicy::backoff(attempt)).await;
                    continue;
                }
                return Err(HandbookQaError::provider(format!(
                    "{what} failed ({status}): {text}"
                )));
            }
            Err(err) => {
                if RetryPolicy::should_retry_transport(&err) && attempt + 1 < policy.max_attempts {
                    attempt += 1;
                    warn!(error = %err, attempt, what, "provider request errored, retrying");
                    sleep(RetryPolicy::backoff(attempt)).await;
                    continue;
                }
                return Err(HandbookQaError::provider(format!("{what}: {err}")));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Embeddings client for OpenAI-compatible `/embeddings` endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    batch_size: usize,
    policy: RetryPolicy,
}

impl OpenAiEmbedder {
    /// Build an embeddings client from the provider configuration.
    pub fn new(api_key: &str, config: &OpenAiConfig) -> Result<Self> {
        if config.embedding_model.trim().is_empty() {
            return Err(HandbookQaError::config("missing embedding model name"));
        }
        Ok(Self {
            client: build_client(api_key, config)?,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.embedding_model.clone(),
            batch_size: config.embed_batch_size.max(1),
            policy: RetryPolicy {
                max_attempts: config.max_retries.max(1),
            },
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };
        let body = post_with_retry(
            &self.client,
            &self.endpoint,
            &request,
            self.policy,
            "embeddings request",
        )
        .await?;

        let mut parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            HandbookQaError::provider(format!("failed to parse embeddings response: {e}"))
        })?;
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != batch.len() {
            return Err(HandbookQaError::provider(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                batch.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

impl EmbeddingClient for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let mut batch_vectors = self.embed_batch(batch).await?;
            debug!(
                batch = batch.len(),
                model = %self.model,
                "embedded batch"
            );
            vectors.append(&mut batch_vectors);
        }

        // All vectors of one model version must share a dimension.
        let dimensions = vectors[0].len();
        if let Some(odd) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(HandbookQaError::config(format!(
                "embedding dimension mismatch: provider returned {} and {} for model {}",
                dimensions,
                odd.len(),
                self.model
            )));
        }

        Ok(vectors)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Chat-completion client for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    policy: RetryPolicy,
}

impl OpenAiGenerator {
    /// Build a generation client from the provider configuration.
    pub fn new(api_key: &str, config: &OpenAiConfig) -> Result<Self> {
        if config.generation_model.trim().is_empty() {
            return Err(HandbookQaError::config("missing generation model name"));
        }
        Ok(Self {
            client: build_client(api_key, config)?,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.generation_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_completion_tokens,
            policy: RetryPolicy {
                max_attempts: config.max_retries.max(1),
            },
        })
    }
}

impl GenerationClient for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "Follow the instructions in the user message exactly.",
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };
        let body = post_with_retry(
            &self.client,
            &self.endpoint,
            &request,
            self.policy,
            "generation request",
        )
        .await?;

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            HandbookQaError::provider(format!("failed to parse generation response: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| HandbookQaError::provider("generation returned no choices"))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server_uri: &str, max_retries: usize) -> OpenAiConfig {
        OpenAiConfig {
            base_url: server_uri.to_string(),
            max_retries,
            embed_batch_size: 64,
            ..OpenAiConfig::default()
        }
    }

    #[tokio::test]
    async fn embed_returns_vectors_in_input_order() {
        let server = MockServer::start().await;

        // Response data deliberately out of order; the client must sort by index.
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "model": "text-embedding-ada-002" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "embedding": [0.0, 1.0], "index": 1 },
                    { "embedding": [1.0, 0.0], "index": 0 },
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new("test-key", &test_config(&server.uri(), 3)).unwrap();
        let vectors = embedder
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_splits_into_batches() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "embedding": [0.5, 0.5], "index": 0 },
                    { "embedding": [0.5, 0.5], "index": 1 },
                ]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "embedding": [0.5, 0.5], "index": 0 },
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri(), 3);
        config.embed_batch_size = 2;
        let embedder = OpenAiEmbedder::new("test-key", &config).unwrap();

        let texts: Vec<String> = ["a", "b", "c"].into_iter().map(String::from).collect();
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
    }

    #[tokio::test]
    async fn embed_retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [1.0, 2.0, 3.0], "index": 0 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new("test-key", &test_config(&server.uri(), 3)).unwrap();
        let vectors = embedder.embed(&["question".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0, 3.0]]);
    }

    #[tokio::test]
    async fn embed_surfaces_provider_error_after_retries() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(2)
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new("test-key", &test_config(&server.uri(), 2)).unwrap();
        let err = embedder.embed(&["question".to_string()]).await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Provider(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn embed_does_not_retry_bad_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid input"))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new("test-key", &test_config(&server.uri(), 3)).unwrap();
        let err = embedder.embed(&["question".to_string()]).await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Provider(_)));
    }

    #[tokio::test]
    async fn embed_rejects_inconsistent_dimensions() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "embedding": [1.0, 0.0], "index": 0 },
                    { "embedding": [1.0, 0.0, 0.0], "index": 1 },
                ]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new("test-key", &test_config(&server.uri(), 3)).unwrap();
        let err = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, HandbookQaError::Config { .. }));
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn embed_empty_input_skips_network() {
        let server = MockServer::start().await;
        // No mocks mounted: any request would 404 and fail the call.
        let embedder = OpenAiEmbedder::new("test-key", &test_config(&server.uri(), 3)).unwrap();
        let vectors = embedder.embed(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn generate_sends_temperature_and_returns_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "temperature": 0.0,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "Unlimited PTO." } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new("test-key", &test_config(&server.uri(), 3)).unwrap();
        let answer = generator.generate("What benefits?").await.unwrap();
        assert_eq!(answer, "Unlimited PTO.");
    }

    #[tokio::test]
    async fn generate_retries_auth_rejection_up_to_bound() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(2)
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new("test-key", &test_config(&server.uri(), 2)).unwrap();
        let err = generator.generate("question").await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Provider(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn generate_rejects_empty_choices() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new("test-key", &test_config(&server.uri(), 3)).unwrap();
        let err = generator.generate("question").await.unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn rejects_empty_api_key() {
        let config = OpenAiConfig::default();
        assert!(OpenAiEmbedder::new("", &config).is_err());
        assert!(OpenAiGenerator::new("  ", &config).is_err());
    }
}
