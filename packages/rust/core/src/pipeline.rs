//! End-to-end question-answering pipeline: ingest → retrieve → synthesize.
//!
//! [`QaPipeline`] owns the ingestion lifecycle (`Uninitialized → Ingesting →
//! Ready`, or `Error` on total failure) and exposes the single `query`
//! operation to the outer service. It is an explicitly constructed,
//! injectable object (no ambient globals), generic over the two provider
//! traits so tests can run it entirely on deterministic stand-ins.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};
use url::Url;

use handbookqa_chunker::{ChunkerOptions, chunk_document};
use handbookqa_fetcher::{CorpusFetcher, FetchOptions};
use handbookqa_providers::{EmbeddingClient, GenerationClient};
use handbookqa_shared::{
    Answer, AppConfig, Chunk, HandbookQaError, IngestionReport, QueryResponse, Result, StoreMeta,
    VectorRecord,
};
use handbookqa_storage::VectorStore;

use crate::retriever;
use crate::synthesizer::Synthesizer;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ingesting,
    Ready,
    Error,
}

/// Progress callback for reporting ingestion status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a document's chunks have been embedded.
    fn document_embedded(&self, url: &str, current: usize, total: usize);
    /// Called when ingestion completes.
    fn done(&self, report: &IngestionReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_embedded(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &IngestionReport) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The question-answering pipeline.
pub struct QaPipeline<E, G> {
    embedder: Arc<E>,
    generator: G,
    synthesizer: Synthesizer,
    config: AppConfig,
    db_path: PathBuf,
    store: Option<VectorStore>,
    state: PipelineState,
}

impl<E, G> QaPipeline<E, G>
where
    E: EmbeddingClient + 'static,
    G: GenerationClient,
{
    /// Construct an uninitialized pipeline.
    pub fn new(config: AppConfig, db_path: PathBuf, embedder: E, generator: G) -> Self {
        Self {
            embedder: Arc::new(embedder),
            generator,
            synthesizer: Synthesizer::new(),
            config,
            db_path,
            store: None,
            state: PipelineState::Uninitialized,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// True once ingestion has completed and queries are being served.
    pub fn is_ready(&self) -> bool {
        self.state == PipelineState::Ready
    }

    /// Tag of the opened store, if any.
    pub fn store_meta(&self) -> Option<&StoreMeta> {
        self.store.as_ref().and_then(|s| s.meta())
    }

    /// Number of records served by the opened store.
    pub fn store_records(&self) -> usize {
        self.store.as_ref().map_or(0, |s| s.len())
    }

    /// Release the store handle and consume the pipeline.
    pub fn teardown(self) {
        info!("pipeline torn down");
    }

    /// Initialize the pipeline: open the store and ingest the corpus.
    ///
    /// Ingestion is skipped when the persisted store already matches the
    /// configured corpus and embedding model. A mismatched store tag is a
    /// fatal configuration error unless `force`, which resets the store
    /// and rebuilds it from scratch.
    #[instrument(skip_all, fields(db = %self.db_path.display(), force))]
    pub async fn init(
        &mut self,
        force: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestionReport> {
        self.state = PipelineState::Ingesting;
        match self.init_inner(force, progress).await {
            Ok(report) => {
                self.state = PipelineState::Ready;
                progress.done(&report);
                info!(
                    documents_fetched = report.documents_fetched,
                    documents_failed = report.documents_failed,
                    chunks_embedded = report.chunks_embedded,
                    skipped = report.skipped,
                    elapsed_ms = report.elapsed.as_millis(),
                    "pipeline ready"
                );
                Ok(report)
            }
            Err(e) => {
                self.state = PipelineState::Error;
                error!(error = %e, "pipeline initialization failed");
                Err(e)
            }
        }
    }

    async fn init_inner(
        &mut self,
        force: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestionReport> {
        let start = Instant::now();
        self.config.validate()?;

        progress.phase("Opening vector store");
        let mut store = VectorStore::open(&self.db_path).await?;

        let fingerprint = self.config.corpus_fingerprint();
        let model = self.embedder.model().to_string();

        if force {
            progress.phase("Resetting vector store");
            store.reset().await?;
        } else if store.meta().is_some() {
            // Refuse to serve from a store built with another model or
            // corpus; a matching, populated store makes ingestion a no-op.
            store.ensure_compatible(&model, &fingerprint)?;
            if !store.is_empty() {
                info!(
                    records = store.len(),
                    "persisted store matches configuration, skipping ingestion"
                );
                self.store = Some(store);
                return Ok(IngestionReport {
                    documents_fetched: 0,
                    documents_failed: 0,
                    chunks_embedded: 0,
                    skipped: true,
                    elapsed: start.elapsed(),
                });
            }
        }

        let run_id = store.record_ingestion_run().await?;

        // --- Fetch ---
        progress.phase("Fetching corpus");
        let mut parse_failures = 0usize;
        let urls: Vec<Url> = self
            .config
            .corpus
            .urls
            .iter()
            .filter_map(|raw| match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(url = %raw, error = %e, "invalid corpus URL, skipping");
                    parse_failures += 1;
                    None
                }
            })
            .collect();

        let fetcher = CorpusFetcher::new(FetchOptions {
            concurrency: self.config.ingest.concurrency,
            timeout: std::time::Duration::from_secs(self.config.openai.timeout_secs),
        })?;
        let outcome = fetcher.fetch_corpus(&urls).await;
        let documents_failed = parse_failures + outcome.errors.len();

        // --- Chunk ---
        progress.phase("Chunking documents");
        let opts = ChunkerOptions::new(
            self.config.chunking.chunk_size,
            self.config.chunking.overlap,
        )?;

        let mut chunked: Vec<(String, Vec<Chunk>)> = Vec::new();
        for doc in &outcome.documents {
            let url = doc.url.to_string();
            let chunks = chunk_document(&url, &doc.text, &opts);
            if chunks.is_empty() {
                warn!(%url, "document yielded no chunks, skipping");
                continue;
            }
            chunked.push((url, chunks));
        }

        if chunked.is_empty() {
            return Err(HandbookQaError::ingestion(
                "no document produced any chunk; nothing to ingest",
            ));
        }

        // --- Embed (bounded worker pool) ---
        progress.phase("Embedding chunks");
        let semaphore = Arc::new(Semaphore::new(self.config.ingest.concurrency.max(1)));
        let mut handles = Vec::with_capacity(chunked.len());

        for (_, chunks) in &chunked {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let embedder = Arc::clone(&self.embedder);
            let sem = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                embedder.embed(&texts).await
            }));
        }

        let total_docs = chunked.len();
        let mut embedded: Vec<Vec<Vec<f32>>> = Vec::with_capacity(total_docs);
        for (i, ((url, chunks), handle)) in chunked.iter().zip(handles).enumerate() {
            let vectors = handle
                .await
                .map_err(|e| HandbookQaError::ingestion(format!("embedding task failed: {e}")))??;
            if vectors.len() != chunks.len() {
                return Err(HandbookQaError::provider(format!(
                    "provider returned {} vectors for {} chunks of {url}",
                    vectors.len(),
                    chunks.len()
                )));
            }
            progress.document_embedded(url, i + 1, total_docs);
            embedded.push(vectors);
        }

        // All documents must agree on the embedding dimension.
        let dimensions = embedded
            .first()
            .and_then(|vectors| vectors.first())
            .map(Vec::len)
            .ok_or_else(|| {
                HandbookQaError::provider("embedding provider returned no vectors")
            })?;
        for vectors in &embedded {
            if let Some(odd) = vectors.iter().find(|v| v.len() != dimensions) {
                return Err(HandbookQaError::config(format!(
                    "embedding dimension mismatch across documents: {} vs {}",
                    dimensions,
                    odd.len()
                )));
            }
        }

        // --- Write (single writer, deterministic order) ---
        progress.phase("Writing vector store");
        store
            .set_meta(StoreMeta {
                dimensions,
                model_version: model,
                corpus_fingerprint: fingerprint,
            })
            .await?;

        let mut chunks_embedded = 0usize;
        for ((_, chunks), vectors) in chunked.iter().zip(embedded) {
            for (chunk, vector) in chunks.iter().zip(vectors) {
                store
                    .upsert(&VectorRecord {
                        chunk_id: chunk.id.clone(),
                        document_url: chunk.document_url.clone(),
                        seq: chunk.seq,
                        text: chunk.text.clone(),
                        vector,
                    })
                    .await?;
                chunks_embedded += 1;
            }
        }

        let report = IngestionReport {
            documents_fetched: outcome.documents.len(),
            documents_failed,
            chunks_embedded,
            skipped: false,
            elapsed: start.elapsed(),
        };

        let stats = serde_json::json!({
            "documents_fetched": report.documents_fetched,
            "documents_failed": report.documents_failed,
            "chunks_embedded": report.chunks_embedded,
        });
        store.finish_ingestion_run(&run_id, &stats.to_string()).await?;

        self.store = Some(store);
        Ok(report)
    }

    /// Answer a question from the ingested corpus.
    ///
    /// Valid only once the pipeline is `Ready`; the store is read-only on
    /// this path, so concurrent queries are safe.
    #[instrument(skip_all)]
    pub async fn query(&self, question: &str) -> Result<Answer> {
        let Some(store) = (self.state == PipelineState::Ready)
            .then_some(self.store.as_ref())
            .flatten()
        else {
            return Err(HandbookQaError::validation(
                "pipeline is not ready; run ingestion first",
            ));
        };

        let question = question.trim();
        if question.is_empty() {
            return Err(HandbookQaError::validation("question must not be empty"));
        }
        let max_chars = self.config.retrieval.max_question_chars;
        if question.chars().count() > max_chars {
            return Err(HandbookQaError::validation(format!(
                "question exceeds the {max_chars} character limit"
            )));
        }

        let results = retriever::retrieve(
            self.embedder.as_ref(),
            store,
            question,
            self.config.retrieval.top_k,
        )
        .await?;

        self.synthesizer
            .synthesize(&self.generator, question, &results)
            .await
    }

    /// The single operation exposed to the outer transport layer.
    ///
    /// Never propagates an error: any failure is folded into the
    /// `status: "error"` envelope.
    pub async fn handle(&self, question: &str) -> QueryResponse {
        match self.query(question).await {
            Ok(answer) => QueryResponse::success(answer),
            Err(e) => {
                error!(error = %e, "query failed");
                QueryResponse::failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::INSUFFICIENT_CONTEXT_ANSWER;
    use crate::testutil::{EchoGenerator, FailingEmbedder, HashEmbedder};
    use handbookqa_shared::QueryStatus;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BENEFITS_HTML: &str = "<html><body><main>\
        <p>Basecamp offers unlimited PTO and full healthcare.</p>\
        </main></body></html>";

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("hbqa_pipeline_{}.db", Uuid::now_v7()))
    }

    fn test_config(urls: Vec<String>) -> AppConfig {
        let mut config = AppConfig::default();
        config.corpus.urls = urls;
        config
    }

    async fn benefits_server() -> (MockServer, String) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/handbook"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BENEFITS_HTML))
            .mount(&server)
            .await;
        let url = format!("{}/handbook", server.uri());
        (server, url)
    }

    #[tokio::test]
    async fn init_ingests_corpus_and_reaches_ready() {
        let (_server, url) = benefits_server().await;
        let db = temp_db();

        let mut pipeline = QaPipeline::new(
            test_config(vec![url]),
            db.clone(),
            HashEmbedder::new(),
            EchoGenerator,
        );
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);

        let report = pipeline.init(false, &SilentProgress).await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);
        assert!(!report.skipped);
        assert_eq!(report.documents_fetched, 1);
        assert_eq!(report.documents_failed, 0);
        assert_eq!(report.chunks_embedded, 1);
        assert_eq!(pipeline.store_records(), 1);

        let meta = pipeline.store_meta().expect("store is tagged");
        assert_eq!(meta.model_version, "hash-embedding-001");
        assert_eq!(meta.dimensions, 32);

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn answers_cite_the_originating_document() {
        let (_server, url) = benefits_server().await;
        let db = temp_db();

        let mut pipeline = QaPipeline::new(
            test_config(vec![url.clone()]),
            db.clone(),
            HashEmbedder::new(),
            EchoGenerator,
        );
        pipeline.init(false, &SilentProgress).await.unwrap();

        let response = pipeline.handle("What benefits does Basecamp offer?").await;
        assert_eq!(response.status, QueryStatus::Success);
        assert!(response.answer.contains("unlimited PTO"));
        assert!(response.answer.contains("healthcare"));
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].source, url);
        assert_eq!(
            response.sources[0].content,
            "Basecamp offers unlimited PTO and full healthcare."
        );

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn query_validation_rejects_bad_input() {
        let (_server, url) = benefits_server().await;
        let db = temp_db();

        let mut pipeline = QaPipeline::new(
            test_config(vec![url]),
            db.clone(),
            HashEmbedder::new(),
            EchoGenerator,
        );
        pipeline.init(false, &SilentProgress).await.unwrap();

        let err = pipeline.query("   ").await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Validation { .. }));

        let long_question = "why ".repeat(500);
        let err = pipeline.query(&long_question).await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Validation { .. }));

        let response = pipeline.handle("").await;
        assert_eq!(response.status, QueryStatus::Error);
        assert!(response.error.unwrap().contains("empty"));

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn query_before_init_is_rejected() {
        let pipeline = QaPipeline::new(
            test_config(vec!["https://example.com/handbook".into()]),
            temp_db(),
            HashEmbedder::new(),
            EchoGenerator,
        );

        let err = pipeline.query("What benefits?").await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Validation { .. }));
        assert!(err.to_string().contains("not ready"));
    }

    #[tokio::test]
    async fn reingestion_is_skipped_when_store_matches() {
        let (_server, url) = benefits_server().await;
        let db = temp_db();
        let config = test_config(vec![url]);

        let mut first = QaPipeline::new(
            config.clone(),
            db.clone(),
            HashEmbedder::new(),
            EchoGenerator,
        );
        let report = first.init(false, &SilentProgress).await.unwrap();
        assert!(!report.skipped);
        let records = first.store_records();
        first.teardown();

        let mut second = QaPipeline::new(config, db.clone(), HashEmbedder::new(), EchoGenerator);
        let report = second.init(false, &SilentProgress).await.unwrap();
        assert!(report.skipped);
        assert_eq!(second.state(), PipelineState::Ready);
        assert_eq!(second.store_records(), records);

        // The reloaded store answers identically
        let response = second.handle("What benefits does Basecamp offer?").await;
        assert_eq!(response.status, QueryStatus::Success);
        assert_eq!(response.sources.len(), 1);

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn model_change_requires_forced_reingestion() {
        let (_server, url) = benefits_server().await;
        let db = temp_db();
        let config = test_config(vec![url]);

        let mut first = QaPipeline::new(
            config.clone(),
            db.clone(),
            HashEmbedder::new(),
            EchoGenerator,
        );
        first.init(false, &SilentProgress).await.unwrap();
        first.teardown();

        // Same store, different embedding model: refuse to reuse.
        let mut stale = QaPipeline::new(
            config.clone(),
            db.clone(),
            HashEmbedder::with_model("hash-embedding-002"),
            EchoGenerator,
        );
        let err = stale.init(false, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Config { .. }));
        assert_eq!(stale.state(), PipelineState::Error);

        // Forced re-ingestion rebuilds the store under the new model.
        let mut forced = QaPipeline::new(
            config,
            db.clone(),
            HashEmbedder::with_model("hash-embedding-002"),
            EchoGenerator,
        );
        forced.init(true, &SilentProgress).await.unwrap();
        assert_eq!(forced.state(), PipelineState::Ready);
        assert_eq!(
            forced.store_meta().unwrap().model_version,
            "hash-embedding-002"
        );

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn partial_fetch_failure_still_reaches_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/handbook"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BENEFITS_HTML))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let db = temp_db();
        let mut pipeline = QaPipeline::new(
            test_config(vec![
                format!("{}/handbook", server.uri()),
                format!("{}/missing", server.uri()),
            ]),
            db.clone(),
            HashEmbedder::new(),
            EchoGenerator,
        );

        let report = pipeline.init(false, &SilentProgress).await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);
        assert_eq!(report.documents_fetched, 1);
        assert_eq!(report.documents_failed, 1);

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn total_fetch_failure_enters_error_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let db = temp_db();
        let mut pipeline = QaPipeline::new(
            test_config(vec![format!("{}/handbook", server.uri())]),
            db.clone(),
            HashEmbedder::new(),
            EchoGenerator,
        );

        let err = pipeline.init(false, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Ingestion(_)));
        assert_eq!(pipeline.state(), PipelineState::Error);

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn provider_failure_aborts_ingestion() {
        let (_server, url) = benefits_server().await;
        let db = temp_db();

        let mut pipeline = QaPipeline::new(
            test_config(vec![url]),
            db.clone(),
            FailingEmbedder,
            EchoGenerator,
        );

        let err = pipeline.init(false, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, HandbookQaError::Provider(_)));
        assert_eq!(pipeline.state(), PipelineState::Error);

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn empty_retrieval_yields_insufficient_context_answer() {
        let (_server, url) = benefits_server().await;
        let db = temp_db();

        let mut config = test_config(vec![url]);
        // k = 0 makes every retrieval come back empty
        config.retrieval.top_k = 0;

        let mut pipeline =
            QaPipeline::new(config, db.clone(), HashEmbedder::new(), EchoGenerator);
        pipeline.init(false, &SilentProgress).await.unwrap();

        let response = pipeline.handle("What benefits does Basecamp offer?").await;
        assert_eq!(response.status, QueryStatus::Success);
        assert_eq!(response.answer, INSUFFICIENT_CONTEXT_ANSWER);
        assert!(response.sources.is_empty());

        let _ = std::fs::remove_file(db);
    }
}
