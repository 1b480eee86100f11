//! Concurrent corpus fetcher.
//!
//! Fetches the configured source URLs on a bounded worker pool and reduces
//! each HTML body to plain text. A failed fetch is logged and skipped so the
//! remaining documents still ingest; the caller decides whether zero
//! successes is fatal.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use ego_tree::NodeRef;
use scraper::{Html, Node};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use handbookqa_shared::{Document, HandbookQaError, Result};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("HandbookQA/", env!("CARGO_PKG_VERSION"));

/// Elements whose subtree text is boilerplate, not handbook content.
const SKIPPED_ELEMENTS: &[&str] = &[
    "head", "script", "style", "noscript", "nav", "header", "footer",
];

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Maximum concurrent requests.
    pub concurrency: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Result of fetching a corpus: the extracted documents plus the failures
/// that were skipped (URL, error message).
#[derive(Debug)]
pub struct FetchOutcome {
    pub documents: Vec<Document>,
    pub errors: Vec<(String, String)>,
}

/// Concurrent document fetcher over a shared HTTP client.
pub struct CorpusFetcher {
    client: Client,
    options: FetchOptions,
}

impl CorpusFetcher {
    /// Create a new fetcher with the given options.
    pub fn new(options: FetchOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(options.timeout)
            .build()
            .map_err(|e| {
                HandbookQaError::ingestion(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, options })
    }

    /// Fetch every URL, preserving input order among the successes.
    #[instrument(skip_all, fields(urls = urls.len()))]
    pub async fn fetch_corpus(&self, urls: &[Url]) -> FetchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut handles = Vec::with_capacity(urls.len());

        info!(
            urls = urls.len(),
            concurrency = self.options.concurrency,
            "fetching corpus"
        );

        for url in urls {
            let client = self.client.clone();
            let sem = semaphore.clone();
            let url = url.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                fetch_document(&client, &url).await
            }));
        }

        let mut documents = Vec::new();
        let mut errors = Vec::new();

        for (url, handle) in urls.iter().zip(handles) {
            match handle.await {
                Ok(Ok(doc)) => {
                    debug!(url = %doc.url, chars = doc.text.chars().count(), "fetched document");
                    documents.push(doc);
                }
                Ok(Err(e)) => {
                    warn!(%url, error = %e, "fetch failed, skipping document");
                    errors.push((url.to_string(), e.to_string()));
                }
                Err(e) => {
                    warn!(%url, error = %e, "fetch task panicked, skipping document");
                    errors.push((url.to_string(), e.to_string()));
                }
            }
        }

        info!(
            fetched = documents.len(),
            failed = errors.len(),
            "corpus fetch complete"
        );

        FetchOutcome { documents, errors }
    }
}

/// Fetch a single URL and extract its text content.
async fn fetch_document(client: &Client, url: &Url) -> Result<Document> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| HandbookQaError::ingestion(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HandbookQaError::ingestion(format!("{url}: HTTP {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| HandbookQaError::ingestion(format!("{url}: body read failed: {e}")))?;

    Ok(Document {
        url: url.clone(),
        text: extract_text(&body),
    })
}

/// Reduce an HTML body to whitespace-normalized plain text.
///
/// Subtrees of boilerplate elements (scripts, styles, navigation chrome)
/// are dropped entirely.
pub fn extract_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut raw = String::new();
    push_text(doc.tree.root(), &mut raw);

    let ws = Regex::new(r"\s+").unwrap();
    ws.replace_all(raw.trim(), " ").into_owned()
}

fn push_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => return,
        Node::Text(text) => {
            out.push_str(&text);
            out.push(' ');
            return;
        }
        _ => {}
    }
    for child in node.children() {
        push_text(child, out);
    }
}
