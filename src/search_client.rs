use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::{BackendTarget, Config};
use crate::data_models::{SearchQuery, SearchResultItem, SearchResultPage};
use crate::error::FrontendError;
use crate::msgess::DEFAULT_MAX_MESSAGE_SIZE;

/// What a backend hands back before it is shaped into a [`SearchResultPage`].
#[derive(Debug, Clone, Default)]
pub struct BackendResults {
    pub items: Vec<SearchResultItem>,
    /// `None` when the backend does not report a total.
    pub total_estimate: Option<u64>,
    /// Backend-reported query time, if any.
    pub elapsed: Option<Duration>,
}

/// One way of talking to a search server.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<BackendResults, FrontendError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// A result as the search server encodes it, shared by the HTTP and MsgESS backends.
#[derive(Debug, Deserialize)]
pub(crate) struct WireResult {
    url: String,
    title: String,
    snippet: String,
    #[serde(default)]
    score: Option<f64>,
}

impl From<WireResult> for SearchResultItem {
    fn from(result: WireResult) -> Self {
        SearchResultItem {
            title: result.title,
            url: result.url,
            snippet: result.snippet,
            score: result.score,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponse {
    pub(crate) search_results: Vec<WireResult>,
    #[serde(default)]
    pub(crate) total_results: Option<u64>,
    #[serde(default)]
    pub(crate) elapsed_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    search_query: &'a str,
    max_results: usize,
    offset: usize,
    use_quotient_based_scoring: bool,
}

/// Relays queries to the configured backend and bounds every exchange by a timeout. Never retries and never
/// caches: each call goes to the search server once.
#[derive(Clone)]
pub struct SearchClient {
    backend: Arc<dyn SearchBackend>,
    timeout: Duration,
}

impl SearchClient {
    pub fn new(backend: Arc<dyn SearchBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: Arc<dyn SearchBackend> = match config.backend()? {
            BackendTarget::Http(url) => Arc::new(HttpSearchBackend::new(
                &url,
                config.timeout(),
                config.connect_timeout(),
            )?),
            #[cfg(unix)]
            BackendTarget::Unix(path) => {
                Arc::new(crate::msgess::MsgessSearchBackend::new(path, config.connect_timeout()))
            }
            #[cfg(not(unix))]
            BackendTarget::Unix(_) => anyhow::bail!(crate::config::ConfigError::UnixSocketUnsupported),
        };

        Ok(Self::new(backend, config.timeout()))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn query(&self, query: &SearchQuery) -> Result<SearchResultPage, FrontendError> {
        let start = Instant::now();

        let results = tokio::time::timeout(self.timeout, self.backend.search(query))
            .await
            .map_err(|_| {
                warn!(backend = self.backend.name(), timeout = ?self.timeout, "search timed out");
                FrontendError::SearchTimeout(self.timeout)
            })??;

        if results.items.len() > query.page_size() {
            warn!(
                backend = self.backend.name(),
                returned = results.items.len(),
                page_size = query.page_size(),
                "backend returned more results than requested, dropping the rest"
            );
        }

        let shown = results.items.len().min(query.page_size());
        let total = results
            .total_estimate
            .unwrap_or_else(|| query.offset().saturating_add(shown) as u64);
        let elapsed = results.elapsed.unwrap_or_else(|| start.elapsed());

        Ok(SearchResultPage::new(
            results.items,
            total,
            query.offset(),
            query.page_size(),
            Some(elapsed),
        ))
    }
}

/// JSON over HTTP: `POST {base}/search`.
#[derive(Debug, Clone)]
pub struct HttpSearchBackend {
    http_client: Client,
    endpoint: Url,
    timeout: Duration,
    max_response_size: usize,
}

impl HttpSearchBackend {
    pub fn new(base_url: &Url, timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let endpoint = search_endpoint(base_url).context("Invalid search server URL")?;

        Ok(Self {
            http_client,
            endpoint,
            timeout,
            max_response_size: DEFAULT_MAX_MESSAGE_SIZE,
        })
    }

    /// Replies with a larger body are refused. Defaults to the MsgESS message limit.
    pub fn with_max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn map_send_error(&self, e: reqwest::Error) -> FrontendError {
        if e.is_timeout() {
            error!("request to search server timed out");
            return FrontendError::SearchTimeout(self.timeout);
        }
        error!(error = %e, "network error talking to search server");
        FrontendError::SearchUnavailable(e.to_string())
    }

    fn too_big(&self, size: u64) -> FrontendError {
        error!(size, max = self.max_response_size, "search server response is too large");
        FrontendError::SearchProtocol(format!(
            "response of at least {size} bytes exceeds the limit of {} bytes",
            self.max_response_size
        ))
    }

    async fn read_body(&self, mut response: reqwest::Response) -> Result<Vec<u8>, FrontendError> {
        if let Some(length) = response.content_length() {
            if length > self.max_response_size as u64 {
                return Err(self.too_big(length));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_send_error(e))? {
            let size = body.len().saturating_add(chunk.len());
            if size > self.max_response_size {
                return Err(self.too_big(size as u64));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Resolves `search` against the base URL, keeping any path prefix the base already has.
pub fn search_endpoint(base_url: &Url) -> Result<Url, url::ParseError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("search")
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(&self, query: &SearchQuery) -> Result<BackendResults, FrontendError> {
        let request = WireRequest {
            search_query: query.text(),
            max_results: query.page_size(),
            offset: query.offset(),
            use_quotient_based_scoring: query.use_quotient_based_scoring(),
        };

        debug!(url = %self.endpoint, "sending search request");

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), "search server returned an error status");
            return Err(match status {
                StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => {
                    FrontendError::SearchUnavailable(format!("status {status}"))
                }
                _ => FrontendError::SearchProtocol(format!("unexpected status {status}")),
            });
        }

        let body = self.read_body(response).await?;

        let wire: WireResponse = serde_json::from_slice(&body).map_err(|e| {
            error!(error = %e, "failed to parse search server response");
            FrontendError::SearchProtocol(format!("malformed response: {e}"))
        })?;

        debug!(results = wire.search_results.len(), "search server answered");

        Ok(BackendResults {
            items: wire.search_results.into_iter().map(Into::into).collect(),
            total_estimate: wire.total_results,
            elapsed: wire.elapsed_ms.map(Duration::from_millis),
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[test]
fn test_search_endpoint() {
    let base = Url::parse("http://localhost:8000").unwrap();
    assert_eq!(
        search_endpoint(&base).unwrap().as_str(),
        "http://localhost:8000/search"
    );

    let base = Url::parse("https://example.org/api/v1").unwrap();
    assert_eq!(
        search_endpoint(&base).unwrap().as_str(),
        "https://example.org/api/v1/search"
    );

    let base = Url::parse("https://example.org/api/").unwrap();
    assert_eq!(
        search_endpoint(&base).unwrap().as_str(),
        "https://example.org/api/search"
    );
}

#[test]
fn test_wire_response_requires_fields() {
    let ok = r#"{"search_results":[{"url":"https://a","title":"A","snippet":"s","score":1.5,"extra":true}]}"#;
    let parsed: WireResponse = serde_json::from_str(ok).unwrap();
    assert_eq!(parsed.search_results.len(), 1);
    assert!(parsed.total_results.is_none());

    let missing_title = r#"{"search_results":[{"url":"https://a","snippet":"s"}]}"#;
    assert!(serde_json::from_str::<WireResponse>(missing_title).is_err());

    let wrong_type = r#"{"search_results":[{"url":"https://a","title":7,"snippet":"s"}]}"#;
    assert!(serde_json::from_str::<WireResponse>(wrong_type).is_err());
}
