use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::group::ResourceGroup;
use crate::config::FetchConfig;

/// Reasons a fetch fell back to the empty body.
///
/// Internal to the fetcher: [`FeedFetcher::fetch`] logs these and returns
/// the fallback instead of surfacing them.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request and body read exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Circuit breaker is open for the resource group
    #[error("Circuit open for group '{0}'")]
    ShortCircuited(String),
    /// Worker pool and its queue were both full
    #[error("Worker queue full for group '{0}'")]
    Rejected(String),
}

impl FetchError {
    /// Whether a network attempt was actually made.
    fn attempted(&self) -> bool {
        !matches!(self, FetchError::ShortCircuited(_) | FetchError::Rejected(_))
    }
}

/// Fetches raw feed documents inside an isolated [`ResourceGroup`].
///
/// Cheap to clone; clones share the HTTP connection pool and the group's
/// worker pool and breaker state.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    group: Arc<ResourceGroup>,
    timeout: Duration,
    max_body_bytes: usize,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, group: Arc<ResourceGroup>, config: &FetchConfig) -> Self {
        Self {
            client,
            group,
            timeout: config.timeout(),
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Build an HTTP client tuned for many small feed fetches.
    pub fn build_client(config: &FetchConfig) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(config.timeout())
            .build()
    }

    pub fn group(&self) -> &Arc<ResourceGroup> {
        &self.group
    }

    /// Fetch one feed document.
    ///
    /// Returns the body as text, or an empty string when the call timed out,
    /// failed, returned a non-2xx status, was too large, was short-circuited
    /// by the breaker, or was rejected by a full worker queue. Callers cannot
    /// and should not tell these apart from a feed with no content.
    pub async fn fetch(&self, url: &str) -> String {
        match self.try_fetch(url).await {
            Ok(body) => body,
            Err(e) if e.attempted() => {
                tracing::warn!(url = %url, group = %self.group.name(), error = %e, "Feed fetch failed, using fallback");
                String::new()
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Feed fetch not attempted, using fallback");
                String::new()
            }
        }
    }

    /// Same as [`fetch`](Self::fetch) but keeps the failure reason.
    pub async fn try_fetch(&self, url: &str) -> Result<String, FetchError> {
        let group = self.group.name();
        let Some(permit) = self.group.breaker().try_call() else {
            return Err(FetchError::ShortCircuited(group.to_string()));
        };
        // An unresolved trial permit dropped here reopens the breaker
        let Some(_worker) = self.group.acquire_worker().await else {
            return Err(FetchError::Rejected(group.to_string()));
        };

        let result = match tokio::time::timeout(self.timeout, self.download(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        result
    }

    async fn download(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        tracing::debug!(url = %url, status = %status, "Fetched feed");

        let bytes = read_limited_bytes(response, self.max_body_bytes).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
