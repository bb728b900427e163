use reqwest::{Client, ClientBuilder, Method};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::RelayClientError;

/// Configuration for the pooled HTTP client used for node and fallback traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Maximum number of concurrent outbound requests (default: 1000).
    #[serde(default = "default_concurrent_limit")]
    pub concurrent_limit: usize,

    /// How long a request may wait for a connection permit, in milliseconds (default: 500).
    #[serde(default = "default_permit_timeout_ms")]
    pub permit_timeout_ms: u64,

    /// TCP connect timeout in milliseconds (default: 5000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_concurrent_limit() -> usize {
    1000
}
fn default_permit_timeout_ms() -> u64 {
    500
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: default_concurrent_limit(),
            permit_timeout_ms: default_permit_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// HTTP client with semaphore-based concurrency control.
///
/// Does not retry on its own: every attempt is accounted for by the relay
/// dispatcher, which decides whether to try another node.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpClientConfig,
}

/// RAII guard ensuring semaphore permits are always released.
///
/// Uses [`OwnedSemaphorePermit`] which owns an `Arc` to the semaphore,
/// making it safe to hold across async boundaries.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl PermitGuard {
    fn new(permit: OwnedSemaphorePermit, semaphore: Arc<Semaphore>) -> Self {
        Self { _permit: permit, semaphore }
    }

    fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        tracing::trace!(
            available_permits = self.semaphore.available_permits(),
            "permit guard dropped"
        );
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, RelayClientError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Creates a new HTTP client with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, RelayClientError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                RelayClientError::Protocol(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)),
            config,
        })
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }

    /// Sanitizes network errors to prevent information disclosure.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// Sends one request and returns the response body.
    ///
    /// # Errors
    ///
    /// - [`RelayClientError::Timeout`] if permit acquisition or the request times out
    /// - [`RelayClientError::HttpError`] for non-success HTTP status codes
    /// - [`RelayClientError::Unreachable`] for network-related failures
    /// - [`RelayClientError::Protocol`] for an invalid method or a closed pool
    pub async fn send(
        &self,
        method: &str,
        url: &str,
        body: bytes::Bytes,
        timeout: Duration,
    ) -> Result<bytes::Bytes, RelayClientError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| RelayClientError::Protocol(format!("invalid HTTP method {method}")))?;

        let permit = tokio::time::timeout(
            Duration::from_millis(self.config.permit_timeout_ms),
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                url = url,
                available_permits = self.concurrent_limit.available_permits(),
                "http client semaphore acquisition timeout"
            );
            RelayClientError::Timeout
        })?
        .map_err(|_| RelayClientError::Protocol("http client pool closed".to_string()))?;

        let permit_guard = PermitGuard::new(permit, self.concurrent_limit.clone());
        tracing::trace!(available_permits = permit_guard.available_permits(), "http request started");

        let mut request = self.client.request(method.clone(), url).timeout(timeout);
        if method != Method::GET && method != Method::HEAD {
            request = request.header("content-type", "application/json").body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RelayClientError::Timeout
            } else {
                RelayClientError::Unreachable(Self::sanitize_network_error(&e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let raw_text = response.text().await.unwrap_or_default();
            let sanitized_text = if raw_text.len() > 256 {
                format!("{}... (truncated)", truncate_on_char_boundary(&raw_text, 256))
            } else {
                raw_text
            };
            tracing::trace!(
                status = status.as_u16(),
                available_permits = permit_guard.available_permits(),
                "http request failed"
            );
            return Err(RelayClientError::HttpError(status.as_u16(), sanitized_text));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                RelayClientError::Timeout
            } else {
                RelayClientError::Unreachable(Self::sanitize_network_error(&e))
            }
        })?;
        tracing::trace!(available_permits = permit_guard.available_permits(), "http request completed");
        Ok(bytes)
    }
}

fn truncate_on_char_boundary(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
