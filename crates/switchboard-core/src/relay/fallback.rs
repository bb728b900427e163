//! Last-resort endpoints used once every relay attempt has failed.

use crate::client::{join_url, HttpClient, RelayClientError};
use rand::Rng;
use std::{sync::Arc, time::Duration};

pub struct FallbackPool {
    urls: Vec<String>,
    http: Arc<HttpClient>,
    timeout: Duration,
}

impl FallbackPool {
    #[must_use]
    pub fn new(urls: Vec<String>, http: Arc<HttpClient>, timeout: Duration) -> Self {
        Self { urls, http, timeout }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Picks an endpoint uniformly at random.
    #[must_use]
    pub fn pick(&self) -> Option<&str> {
        if self.urls.is_empty() {
            return None;
        }
        Some(self.urls[rand::rng().random_range(0..self.urls.len())].as_str())
    }

    /// Sends `body` to `url` within the pool's time budget.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`RelayClientError::Protocol`] for a
    /// non-UTF-8 response.
    pub async fn send(
        &self,
        url: &str,
        path: Option<&str>,
        http_method: &str,
        body: &str,
    ) -> Result<String, RelayClientError> {
        let target = join_url(url, path);
        let response = tokio::time::timeout(
            self.timeout,
            self.http.send(http_method, &target, bytes::Bytes::from(body.to_string()), self.timeout),
        )
        .await
        .map_err(|_| RelayClientError::Timeout)??;

        String::from_utf8(response.to_vec())
            .map_err(|_| RelayClientError::Protocol("response is not valid UTF-8".to_string()))
    }
}
