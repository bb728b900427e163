//! Configuration-backed protocol client.
//!
//! A "session" is the list of nodes configured for a blockchain hash; every
//! application on that chain shares it. Relays are forwarded over HTTP.

use super::{join_url, HttpClient, RelayAttempt, RelayClient, RelayClientError, RelayPayload};
use crate::types::{ClientCredential, Node};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

pub struct StaticSessionClient {
    http: Arc<HttpClient>,
    sessions: HashMap<String, Vec<Node>>,
}

impl StaticSessionClient {
    /// `sessions` maps a blockchain hash to its node list.
    #[must_use]
    pub fn new(http: Arc<HttpClient>, sessions: HashMap<String, Vec<Node>>) -> Self {
        Self { http, sessions }
    }
}

#[async_trait]
impl RelayClient for StaticSessionClient {
    async fn session_nodes(
        &self,
        credential: &ClientCredential,
        blockchain: &str,
    ) -> Result<Vec<Node>, RelayClientError> {
        let nodes = self
            .sessions
            .get(blockchain)
            .ok_or_else(|| RelayClientError::NoSession(blockchain.to_string()))?;
        debug!(
            application_public_key = %credential.application_public_key,
            blockchain,
            nodes = nodes.len(),
            "session resolved"
        );
        Ok(nodes.clone())
    }

    async fn relay(&self, attempt: &RelayAttempt) -> Result<RelayPayload, RelayClientError> {
        let url = join_url(&attempt.node.service_url, attempt.path.as_deref());
        debug!(
            request_id = %attempt.request_id,
            service_node = %attempt.node.public_key,
            timeout_ms = attempt.timeout.as_millis(),
            "forwarding relay"
        );
        let body = self
            .http
            .send(
                &attempt.http_method,
                &url,
                bytes::Bytes::from(attempt.payload.clone()),
                attempt.timeout,
            )
            .await?;
        let payload = String::from_utf8(body.to_vec())
            .map_err(|_| RelayClientError::Protocol("response is not valid UTF-8".to_string()))?;

        Ok(RelayPayload { payload, service_node: attempt.node.public_key.clone() })
    }

    fn is_usable(&self) -> bool {
        self.http.available_permits() > 0
    }
}
