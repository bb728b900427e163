//! Protocol client boundary.
//!
//! The relay network's session and relay protocol is a black box to the
//! gateway: it asks for the nodes serving an application on a chain, and sends
//! a payload to one of them. [`RelayClient`] is that boundary.
//!
//! [`StaticSessionClient`] is the shipped implementation: sessions come from
//! configuration and each node is a plain JSON-RPC HTTP endpoint reached through
//! the pooled [`HttpClient`].

pub mod http_client;
pub mod static_session;

pub use http_client::{HttpClient, HttpClientConfig};
pub use static_session::StaticSessionClient;

use crate::types::{ClientCredential, Node};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the protocol client. All of them count as transport
/// failures for the node they were sent to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayClientError {
    #[error("relay timed out")]
    Timeout,

    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no session for blockchain {0}")]
    NoSession(String),
}

/// One dispatch to one node.
#[derive(Debug, Clone)]
pub struct RelayAttempt {
    /// Correlation id of the client request this attempt serves.
    pub request_id: String,
    pub node: Node,
    /// Canonical blockchain hash.
    pub blockchain: String,
    pub credential: ClientCredential,
    /// Normalized request body.
    pub payload: String,
    /// Optional path appended to the node's service URL.
    pub path: Option<String>,
    /// HTTP method forwarded to the node (`POST` for JSON-RPC).
    pub http_method: String,
    pub timeout: Duration,
}

/// Raw payload returned by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPayload {
    pub payload: String,
    pub service_node: String,
}

#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Nodes in the current session of an application on a chain.
    async fn session_nodes(
        &self,
        credential: &ClientCredential,
        blockchain: &str,
    ) -> Result<Vec<Node>, RelayClientError>;

    async fn relay(&self, attempt: &RelayAttempt) -> Result<RelayPayload, RelayClientError>;

    /// Whether the client is ready to serve traffic. Fallback dispatch is
    /// skipped when it is not.
    fn is_usable(&self) -> bool {
        true
    }
}

/// Appends `path` to `base`, normalizing the slash between them.
#[must_use]
pub fn join_url(base: &str, path: Option<&str>) -> String {
    match path.map(|p| p.trim_start_matches('/')).filter(|p| !p.is_empty()) {
        Some(path) => format!("{}/{path}", base.trim_end_matches('/')),
        None => base.to_string(),
    }
}
