//! Domain records consumed from the gateway's collaborators.
//!
//! Every record has a fixed schema. Open-ended extra attributes that registries
//! attach to entities live in a separate string-keyed `metadata` map instead of
//! being modelled as ad-hoc fields.
//!
//! # Identifiers
//!
//! - A [`Blockchain`] is addressed by one of its `aliases` (the first DNS label of
//!   the inbound host, e.g. `eth-mainnet`) and identified internally by its
//!   canonical `hash` (e.g. `0021`). Quality records and metrics are keyed by the
//!   hash.
//! - A [`Node`] is identified by its `public_key`.
//! - An [`Application`] is identified by its `id`.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, time::Duration};

/// Result code recorded for a successful relay.
pub const RESULT_SUCCESS: u16 = 200;

/// Result code recorded when the protocol client fails (transport/protocol error).
pub const RESULT_TRANSPORT_FAILURE: u16 = 500;

/// Result code recorded when a node reports success but the payload fails the
/// blockchain's declared response-format enforcement.
pub const RESULT_ENFORCEMENT_FAILURE: u16 = 503;

/// Response-format enforcement declared by a blockchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnforceResult {
    /// Payload must be a well-formed, non-error JSON document.
    Json,
}

/// Blockchain configuration as returned by the blockchain registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blockchain {
    /// Registry identifier.
    pub id: String,

    /// Canonical chain hash used by the relay network (e.g. `0021`).
    pub hash: String,

    /// Host labels / identifiers that resolve to this chain.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Optional response-format enforcement.
    #[serde(default)]
    pub enforce_result: Option<EnforceResult>,

    /// Optional sync-check request (a JSON-RPC body used to compare chain
    /// height across nodes).
    #[serde(default)]
    pub sync_check: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Blockchain {
    /// Returns `true` if `alias` resolves to this chain (case-insensitive).
    #[must_use]
    pub fn matches(&self, alias: &str) -> bool {
        self.id.eq_ignore_ascii_case(alias) ||
            self.hash.eq_ignore_ascii_case(alias) ||
            self.aliases.iter().any(|a| a.eq_ignore_ascii_case(alias))
    }

    /// Returns `true` if responses for this chain must be valid JSON.
    #[must_use]
    pub fn enforces_json(&self) -> bool {
        matches!(self.enforce_result, Some(EnforceResult::Json))
    }
}

/// Signed authorization artifact proving an application may relay on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredential {
    pub version: String,
    pub client_public_key: String,
    pub application_public_key: String,
    pub application_signature: String,
}

/// Gateway-level security settings of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Stored secret key. Plaintext for 32-character keys, hex-encoded
    /// AES-256-GCM ciphertext for longer keys.
    #[serde(default)]
    pub secret_key: String,

    #[serde(default)]
    pub secret_key_required: bool,

    /// Allowed `Origin` values (exact, case-insensitive). Empty allows all.
    #[serde(default)]
    pub whitelist_origins: Vec<String>,

    /// Allowed `User-Agent` fragments (substring, case-insensitive). Empty allows all.
    #[serde(default)]
    pub whitelist_user_agents: Vec<String>,
}

/// A registered caller entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub public_key: String,
    pub credential: ClientCredential,
    #[serde(default)]
    pub settings: GatewaySettings,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A grouping of applications that share traffic for the same callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub application_ids: Vec<String>,

    /// Overall time budget override in milliseconds.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Per-attempt budget override in milliseconds.
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,

    /// Retry count override.
    #[serde(default)]
    pub relay_retries: Option<u32>,
}

impl LoadBalancer {
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// A backend service provider capable of executing relays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub public_key: String,
    pub service_url: String,
}

impl Node {
    #[must_use]
    pub fn new(public_key: impl Into<String>, service_url: impl Into<String>) -> Self {
        Self { public_key: public_key.into(), service_url: service_url.into() }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.public_key)
    }
}
