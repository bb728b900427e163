//! HTTP node mocks.
//!
//! Wraps mockito so tests can stand up service nodes and fallback endpoints
//! that answer JSON-RPC over plain HTTP.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use switchboard_core::types::Node;

pub struct NodeMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl NodeMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// A [`Node`] served by this mock.
    #[must_use]
    pub fn node(&self, public_key: &str) -> Node {
        Node::new(public_key, self.url())
    }

    /// Answers `method` with a JSON-RPC result.
    pub fn mock_result(&mut self, method: &str, result: &Value) -> &mut Self {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string();
        let mock = self
            .server
            .mock("POST", Matcher::Any)
            .match_body(Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect_at_least(1)
            .create();
        self.mocks.push(mock);
        self
    }

    /// Answers every POST with `status` and a raw body.
    pub fn mock_raw(&mut self, status: usize, body: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", Matcher::Any)
            .with_status(status)
            .with_body(body)
            .expect_at_least(1)
            .create();
        self.mocks.push(mock);
        self
    }

    /// Answers POSTs to exactly `path`.
    pub fn mock_path(&mut self, path: &str, body: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", path)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect_at_least(1)
            .create();
        self.mocks.push(mock);
        self
    }

    /// Asserts every registered mock was hit at least once.
    pub fn assert_all_hit(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }
}
