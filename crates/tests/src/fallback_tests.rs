//! End-to-end relays over HTTP: configured sessions served by mockito nodes,
//! and fallback endpoints taking over once every attempt has failed.

use crate::mock_infrastructure::*;
use serde_json::json;
use std::sync::Arc;
use switchboard_core::{
    client::RelayClientError,
    config::{AppConfig, SessionConfig},
    relay::RelayError,
    runtime::SwitchboardRuntime,
    types::{GatewaySettings, RESULT_SUCCESS, RESULT_TRANSPORT_FAILURE},
};

fn failing_client() -> ScriptedRelayClient {
    ScriptedRelayClient::new(
        nodes(&["node-a"]),
        NodeBehavior::Fail(RelayClientError::Unreachable("connection refused".to_string())),
    )
}

fn with_fallback(url: String) -> AppConfig {
    let mut config = test_config();
    config.relay.relay_retries = 1;
    config.relay.fallback_urls = vec![url];
    config
}

/// Runtime using the configured session client instead of a scripted one.
async fn http_runtime(config: AppConfig) -> SwitchboardRuntime {
    SwitchboardRuntime::builder()
        .with_config(config)
        .with_metrics_sink(Arc::new(RecordingSink::default()))
        .disable_store_sweeper()
        .build()
        .await
        .expect("Failed to build runtime")
}

#[tokio::test]
async fn test_session_nodes_served_over_http() {
    let mut node = NodeMockBuilder::new().await;
    node.mock_result("eth_blockNumber", &json!("0x10"));

    let mut config = test_config();
    config.sessions =
        vec![SessionConfig { blockchain: CHAIN_HASH.to_string(), nodes: vec![node.node("node-a")] }];
    let runtime = http_runtime(config).await;
    let app = test_application(APP_ID, GatewaySettings::default());

    let response =
        runtime.dispatcher().send_relay(relay_request(app, BLOCK_NUMBER_REQUEST)).await.unwrap();

    assert_eq!(response.service_node.as_deref(), Some("node-a"));
    assert_eq!(response.body.into_string(), BLOCK_NUMBER_RESPONSE);
    node.assert_all_hit();
}

#[tokio::test]
async fn test_path_is_appended_to_node_url() {
    let mut node = NodeMockBuilder::new().await;
    node.mock_path("/v1/query/height", r#"{"height":42}"#);

    let mut config = test_config();
    config.sessions =
        vec![SessionConfig { blockchain: CHAIN_HASH.to_string(), nodes: vec![node.node("node-a")] }];
    let runtime = http_runtime(config).await;

    let mut request = relay_request(test_application(APP_ID, GatewaySettings::default()), "");
    request.path = Some("/v1/query/height".to_string());
    let response = runtime.dispatcher().send_relay(request).await.unwrap();

    assert_eq!(response.body.into_string(), r#"{"height":42}"#);
    node.assert_all_hit();
}

#[tokio::test]
async fn test_node_http_errors_are_transport_failures() {
    let mut node = NodeMockBuilder::new().await;
    node.mock_raw(502, "upstream unavailable");

    let mut config = test_config();
    config.relay.relay_retries = 1;
    config.sessions =
        vec![SessionConfig { blockchain: CHAIN_HASH.to_string(), nodes: vec![node.node("node-a")] }];
    let runtime = http_runtime(config).await;
    let app = test_application(APP_ID, GatewaySettings::default());

    let err = runtime
        .dispatcher()
        .send_relay(relay_request(app, BLOCK_NUMBER_REQUEST))
        .await
        .unwrap_err();

    assert_eq!(err, RelayError::AttemptsExhausted);
    let rows = drain_queued_metrics(&runtime).await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.result == RESULT_TRANSPORT_FAILURE));
}

#[tokio::test]
async fn test_fallback_serves_after_attempts_fail() {
    let mut fallback = NodeMockBuilder::new().await;
    fallback.mock_result("eth_blockNumber", &json!("0x10"));

    let client = Arc::new(failing_client());
    let runtime = build_runtime(
        with_fallback(fallback.url()),
        client.clone(),
        Arc::new(RecordingSink::default()),
    )
    .await;
    let app = test_application(APP_ID, GatewaySettings::default());

    let response =
        runtime.dispatcher().send_relay(relay_request(app, BLOCK_NUMBER_REQUEST)).await.unwrap();

    assert!(response.fallback);
    assert_eq!(response.service_node, None);
    assert_eq!(response.body.into_string(), BLOCK_NUMBER_RESPONSE);
    assert_eq!(client.attempts().len(), 2);
    fallback.assert_all_hit();

    let rows = drain_queued_metrics(&runtime).await;
    let last = rows.last().unwrap();
    assert_eq!(last.result, RESULT_SUCCESS);
    assert_eq!(last.service_node, None);
}

#[tokio::test]
async fn test_fallback_response_is_enforced() {
    let mut fallback = NodeMockBuilder::new().await;
    fallback.mock_raw(200, "<html>maintenance</html>");

    let runtime = build_runtime(
        with_fallback(fallback.url()),
        Arc::new(failing_client()),
        Arc::new(RecordingSink::default()),
    )
    .await;
    let app = test_application(APP_ID, GatewaySettings::default());

    let err = runtime
        .dispatcher()
        .send_relay(relay_request(app, BLOCK_NUMBER_REQUEST))
        .await
        .unwrap_err();

    assert_eq!(err, RelayError::AttemptsExhausted);
    // failed fallbacks are logged, not recorded
    let rows = drain_queued_metrics(&runtime).await;
    assert!(rows.iter().all(|r| r.result == RESULT_TRANSPORT_FAILURE));
}

#[tokio::test]
async fn test_fallback_skipped_when_client_unusable() {
    let mut fallback = NodeMockBuilder::new().await;
    fallback.mock_result("eth_blockNumber", &json!("0x10"));

    let client = Arc::new(failing_client());
    client.set_usable(false);
    let runtime = build_runtime(
        with_fallback(fallback.url()),
        client,
        Arc::new(RecordingSink::default()),
    )
    .await;
    let app = test_application(APP_ID, GatewaySettings::default());

    let err = runtime
        .dispatcher()
        .send_relay(relay_request(app, BLOCK_NUMBER_REQUEST))
        .await
        .unwrap_err();

    assert_eq!(err, RelayError::AttemptsExhausted);
}

#[tokio::test]
async fn test_unreachable_fallback_exhausts() {
    // nothing listens on the discard port
    let runtime = build_runtime(
        with_fallback("http://127.0.0.1:9".to_string()),
        Arc::new(failing_client()),
        Arc::new(RecordingSink::default()),
    )
    .await;
    let app = test_application(APP_ID, GatewaySettings::default());

    let err = runtime
        .dispatcher()
        .send_relay(relay_request(app, BLOCK_NUMBER_REQUEST))
        .await
        .unwrap_err();

    assert_eq!(err, RelayError::AttemptsExhausted);
}
