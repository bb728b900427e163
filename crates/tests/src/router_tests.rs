//! HTTP surface: routing, caller extraction and error bodies.

use crate::mock_infrastructure::*;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use serial_test::serial;
use server::router::{build_router, AppState};
use std::{sync::Arc, time::Duration};
use switchboard_core::{
    config::AppConfig,
    metrics::prometheus_handle,
    runtime::SwitchboardRuntime,
    types::{GatewaySettings, LoadBalancer},
};
use tower::ServiceExt;

const HOST: &str = "eth-mainnet.gateway.test";

async fn app_with(config: AppConfig, client: Arc<ScriptedRelayClient>) -> (SwitchboardRuntime, Router) {
    let runtime = build_runtime(config, client, Arc::new(RecordingSink::default())).await;
    let state = AppState {
        dispatcher: runtime.dispatcher().clone(),
        applications: runtime.components().registry().clone(),
        prometheus: prometheus_handle(),
    };
    let router = build_router(state, &runtime.config().server);
    (runtime, router)
}

fn healthy_client() -> Arc<ScriptedRelayClient> {
    Arc::new(ScriptedRelayClient::new(
        nodes(&["node-a"]),
        NodeBehavior::Respond(BLOCK_NUMBER_RESPONSE.to_string()),
    ))
}

fn post(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("POST").uri(uri).header(header::HOST, HOST)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn error_message(response: axum::response::Response) -> String {
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    body["error"]["message"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let (_runtime, app) = app_with(test_config(), healthy_client()).await;
    let response =
        app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_application_relay_by_host() {
    let client = healthy_client();
    let (_runtime, app) = app_with(test_config(), client.clone()).await;

    let response = app
        .oneshot(post(&format!("/v1/{APP_ID}")).body(Body::from(BLOCK_NUMBER_REQUEST)).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_string(response).await, BLOCK_NUMBER_RESPONSE);
    assert_eq!(client.attempts().len(), 1);
}

#[tokio::test]
async fn test_application_relay_with_path_and_query_blockchain() {
    let client = healthy_client();
    let (_runtime, app) = app_with(test_config(), client.clone()).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/{APP_ID}/v1/query/height?blockchain={CHAIN_HASH}"))
        .header(header::HOST, "localhost:3030")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(client.attempts()[0].path.as_deref(), Some("v1/query/height"));
}

#[tokio::test]
async fn test_caller_request_id_is_echoed() {
    let (runtime, app) = app_with(test_config(), healthy_client()).await;
    let request_id = "3b241101-e2bb-4255-8caf-4136c566a962";

    let response = app
        .oneshot(
            post(&format!("/v1/{APP_ID}"))
                .header("x-request-id", request_id)
                .body(Body::from(BLOCK_NUMBER_REQUEST))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], request_id);
    assert_eq!(drain_queued_metrics(&runtime).await.len(), 1);
}

#[tokio::test]
async fn test_free_form_request_id_reaches_relay() {
    let client = healthy_client();
    let (_runtime, app) = app_with(test_config(), client.clone()).await;

    let response = app
        .oneshot(
            post(&format!("/v1/{APP_ID}"))
                .header("x-request-id", "trace-abc-123")
                .body(Body::from(BLOCK_NUMBER_REQUEST))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "trace-abc-123");
    assert_eq!(client.attempts()[0].request_id, "trace-abc-123");
}

#[tokio::test]
async fn test_unusable_request_id_is_replaced_everywhere() {
    let client = healthy_client();
    let (_runtime, app) = app_with(test_config(), client.clone()).await;

    let response = app
        .oneshot(
            post(&format!("/v1/{APP_ID}"))
                .header("x-request-id", "not usable")
                .body(Body::from(BLOCK_NUMBER_REQUEST))
                .unwrap(),
        )
        .await
        .unwrap();

    let echoed = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_ne!(echoed, "not usable");
    assert_eq!(client.attempts()[0].request_id, echoed);
}

#[tokio::test]
async fn test_error_statuses_and_bodies() {
    let (_runtime, app) = app_with(test_config(), healthy_client()).await;

    let response = app
        .clone()
        .oneshot(post("/v1/no-such-app").body(Body::from(BLOCK_NUMBER_REQUEST)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(error_message(response).await.contains("no-such-app"));

    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/{APP_ID}"))
        .header(header::HOST, "solana.gateway.test")
        .body(Body::from(BLOCK_NUMBER_REQUEST))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "unknown blockchain: solana");

    let response = app
        .oneshot(post(&format!("/v1/{APP_ID}")).body(Body::from("not json")).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await.starts_with("invalid payload"));
}

#[tokio::test]
async fn test_basic_auth_secret_key() {
    let key = "s".repeat(32);
    let mut config = test_config();
    config.applications = vec![test_application(
        APP_ID,
        GatewaySettings { secret_key: key.clone(), secret_key_required: true, ..Default::default() },
    )];
    let client = healthy_client();
    let (_runtime, app) = app_with(config, client.clone()).await;

    let response = app
        .clone()
        .oneshot(post(&format!("/v1/{APP_ID}")).body(Body::from(BLOCK_NUMBER_REQUEST)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(error_message(response).await.starts_with("forbidden"));

    let authorization = format!("Basic {}", STANDARD.encode(format!(":{key}")));
    let response = app
        .oneshot(
            post(&format!("/v1/{APP_ID}"))
                .header(header::AUTHORIZATION, authorization)
                .body(Body::from(BLOCK_NUMBER_REQUEST))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(client.attempts().len(), 1);
}

#[tokio::test]
async fn test_origin_header_is_checked() {
    let mut config = test_config();
    config.applications = vec![test_application(
        APP_ID,
        GatewaySettings {
            whitelist_origins: vec!["https://dapp.example".to_string()],
            ..Default::default()
        },
    )];
    let (_runtime, app) = app_with(config, healthy_client()).await;

    let response = app
        .clone()
        .oneshot(
            post(&format!("/v1/{APP_ID}"))
                .header(header::ORIGIN, "https://evil.example")
                .body(Body::from(BLOCK_NUMBER_REQUEST))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            post(&format!("/v1/{APP_ID}"))
                .header(header::ORIGIN, "https://dapp.example")
                .body(Body::from(BLOCK_NUMBER_REQUEST))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_gateway_timeout() {
    let mut config = test_config();
    config.relay.request_timeout_ms = 100;
    let client = Arc::new(ScriptedRelayClient::new(
        nodes(&["node-a"]),
        NodeBehavior::Delay(Duration::from_secs(5), BLOCK_NUMBER_RESPONSE.to_string()),
    ));
    let (_runtime, app) = app_with(config, client).await;

    let response = app
        .oneshot(post(&format!("/v1/{APP_ID}")).body(Body::from(BLOCK_NUMBER_REQUEST)).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error_message(response).await, "relay timed out");
}

#[tokio::test]
async fn test_load_balancer_relay() {
    let mut config = test_config();
    config.applications.push(test_application("app-2", GatewaySettings::default()));
    config.load_balancers = vec![LoadBalancer {
        id: "lb-1".to_string(),
        application_ids: vec![APP_ID.to_string(), "app-2".to_string()],
        request_timeout_ms: None,
        attempt_timeout_ms: None,
        relay_retries: Some(0),
    }];
    let client = Arc::new(ScriptedRelayClient::new(
        nodes(&["node-a"]),
        NodeBehavior::Respond(BLOCK_NUMBER_RESPONSE.to_string()),
    ));
    let (runtime, app) = app_with(config, client.clone()).await;

    let response = app
        .clone()
        .oneshot(post("/v1/lb/lb-1").body(Body::from(BLOCK_NUMBER_REQUEST)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, BLOCK_NUMBER_RESPONSE);

    let served_by = &client.attempts()[0].credential.application_public_key;
    assert!(served_by == "app-1-pk" || served_by == "app-2-pk");
    assert_eq!(drain_queued_metrics(&runtime).await[0].app_public_key, *served_by);

    let response = app
        .oneshot(post("/v1/lb/lb-404").body(Body::from(BLOCK_NUMBER_REQUEST)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_load_balancer_attempt_timeout_override() {
    let mut config = test_config();
    config.load_balancers = vec![LoadBalancer {
        id: "lb-1".to_string(),
        application_ids: vec![APP_ID.to_string()],
        request_timeout_ms: None,
        attempt_timeout_ms: Some(150),
        relay_retries: None,
    }];
    let client = healthy_client();
    let (_runtime, app) = app_with(config, client.clone()).await;

    let response = app
        .oneshot(post("/v1/lb/lb-1").body(Body::from(BLOCK_NUMBER_REQUEST)).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(client.attempts()[0].timeout, Duration::from_millis(150));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = test_config();
    config.server.max_body_bytes = 64;
    let client = healthy_client();
    let (_runtime, app) = app_with(config, client.clone()).await;

    let payload = format!(r#"{{"method":"eth_call","params":["{}"]}}"#, "a".repeat(256));
    let response =
        app.oneshot(post(&format!("/v1/{APP_ID}")).body(Body::from(payload)).unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(client.attempts().is_empty());
}

#[tokio::test]
#[serial]
async fn test_metrics_endpoint_exposes_relay_counters() {
    let (_runtime, app) = app_with(test_config(), healthy_client()).await;

    let response = app
        .clone()
        .oneshot(post(&format!("/v1/{APP_ID}")).body(Body::from(BLOCK_NUMBER_REQUEST)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response =
        app.oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; version=0.0.4; charset=utf-8"
    );
    let text = body_string(response).await;
    assert!(text.contains("relay_requests_total"));
    assert!(text.contains(CHAIN_HASH));
}
