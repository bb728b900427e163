//! Relay HTTP routes.

use crate::middleware::{
    create_request_id_layers, drop_unusable_request_id, request_id_from_headers,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::map_request,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use switchboard_core::{
    config::ServerConfig,
    registry::{blockchain_alias_from_host, ApplicationRegistry},
    relay::{CallerCredentials, RelayDispatcher, RelayError, RelayRequest, RelayResponse, RelayType},
    types::Application,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::limit::RequestBodyLimitLayer;
use std::time::Duration;
use tracing::{info, warn};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<RelayDispatcher>,
    pub applications: Arc<dyn ApplicationRegistry>,
    pub prometheus: PrometheusHandle,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    /// Explicit blockchain alias; takes precedence over the `Host` label.
    pub blockchain: Option<String>,
}

/// Error body shared by every non-success response: `{"error":{"message":..}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": { "message": self.message } }))).into_response()
    }
}

/// Builds the public router: relay routes behind body-size and concurrency
/// limits, plus unthrottled `/health` and `/metrics`.
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let (set_request_id, propagate_request_id) = create_request_id_layers();

    let public = Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state.clone());

    let relay = Router::new()
        .route("/v1/lb/{load_balancer_id}", post(handle_load_balancer_relay))
        .route("/v1/{application_id}", post(handle_application_relay))
        .route("/v1/{application_id}/{*path}", post(handle_application_path_relay))
        .with_state(state)
        .layer(ConcurrencyLimitLayer::new(server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(server.max_body_bytes));

    public
        .merge(relay)
        .layer(propagate_request_id)
        .layer(set_request_id)
        .layer(map_request(drop_unusable_request_id))
}

pub async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

pub async fn handle_application_relay(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
    Query(query): Query<RelayQuery>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let application = find_application(&state, &application_id).await?;
    let inbound = Inbound::new(&headers, query, method, body, None)?;
    relay(&state, inbound, RelayType::Application, application_id, application, None).await
}

pub async fn handle_application_path_relay(
    State(state): State<AppState>,
    Path((application_id, path)): Path<(String, String)>,
    Query(query): Query<RelayQuery>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let application = find_application(&state, &application_id).await?;
    let inbound = Inbound::new(&headers, query, method, body, Some(path))?;
    relay(&state, inbound, RelayType::Application, application_id, application, None).await
}

pub async fn handle_load_balancer_relay(
    State(state): State<AppState>,
    Path(load_balancer_id): Path<String>,
    Query(query): Query<RelayQuery>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let load_balancer = state
        .applications
        .find_load_balancer(&load_balancer_id)
        .await
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("load balancer not found: {load_balancer_id}"),
            )
        })?;
    let inbound = Inbound::new(&headers, query, method, body, None)?;

    let blockchain = state
        .dispatcher
        .resolve_blockchain(&inbound.blockchain_alias)
        .await
        .ok_or_else(|| RelayError::UnknownBlockchain(inbound.blockchain_alias.clone()))?;
    let application_id = state
        .dispatcher
        .picker()
        .select_application(&load_balancer.id, &load_balancer.application_ids, &blockchain.hash)
        .await
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("load balancer has no applications: {load_balancer_id}"),
            )
        })?;
    let application = find_application(&state, &application_id).await?;

    let overrides = Overrides {
        request_timeout: load_balancer.request_timeout(),
        attempt_timeout: load_balancer.attempt_timeout(),
        relay_retries: load_balancer.relay_retries,
    };
    relay(&state, inbound, RelayType::LoadBalancer, load_balancer.id, application, Some(overrides))
        .await
}

#[derive(Default)]
struct Overrides {
    request_timeout: Option<Duration>,
    attempt_timeout: Option<Duration>,
    relay_retries: Option<u32>,
}

/// Request parts shared by every relay route.
struct Inbound {
    request_id: String,
    blockchain_alias: String,
    caller: CallerCredentials,
    raw_payload: String,
    path: Option<String>,
    http_method: String,
}

impl Inbound {
    fn new(
        headers: &HeaderMap,
        query: RelayQuery,
        method: Method,
        body: Bytes,
        path: Option<String>,
    ) -> Result<Self, ApiError> {
        let blockchain_alias = query
            .blockchain
            .filter(|alias| !alias.is_empty())
            .or_else(|| {
                header_str(headers, header::HOST.as_str())
                    .and_then(blockchain_alias_from_host)
                    .map(str::to_string)
            })
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "missing blockchain"))?;

        let raw_payload = String::from_utf8(body.to_vec())
            .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "request body is not valid UTF-8"))?;

        Ok(Self {
            request_id: request_id_from_headers(headers),
            blockchain_alias,
            caller: CallerCredentials {
                secret_key: basic_auth_password(headers),
                origin: header_str(headers, header::ORIGIN.as_str()).map(str::to_string),
                user_agent: header_str(headers, header::USER_AGENT.as_str()).map(str::to_string),
            },
            raw_payload,
            path,
            http_method: method.as_str().to_string(),
        })
    }
}

async fn find_application(state: &AppState, application_id: &str) -> Result<Application, ApiError> {
    state
        .applications
        .find(application_id)
        .await
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, format!("application not found: {application_id}"))
        })
}

async fn relay(
    state: &AppState,
    inbound: Inbound,
    relay_type: RelayType,
    type_id: String,
    application: Application,
    overrides: Option<Overrides>,
) -> Result<Response, ApiError> {
    let overrides = overrides.unwrap_or_default();
    let request_id = inbound.request_id.clone();
    let request = RelayRequest {
        request_id: inbound.request_id,
        relay_type,
        type_id,
        blockchain_alias: inbound.blockchain_alias,
        application,
        raw_payload: inbound.raw_payload,
        path: inbound.path,
        http_method: inbound.http_method,
        caller: inbound.caller,
        request_timeout: overrides.request_timeout,
        attempt_timeout: overrides.attempt_timeout,
        relay_retries: overrides.relay_retries,
    };

    match state.dispatcher.send_relay(request).await {
        Ok(response) => {
            info!(
                request_id = %request_id,
                relay_type = %relay_type,
                service_node = response.service_node.as_deref().unwrap_or_default(),
                fallback = response.fallback,
                "relay served"
            );
            Ok(relay_response(response))
        }
        Err(e) => {
            warn!(request_id = %request_id, relay_type = %relay_type, error = %e, "relay failed");
            Err(e.into())
        }
    }
}

fn relay_response(response: RelayResponse) -> Response {
    let content_type =
        if response.body.is_json() { "application/json" } else { "text/plain; charset=utf-8" };
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], response.body.into_string())
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

/// Extracts the password of an `Authorization: Basic` header. The user part
/// is ignored.
fn basic_auth_password(headers: &HeaderMap) -> Option<String> {
    let value = header_str(headers, header::AUTHORIZATION.as_str())?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_, password) = credentials.split_once(':')?;
    (!password.is_empty()).then(|| password.to_string())
}
