//! Request correlation IDs.
//!
//! Every request carries an `X-Request-ID`: the caller's if it is usable, a
//! fresh UUID v4 otherwise. The same value is echoed on the response and tags
//! the relay's attempts, log lines and metrics.

use axum::{
    extract::Request,
    http::{header::HeaderValue, HeaderMap, HeaderName},
};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

/// The header name for request correlation IDs.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Longest caller-supplied id kept as is.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Whether a caller-supplied id can be carried through logs and metric rows:
/// non-empty visible ASCII, at most [`MAX_REQUEST_ID_LEN`] bytes.
#[must_use]
pub fn is_usable_request_id(value: &HeaderValue) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_REQUEST_ID_LEN
        && bytes.iter().all(u8::is_ascii_graphic)
}

/// Drops an unusable `X-Request-ID` so [`SetRequestIdLayer`] generates one.
///
/// Runs outside the request id layers; the id the handlers see is then
/// always the one echoed to the caller.
pub async fn drop_unusable_request_id(mut request: Request) -> Request {
    let unusable = request.headers().get(&X_REQUEST_ID).is_some_and(|v| !is_usable_request_id(v));
    if unusable {
        request.headers_mut().remove(&X_REQUEST_ID);
    }
    request
}

/// Reads the request id set by the request id layers.
#[must_use]
pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(&X_REQUEST_ID)
        .filter(|v| is_usable_request_id(v))
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}

/// Request id generator for tower-http's request id middleware.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestIdGenerator;

impl MakeRequestId for UuidRequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).ok()?))
    }
}

/// Creates the request ID layer stack: `SetRequestIdLayer` fills in a missing
/// id and `PropagateRequestIdLayer` copies it onto the response. Apply the
/// propagate layer first, then the set layer, then [`drop_unusable_request_id`].
pub fn create_request_id_layers() -> (SetRequestIdLayer<UuidRequestIdGenerator>, PropagateRequestIdLayer)
{
    (
        SetRequestIdLayer::new(X_REQUEST_ID.clone(), UuidRequestIdGenerator),
        PropagateRequestIdLayer::new(X_REQUEST_ID.clone()),
    )
}
