//! HTTP middleware for the relay server.

pub mod correlation_id;

pub use correlation_id::{
    create_request_id_layers, drop_unusable_request_id, request_id_from_headers,
    UuidRequestIdGenerator, X_REQUEST_ID,
};
