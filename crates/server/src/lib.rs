//! HTTP front end for the Switchboard relay gateway.
//!
//! [`router::build_router`] exposes the relay endpoints, `/health` and
//! `/metrics` over a [`router::AppState`]; the binary in `main.rs` wires the
//! state from configuration.

pub mod middleware;
pub mod router;
