//! # Switchboard Core
//!
//! Dispatch core for a relay gateway that forwards blockchain RPC requests
//! to a pool of service nodes.
//!
//! This crate provides:
//!
//! - **[`relay`]**: The dispatcher. Authorizes the caller, retries relay
//!   attempts within a time budget, enforces JSON responses and falls back to
//!   fixed endpoints when every attempt fails.
//!
//! - **[`selection`]**: Quality-weighted selection of applications and
//!   service nodes from their recent success rate and latency.
//!
//! - **[`sync`]**: Keeps only nodes in consensus with their peers, caching
//!   the verdict per node set.
//!
//! - **[`metrics`]**: Records every relay outcome, batches rows for a
//!   durable SQLite sink and feeds results back into selection.
//!
//! - **[`store`]**: The TTL key-value store shared by the components above.
//!
//! - **[`client`]**, **[`registry`]**: Session discovery, relay transport and
//!   blockchain/application lookups.
//!
//! - **[`runtime`]**: Wires everything from an [`config::AppConfig`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RelayDispatcher                       │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────┐  │
//! │  │  CherryPicker  │  │   SyncFilter   │  │MetricsRecorder │  │
//! │  └───────┬────────┘  └───────┬────────┘  └───┬────────┬───┘  │
//! │          │                   │               │        │      │
//! │  ┌───────▼───────────────────▼───────────────▼──┐ ┌───▼────┐ │
//! │  │                 QualityStore                 │ │ SQLite │ │
//! │  │  service logs · failure flags · sync cache   │ │  sink  │ │
//! │  └──────────────────────────────────────────────┘ └────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Resolve chain│ ─── Unknown ──► 400
//! │ Parse payload│ ─── Invalid ──► 400
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │  Authorize   │ ─── Denied ──► 403
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │   Attempt    │ ─── Success ──► Response
//! │ session, sync│
//! │ select, relay│ ─── Budget spent ──► 504
//! └──────┬───────┘
//!        │ Retries exhausted
//!        ▼
//! ┌──────────────┐
//! │   Fallback   │ ─── Success ──► Response
//! └──────┬───────┘
//!        │
//!        ▼
//!   Error Response
//! ```

pub mod client;
pub mod config;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod runtime;
pub mod selection;
pub mod store;
pub mod sync;
pub mod types;
