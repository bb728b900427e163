//! Runtime wiring for the relay gateway.
//!
//! [`SwitchboardRuntimeBuilder`] turns an [`AppConfig`](crate::config::AppConfig)
//! into a fully wired [`SwitchboardRuntime`]: the quality store and its
//! sweeper, node selection, the sync filter, the metrics pipeline, the relay
//! client and the dispatcher. The runtime owns the background tasks and stops
//! them on [`SwitchboardRuntime::shutdown`].
//!
//! ```no_run
//! # use switchboard_core::{config::AppConfig, runtime::SwitchboardRuntimeBuilder};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! let runtime = SwitchboardRuntimeBuilder::new().with_config(config).build().await?;
//!
//! let dispatcher = runtime.dispatcher().clone();
//! // hand `dispatcher` to the HTTP layer ...
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{RuntimeError, SwitchboardRuntimeBuilder};
pub use components::SwitchboardComponents;
pub use lifecycle::SwitchboardRuntime;
