use anyhow::Result;
use axum::serve;
use server::router::{build_router, AppState};
use std::net::SocketAddr;
use switchboard_core::{config::AppConfig, metrics::prometheus_handle, runtime::SwitchboardRuntime};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG=debug` and `RUST_LOG=trace` raise the gateway crates only; any
/// other `RUST_LOG` value is used as a full filter directive.
fn init_logging(config: &AppConfig) {
    let filter = if let Ok(env_filter) = std::env::var("RUST_LOG") {
        if env_filter == "debug" {
            EnvFilter::new("warn,switchboard_core=debug,server=debug")
        } else if env_filter == "trace" {
            EnvFilter::new("warn,switchboard_core=trace,server=trace")
        } else {
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("warn,switchboard_core=debug,server=debug"))
        }
    } else {
        let level = config.logging.level.as_str();
        EnvFilter::new(format!("warn,switchboard_core={level},server={level}"))
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config =
        AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    init_logging(&config);
    info!(environment = %config.environment, "Starting Switchboard relay gateway");
    debug!(
        blockchains = config.blockchains.len(),
        applications = config.applications.len(),
        bind_port = config.server.bind_port,
        "Configuration loaded"
    );

    let addr: SocketAddr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    let prometheus = prometheus_handle();

    let runtime = SwitchboardRuntime::builder()
        .with_config(config)
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize runtime: {e}"))?;

    let state = AppState {
        dispatcher: runtime.dispatcher().clone(),
        applications: runtime.components().registry().clone(),
        prometheus,
    };
    let app = build_router(state, &runtime.config().server);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Relay server listening");

    if let Err(e) = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Relay server error occurred");
    }

    runtime.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
