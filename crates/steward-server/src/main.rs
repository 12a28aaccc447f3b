//! Steward - fleet keepalive, leader election and change callbacks

use anyhow::Context;
use clap::Parser;
use steward_core::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use steward_core::signals::wait_for_shutdown_signal;
use steward_server::config::{Cli, Settings};
use steward_server::node::Node;
use steward_server::{api, version};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_cli(cli).context("invalid configuration")?;

    init_tracing(TracingConfig::for_service("steward").verbose(settings.verbose))
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to initialize tracing")?;

    info!(
        version = %version::full_version(),
        group = %settings.group,
        coordinator = settings.coordinator,
        worker = settings.worker,
        "Starting steward"
    );

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let node = Node::start(&settings, metrics_state).await?;
    let app = api::create_router(node.state());

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!(bind = %settings.bind, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => info!(signal = %signal, "Shutdown signal received"),
                Err(e) => warn!(error = %e, "signal handler failed, shutting down"),
            }
        })
        .await
        .context("API server failed")?;

    node.shutdown().await;
    shutdown_tracing();
    Ok(())
}
