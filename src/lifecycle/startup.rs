//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize metrics exposition
//! - Build the HTTP router and server
//! - Hand the server to the orchestrator and wait for the terminal state
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds inside the serve loop, so bind failures surface as
//!   a self-terminated run

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::http::{handlers, HttpServer};
use crate::lifecycle::orchestrator::{Orchestrator, RunError};
use crate::observability::metrics::{self, MetricsError};

/// Errors that end the process.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Run(#[from] RunError),
}

/// Start the configured server and block until it reaches a terminal state.
pub async fn run(config: ServerConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        metrics::init_metrics(&config.observability.metrics_address)?;
    }

    let router = handlers::build_router(&config);
    let server = HttpServer::new(config.listener.clone(), router);

    let orchestrator = Orchestrator::new(config.shutdown.timeout())
        .with_cleanup_grace(config.shutdown.cleanup_grace());

    tracing::info!(
        bind_address = %config.listener.bind_address,
        shutdown_timeout_ms = config.shutdown.timeout_ms,
        "Starting server"
    );

    orchestrator.run(&CancellationToken::new(), &server).await?;
    Ok(())
}
