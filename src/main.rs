//! Graceful HTTP server
//!
//! Serves HTTP until SIGINT/SIGTERM, then drains in-flight requests within a
//! bounded shutdown window.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────┐
//!   SIGINT/SIGTERM │                  lifecycle                       │
//!   ───────────────┼─▶ signals ──▶ orchestrator ──▶ shutdown(deadline)│
//!                  │                   │                  │           │
//!                  │                   ▼ serve            ▼           │
//!                  │  ┌─────────┐   ┌─────────┐    ┌────────────┐     │
//!   Client ────────┼─▶│   net   │──▶│  http   │───▶│  handlers  │     │
//!                  │  │listener │   │ server  │    │  (router)  │     │
//!                  │  └─────────┘   └─────────┘    └────────────┘     │
//!                  │                                                  │
//!                  │  config · observability (logging, metrics)       │
//!                  └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use graceful_server::config::{load_config, ServerConfig};
use graceful_server::lifecycle::startup::{self, StartupError};
use graceful_server::observability::logging;

#[derive(Parser)]
#[command(name = "graceful-server")]
#[command(about = "HTTP server with bounded graceful shutdown", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the graceful shutdown timeout, in milliseconds
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(timeout_ms) = cli.shutdown_timeout_ms {
        config.shutdown.timeout_ms = timeout_ms;
    }

    logging::init_logging(&config.observability);

    tracing::info!("graceful-server v{} starting", env!("CARGO_PKG_VERSION"));

    match startup::run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(StartupError::Run(e)) if e.is_deadline_exceeded() => {
            tracing::error!(error = %e, "In-flight requests were aborted at the shutdown deadline");
            Err(e.into())
        }
        Err(e) => {
            tracing::error!(error = %e, "Server exited with an error");
            Err(e.into())
        }
    }
}
