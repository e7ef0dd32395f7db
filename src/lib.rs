//! Graceful HTTP server lifecycle library

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{run_server, Orchestrator, RunError, Server, ServerError, Shutdown, ShutdownContext};
