//! The server capability driven by the orchestrator.
//!
//! # Responsibilities
//! - Define what a runnable server must provide (serve + graceful shutdown)
//! - Define the failure taxonomy servers report back
//!
//! # Design Decisions
//! - Both methods take `&self` so serve and shutdown can run concurrently
//!   against a borrowed handle
//! - `serve` returns `Ok(())` once it stops because shutdown began

use std::future::Future;

use crate::lifecycle::shutdown::ShutdownContext;

/// Errors reported by a [`Server`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening address could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed outside of an intentional shutdown.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    /// Shutdown deadline elapsed before all connections drained.
    #[error("shutdown deadline exceeded with {outstanding} connection(s) still open")]
    DeadlineExceeded { outstanding: usize },

    /// `serve` was called while the server was already running.
    #[error("server is already serving")]
    AlreadyServing,

    /// `shutdown` was called more than once.
    #[error("shutdown already requested")]
    AlreadyShutdown,
}

/// A server whose lifecycle can be orchestrated.
///
/// `serve` runs until the server stops or fails. `shutdown` stops accepting,
/// lets in-flight work finish, and force-closes whatever is left once the
/// context's deadline passes, in which case it returns
/// [`ServerError::DeadlineExceeded`]. Shutdown is only ever issued once.
pub trait Server: Send + Sync {
    /// Run the accept/serve loop.
    fn serve(&self) -> impl Future<Output = Result<(), ServerError>> + Send;

    /// Gracefully stop the server, bounded by `ctx`'s deadline.
    fn shutdown(&self, ctx: ShutdownContext) -> impl Future<Output = Result<(), ServerError>> + Send;
}
