//! Run a server until termination, then shut it down within a deadline.
//!
//! ```text
//! Idle ──▶ Serving ──▶ ShuttingDown ──▶ Drained
//!             │                  └────▶ TimedOut
//!             └──────▶ SelfTerminated
//! ```

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::server::{Server, ServerError};
use crate::lifecycle::shutdown::ShutdownContext;
use crate::lifecycle::signals::{OsSignals, SignalSource, SignalSubscription, Termination};
use crate::observability::metrics;

/// Extra time granted past the shutdown deadline for the server to finish
/// force-closing connections.
pub const DEFAULT_CLEANUP_GRACE: Duration = Duration::from_secs(1);

/// Outcome of an orchestrated run that did not end cleanly.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Termination handlers could not be installed; the server was not started.
    #[error("failed to register termination signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    /// The serve loop failed on its own.
    #[error("server stopped unexpectedly: {0}")]
    Serve(#[source] ServerError),

    /// Work was still outstanding when the shutdown deadline elapsed.
    ///
    /// `outstanding` is `None` when the server did not report back within
    /// the cleanup grace.
    #[error("graceful shutdown did not finish within {timeout:?}")]
    DeadlineExceeded {
        timeout: Duration,
        outstanding: Option<usize>,
    },

    /// Shutdown failed for a reason other than the deadline.
    #[error("graceful shutdown failed: {0}")]
    Shutdown(#[source] ServerError),
}

impl RunError {
    /// Whether shutdown was cut short by its deadline.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, RunError::DeadlineExceeded { .. })
    }
}

/// Lifecycle of one orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Serving,
    ShuttingDown,
    Drained,
    TimedOut,
    SelfTerminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Serving => "serving",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Drained => "drained",
            LifecycleState::TimedOut => "timed_out",
            LifecycleState::SelfTerminated => "self_terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Drained | LifecycleState::TimedOut | LifecycleState::SelfTerminated
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What moved the run out of `Serving`.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    Signal(Termination),
    Cancelled,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Signal(signal) => write!(f, "{}", signal),
            Trigger::Cancelled => write!(f, "parent cancelled"),
        }
    }
}

/// Drives one server from start to a reported terminal state.
#[derive(Debug, Clone)]
pub struct Orchestrator<G = OsSignals> {
    shutdown_timeout: Duration,
    cleanup_grace: Duration,
    signals: G,
}

impl Orchestrator<OsSignals> {
    /// Orchestrator listening for SIGINT/SIGTERM.
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            shutdown_timeout,
            cleanup_grace: DEFAULT_CLEANUP_GRACE,
            signals: OsSignals,
        }
    }
}

impl<G: SignalSource> Orchestrator<G> {
    /// Replace the termination source.
    pub fn with_signals<H: SignalSource>(self, signals: H) -> Orchestrator<H> {
        Orchestrator {
            shutdown_timeout: self.shutdown_timeout,
            cleanup_grace: self.cleanup_grace,
            signals,
        }
    }

    /// Set how long to wait past the deadline for the server to finish closing.
    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Serve until a termination signal or `parent` cancellation, then shut
    /// the server down within the configured timeout.
    ///
    /// Issues at most one shutdown. If the serve loop ends on its own first,
    /// no shutdown is attempted and its result is returned as-is.
    pub async fn run<S: Server>(&self, parent: &CancellationToken, server: &S) -> Result<(), RunError> {
        let mut state = LifecycleState::Idle;

        // Armed before the server starts so an early signal is buffered.
        let mut signals = self.signals.subscribe().map_err(RunError::Signal)?;

        let serve = server.serve();
        tokio::pin!(serve);
        state = transition(state, LifecycleState::Serving);

        let trigger = tokio::select! {
            biased;

            result = &mut serve => {
                transition(state, LifecycleState::SelfTerminated);
                metrics::record_shutdown(LifecycleState::SelfTerminated.as_str(), Duration::ZERO);
                return match result {
                    Ok(()) => {
                        tracing::info!("Server stopped without a termination request");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Server failed");
                        Err(RunError::Serve(e))
                    }
                };
            }
            Some(signal) = signals.recv() => Trigger::Signal(signal),
            _ = parent.cancelled() => Trigger::Cancelled,
        };

        state = transition(state, LifecycleState::ShuttingDown);
        tracing::info!(
            trigger = %trigger,
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "Starting graceful shutdown"
        );

        let started = Instant::now();
        let ctx = ShutdownContext::new(self.shutdown_timeout);
        let bound = ctx.deadline() + self.cleanup_grace;
        let shutdown = server.shutdown(ctx.clone());

        let joined = tokio::time::timeout_at(bound, async { tokio::join!(&mut serve, shutdown) }).await;

        let outcome = match joined {
            Err(_) => {
                ctx.cancel();
                tracing::error!(
                    grace_ms = self.cleanup_grace.as_millis() as u64,
                    "Server did not finish closing within the cleanup grace"
                );
                Err(RunError::DeadlineExceeded {
                    timeout: self.shutdown_timeout,
                    outstanding: None,
                })
            }
            Ok((_, Err(ServerError::DeadlineExceeded { outstanding }))) => Err(RunError::DeadlineExceeded {
                timeout: self.shutdown_timeout,
                outstanding: Some(outstanding),
            }),
            Ok((_, Err(e))) => Err(RunError::Shutdown(e)),
            Ok((Err(e), Ok(()))) => Err(RunError::Serve(e)),
            Ok((Ok(()), Ok(()))) => Ok(()),
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(()) => {
                transition(state, LifecycleState::Drained);
                metrics::record_shutdown(LifecycleState::Drained.as_str(), elapsed);
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Graceful shutdown complete");
            }
            Err(e) if e.is_deadline_exceeded() => {
                transition(state, LifecycleState::TimedOut);
                metrics::record_shutdown(LifecycleState::TimedOut.as_str(), elapsed);
                tracing::warn!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "Graceful shutdown timed out");
            }
            Err(e) => {
                metrics::record_shutdown("failed", elapsed);
                tracing::error!(error = %e, "Graceful shutdown failed");
            }
        }

        outcome
    }
}

fn transition(from: LifecycleState, to: LifecycleState) -> LifecycleState {
    tracing::debug!(from = %from, to = %to, "Lifecycle transition");
    to
}

/// Serve `server` until SIGINT/SIGTERM or `parent` cancellation, then shut
/// it down within `shutdown_timeout`.
pub async fn run_server<S: Server>(
    parent: &CancellationToken,
    server: &S,
    shutdown_timeout: Duration,
) -> Result<(), RunError> {
    Orchestrator::new(shutdown_timeout).run(parent, server).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_exceeded_is_distinguishable() {
        let timed_out = RunError::DeadlineExceeded {
            timeout: Duration::from_millis(5),
            outstanding: Some(1),
        };
        assert!(timed_out.is_deadline_exceeded());

        let bind = RunError::Serve(ServerError::Bind {
            address: "127.0.0.1:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        });
        assert!(!bind.is_deadline_exceeded());
        assert!(!RunError::Shutdown(ServerError::AlreadyShutdown).is_deadline_exceeded());
    }

    #[test]
    fn terminal_states() {
        assert!(LifecycleState::Drained.is_terminal());
        assert!(LifecycleState::TimedOut.is_terminal());
        assert!(LifecycleState::SelfTerminated.is_terminal());
        assert!(!LifecycleState::Idle.is_terminal());
        assert!(!LifecycleState::Serving.is_terminal());
        assert!(!LifecycleState::ShuttingDown.is_terminal());
    }

    #[test]
    fn builder_keeps_timeout() {
        let orchestrator = Orchestrator::new(Duration::from_secs(5))
            .with_cleanup_grace(Duration::from_millis(10))
            .with_signals(crate::lifecycle::Shutdown::new());
        assert_eq!(orchestrator.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(orchestrator.cleanup_grace, Duration::from_millis(10));
    }
}
