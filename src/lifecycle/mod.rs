//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Initialize metrics → Build router → Run orchestrator
//!
//! Orchestration (orchestrator.rs):
//!     Arm signals → Serve → first of {signal, cancel, serve exit}
//!         → shutdown(deadline) → Drained | TimedOut | SelfTerminated
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → one Termination per run
//! ```
//!
//! # Design Decisions
//! - Signals armed before the server starts
//! - Exactly one shutdown attempt per run
//! - Shutdown has a deadline; leftover connections are aborted after it

pub mod orchestrator;
pub mod server;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use orchestrator::{run_server, LifecycleState, Orchestrator, RunError};
pub use server::{Server, ServerError};
pub use shutdown::{Shutdown, ShutdownContext};
pub use signals::{OsSignals, SignalSource, SignalSubscription, Termination};
