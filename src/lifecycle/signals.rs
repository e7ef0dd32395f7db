//! OS signal handling.
//!
//! # Responsibilities
//! - Register termination handlers (SIGINT, SIGTERM) per orchestrator run
//! - Translate delivered signals into a [`Termination`]
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A subscription is armed as soon as it is created, so signals delivered
//!   before anyone awaits it are buffered rather than lost
//! - Dropping the subscription unregisters it

use std::fmt;
use std::future::Future;

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Programmatic request through [`Shutdown`](crate::lifecycle::Shutdown).
    Requested,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Interrupt => write!(f, "SIGINT"),
            Termination::Terminate => write!(f, "SIGTERM"),
            Termination::Requested => write!(f, "requested"),
        }
    }
}

/// Something that can deliver termination requests.
pub trait SignalSource {
    type Subscription: SignalSubscription;

    /// Arm a fresh, independent subscription.
    fn subscribe(&self) -> std::io::Result<Self::Subscription>;
}

/// A scoped registration for termination requests.
pub trait SignalSubscription: Send {
    /// Wait for the next termination request.
    ///
    /// Returns `None` when the source can never deliver again.
    fn recv(&mut self) -> impl Future<Output = Option<Termination>> + Send;
}

/// Process termination signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

impl SignalSource for OsSignals {
    type Subscription = OsSubscription;

    fn subscribe(&self) -> std::io::Result<Self::Subscription> {
        OsSubscription::register()
    }
}

/// Registered SIGINT/SIGTERM streams.
#[cfg(unix)]
#[derive(Debug)]
pub struct OsSubscription {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSubscription {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }
}

#[cfg(unix)]
impl SignalSubscription for OsSubscription {
    async fn recv(&mut self) -> Option<Termination> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(Termination::Interrupt),
            Some(()) = self.terminate.recv() => Some(Termination::Terminate),
            else => None,
        }
    }
}

/// Registered Ctrl-C stream.
#[cfg(not(unix))]
#[derive(Debug)]
pub struct OsSubscription {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl OsSubscription {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }
}

#[cfg(not(unix))]
impl SignalSubscription for OsSubscription {
    async fn recv(&mut self) -> Option<Termination> {
        self.ctrl_c.recv().await.map(|()| Termination::Interrupt)
    }
}
