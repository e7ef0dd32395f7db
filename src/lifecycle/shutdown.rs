//! Shutdown coordination primitives.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::signals::{SignalSource, SignalSubscription, Termination};

/// Deadline handed to [`Server::shutdown`](crate::lifecycle::Server::shutdown).
///
/// Pairs an absolute deadline with a token so the orchestrator can also
/// cut the shutdown short once its own cleanup bound is reached.
#[derive(Debug, Clone)]
pub struct ShutdownContext {
    deadline: Instant,
    token: CancellationToken,
}

impl ShutdownContext {
    /// Create a context that expires `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Create a context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            token: CancellationToken::new(),
        }
    }

    /// The absolute deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed or the context was cancelled.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Cancel the context ahead of its deadline.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once the deadline passes or the context is cancelled.
    pub async fn done(&self) {
        tokio::select! {
            _ = tokio::time::sleep_until(self.deadline) => {}
            _ = self.token.cancelled() => {}
        }
    }
}

/// Programmatic shutdown trigger.
///
/// A broadcast channel usable as a [`SignalSource`], for embedding the
/// orchestrator where OS signals are not wanted (and in tests).
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown trigger.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Has no effect without subscribers.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription handed out by [`Shutdown`].
#[derive(Debug)]
pub struct ShutdownReceiver {
    rx: broadcast::Receiver<()>,
}

impl SignalSource for Shutdown {
    type Subscription = ShutdownReceiver;

    fn subscribe(&self) -> std::io::Result<Self::Subscription> {
        Ok(ShutdownReceiver {
            rx: self.tx.subscribe(),
        })
    }
}

impl SignalSubscription for ShutdownReceiver {
    async fn recv(&mut self) -> Option<Termination> {
        match self.rx.recv().await {
            // Several triggers collapse into one request.
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => Some(Termination::Requested),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_expires_at_deadline() {
        let ctx = ShutdownContext::new(Duration::from_millis(20));
        assert!(!ctx.is_done());
        assert!(ctx.remaining() > Duration::ZERO);

        ctx.done().await;
        assert!(ctx.is_done());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_timeout_is_done_immediately() {
        let ctx = ShutdownContext::new(Duration::ZERO);
        assert!(ctx.is_done());
        tokio::time::timeout(Duration::from_millis(50), ctx.done())
            .await
            .expect("zero timeout context should resolve at once");
    }

    #[tokio::test]
    async fn cancel_resolves_before_deadline() {
        let ctx = ShutdownContext::new(Duration::from_secs(60));
        let clone = ctx.clone();
        clone.cancel();

        tokio::time::timeout(Duration::from_millis(50), ctx.done())
            .await
            .expect("cancelled context should resolve");
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn trigger_reaches_subscription() {
        let shutdown = Shutdown::new();
        let mut sub = SignalSource::subscribe(&shutdown).unwrap();
        assert_eq!(shutdown.receiver_count(), 1);

        shutdown.trigger();
        assert_eq!(sub.recv().await, Some(Termination::Requested));
    }

    #[tokio::test]
    async fn repeated_triggers_collapse() {
        let shutdown = Shutdown::new();
        let mut sub = SignalSource::subscribe(&shutdown).unwrap();

        shutdown.trigger();
        shutdown.trigger();
        shutdown.trigger();
        assert_eq!(sub.recv().await, Some(Termination::Requested));
    }

    #[tokio::test]
    async fn dropped_trigger_closes_subscription() {
        let shutdown = Shutdown::new();
        let mut sub = SignalSource::subscribe(&shutdown).unwrap();
        drop(shutdown);

        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn dropping_subscription_releases_it() {
        let shutdown = Shutdown::new();
        let sub = SignalSource::subscribe(&shutdown).unwrap();
        assert_eq!(shutdown.receiver_count(), 1);
        drop(sub);
        assert_eq!(shutdown.receiver_count(), 0);
    }
}
