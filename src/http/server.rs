//! HTTP server with deadline-bounded graceful shutdown.
//!
//! # Responsibilities
//! - Bind the listener (lazily, or take a pre-bound one)
//! - Serve HTTP/1.1 and HTTP/2 connections through the Axum router
//! - On shutdown: stop accepting, drain in-flight requests, close idle
//!   keep-alive connections
//! - Abort whatever is still open once the shutdown deadline passes
//!
//! ```text
//! Idle ──serve──▶ Serving ──drain──▶ Draining ──▶ Stopped { aborted }
//!   └──────────────shutdown before serve─────────▶ Stopped { aborted: 0 }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful::GracefulShutdown},
    service::TowerToHyperService,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::lifecycle::{Server, ServerError, ShutdownContext};
use crate::net::{ConnectionTracker, Listener};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeState {
    Idle,
    Serving,
    Draining,
    Stopped { aborted: usize },
}

/// HTTP server driven by the lifecycle orchestrator.
pub struct HttpServer {
    config: ListenerConfig,
    router: Router,
    /// Pre-bound listener, taken by `serve`.
    listener: Mutex<Option<Listener>>,
    local_addr: OnceLock<SocketAddr>,
    connections: ConnectionTracker,
    state: watch::Sender<ServeState>,
    /// Stop accepting and start draining.
    drain: CancellationToken,
    /// Deadline passed: kill remaining connections.
    abort: CancellationToken,
    shutdown_requested: AtomicBool,
}

impl HttpServer {
    /// Create a server that binds `config.bind_address` when it starts serving.
    pub fn new(config: ListenerConfig, router: Router) -> Self {
        let (state, _) = watch::channel(ServeState::Idle);
        Self {
            config,
            router,
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            connections: ConnectionTracker::new(),
            state,
            drain: CancellationToken::new(),
            abort: CancellationToken::new(),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    /// Create a server around an already bound listener.
    pub fn from_listener(listener: Listener, router: Router) -> Result<Self, std::io::Error> {
        let addr = listener.local_addr()?;
        let config = ListenerConfig {
            bind_address: addr.to_string(),
            max_connections: listener.max_connections(),
        };

        let server = Self::new(config, router);
        let _ = server.local_addr.set(addr);
        *server.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        Ok(server)
    }

    /// The bound address, once known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    async fn acquire_listener(&self) -> Result<Listener, ServerError> {
        let pre_bound = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let listener = match pre_bound {
            Some(listener) => listener,
            None => Listener::bind(&self.config).await?,
        };

        if let Ok(addr) = listener.local_addr() {
            let _ = self.local_addr.set(addr);
        }
        Ok(listener)
    }

    async fn run_accept_loop(&self, listener: Listener) -> Result<(), ServerError> {
        let builder = auto::Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let mut tasks = JoinSet::new();

        tracing::info!(
            address = %self.config.bind_address,
            max_connections = listener.max_connections(),
            "HTTP server starting"
        );

        let result = loop {
            tokio::select! {
                biased;

                _ = self.drain.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        let guard = self.connections.track();
                        let service = TowerToHyperService::new(self.router.clone());
                        let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
                        let conn = graceful.watch(conn.into_owned());

                        tasks.spawn(async move {
                            let _permit = permit;
                            if let Err(e) = conn.await {
                                tracing::debug!(
                                    connection_id = %guard.id(),
                                    peer_addr = %peer_addr,
                                    error = %e,
                                    "Connection error"
                                );
                            }
                            drop(guard);
                        });
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "Accept failed, continuing");
                    }
                    Err(e) => break Err(ServerError::from(e)),
                },
                Some(_) = tasks.join_next() => {}
            }
        };

        // Stop accepting before draining.
        drop(listener);

        if let Err(e) = result {
            // Dropping the JoinSet aborts the connections still open.
            self.state.send_replace(ServeState::Stopped { aborted: 0 });
            return Err(e);
        }

        self.state.send_replace(ServeState::Draining);
        tracing::info!(
            active_connections = self.connections.active_count(),
            "Listener closed, draining connections"
        );

        let aborted = tokio::select! {
            biased;

            _ = graceful.shutdown() => 0,
            _ = self.abort.cancelled() => {
                let outstanding = self.connections.active_count() as usize;
                tasks.abort_all();
                outstanding
            }
        };
        while tasks.join_next().await.is_some() {}

        if aborted > 0 {
            metrics::record_aborted_connections(aborted);
            tracing::warn!(aborted, "Aborted connections at shutdown deadline");
        }

        self.state.send_replace(ServeState::Stopped { aborted });
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

impl Server for HttpServer {
    /// Accept connections until shutdown. Returns `Ok(())` at once if
    /// shutdown already happened.
    async fn serve(&self) -> Result<(), ServerError> {
        let mut previous = ServeState::Idle;
        let started = self.state.send_if_modified(|state| {
            previous = *state;
            if *state == ServeState::Idle {
                *state = ServeState::Serving;
                true
            } else {
                false
            }
        });

        if !started {
            return match previous {
                ServeState::Stopped { .. } => Ok(()),
                _ => Err(ServerError::AlreadyServing),
            };
        }

        let listener = match self.acquire_listener().await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.send_replace(ServeState::Stopped { aborted: 0 });
                return Err(e);
            }
        };

        self.run_accept_loop(listener).await
    }

    /// Drain within `ctx`'s deadline, then abort what is left.
    async fn shutdown(&self, ctx: ShutdownContext) -> Result<(), ServerError> {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyShutdown);
        }

        let mut state = self.state.subscribe();

        // Never served: mark closed so a later serve returns immediately.
        self.state.send_if_modified(|state| {
            if *state == ServeState::Idle {
                *state = ServeState::Stopped { aborted: 0 };
                true
            } else {
                false
            }
        });
        self.drain.cancel();

        let aborted = tokio::select! {
            biased;

            aborted = wait_stopped(&mut state) => aborted,
            _ = ctx.done() => {
                tracing::warn!(
                    active_connections = self.connections.active_count(),
                    "Shutdown deadline reached, aborting remaining connections"
                );
                self.abort.cancel();
                wait_stopped(&mut state).await
            }
        };

        match aborted {
            0 => Ok(()),
            outstanding => Err(ServerError::DeadlineExceeded { outstanding }),
        }
    }
}

async fn wait_stopped(state: &mut watch::Receiver<ServeState>) -> usize {
    let stopped = state
        .wait_for(|state| matches!(state, ServeState::Stopped { .. }))
        .await
        .map(|state| *state);

    match stopped {
        Ok(ServeState::Stopped { aborted }) => aborted,
        // Sender lives as long as the server, so this is unreachable in practice.
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn router() -> Router {
        Router::new().route("/", get(|| async { "hello" }))
    }

    async fn bound_server() -> HttpServer {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        HttpServer::from_listener(Listener::from_tcp(tcp, 16), router()).unwrap()
    }

    #[tokio::test]
    async fn shutdown_before_serve_closes_server() {
        let server = bound_server().await;

        server
            .shutdown(ShutdownContext::new(Duration::from_secs(1)))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_millis(100), server.serve())
            .await
            .expect("serve should return at once")
            .unwrap();
    }

    #[tokio::test]
    async fn idle_server_drains_immediately() {
        let server = bound_server().await;

        let (serve, shutdown) = tokio::join!(server.serve(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.shutdown(ShutdownContext::new(Duration::from_secs(5))).await
        });

        serve.unwrap();
        shutdown.unwrap();
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn zero_timeout_with_no_work_succeeds() {
        let server = bound_server().await;

        let (serve, shutdown) = tokio::join!(server.serve(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.shutdown(ShutdownContext::new(Duration::ZERO)).await
        });

        serve.unwrap();
        shutdown.unwrap();
    }

    #[tokio::test]
    async fn second_shutdown_is_rejected() {
        let server = bound_server().await;
        server
            .shutdown(ShutdownContext::new(Duration::from_secs(1)))
            .await
            .unwrap();

        let err = server
            .shutdown(ShutdownContext::new(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadyShutdown));
    }

    #[tokio::test]
    async fn bind_failure_surfaces_from_serve() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ListenerConfig {
            bind_address: taken.local_addr().unwrap().to_string(),
            max_connections: 4,
        };
        let server = HttpServer::new(config, router());

        let err = server.serve().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));

        // Nothing to drain after a failed bind.
        server
            .shutdown(ShutdownContext::new(Duration::from_millis(10)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lazy_bind_records_local_addr() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            max_connections: 4,
        };
        let server = HttpServer::new(config, router());
        assert!(server.local_addr().is_none());

        let (serve, shutdown) = tokio::join!(server.serve(), async {
            while server.local_addr().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            server.shutdown(ShutdownContext::new(Duration::from_secs(1))).await
        });

        serve.unwrap();
        shutdown.unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
    }
}
