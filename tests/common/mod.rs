//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{routing::get, Router};
use graceful_server::lifecycle::{Server, ServerError, Shutdown, ShutdownContext};
use graceful_server::net::Listener;
use graceful_server::HttpServer;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Start an HTTP server on an ephemeral port whose only route sleeps for
/// `delay` before answering `body`.
pub async fn sleeping_server(delay: Duration, body: &'static str) -> (HttpServer, SocketAddr) {
    let router = Router::new().route(
        "/",
        get(move || async move {
            tokio::time::sleep(delay).await;
            body
        }),
    );

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let server = HttpServer::from_listener(Listener::from_tcp(tcp, 64), router).unwrap();
    (server, addr)
}

/// Client that never reuses connections and ignores proxy settings.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Issue `GET /` in the background, yielding status and body.
pub fn spawn_get(
    client: reqwest::Client,
    addr: SocketAddr,
) -> tokio::task::JoinHandle<Result<(u16, String), reqwest::Error>> {
    tokio::spawn(async move {
        let response = client.get(format!("http://{}/", addr)).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    })
}

/// Wait until the server has `count` open connections.
pub async fn wait_for_connections(server: &HttpServer, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.active_connections() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection was never accepted");
}

/// Scripted [`Server`] that records how it was driven.
#[derive(Debug, Default)]
pub struct MockServer {
    pub serve_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
    stop: CancellationToken,
    fail_after: Option<Duration>,
    drain_time: Duration,
    trigger_on_serve: Option<Shutdown>,
    stuck: bool,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve fails with a bind error after `after`.
    pub fn failing_after(mut self, after: Duration) -> Self {
        self.fail_after = Some(after);
        self
    }

    /// Shutdown needs `drain_time` to finish in-flight work.
    pub fn draining_for(mut self, drain_time: Duration) -> Self {
        self.drain_time = drain_time;
        self
    }

    /// Fire `trigger` as soon as serve is entered, before serving begins.
    pub fn triggering_on_serve(mut self, trigger: Shutdown) -> Self {
        self.trigger_on_serve = Some(trigger);
        self
    }

    /// Shutdown never returns.
    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    pub fn serve_calls(&self) -> usize {
        self.serve_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

impl Server for MockServer {
    async fn serve(&self) -> Result<(), ServerError> {
        self.serve_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(trigger) = &self.trigger_on_serve {
            trigger.trigger();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Some(after) = self.fail_after {
            tokio::time::sleep(after).await;
            return Err(ServerError::Bind {
                address: "127.0.0.1:1".into(),
                source: std::io::ErrorKind::AddrInUse.into(),
            });
        }

        self.stop.cancelled().await;
        Ok(())
    }

    async fn shutdown(&self, ctx: ShutdownContext) -> Result<(), ServerError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);

        if self.stuck {
            std::future::pending::<()>().await;
        }

        let result = if self.drain_time.is_zero() {
            Ok(())
        } else {
            tokio::select! {
                biased;

                _ = tokio::time::sleep(self.drain_time) => Ok(()),
                _ = ctx.done() => Err(ServerError::DeadlineExceeded { outstanding: 1 }),
            }
        };
        self.stop.cancel();
        result
    }
}
