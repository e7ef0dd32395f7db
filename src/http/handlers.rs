//! Router construction and the demo request handler.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::HeaderName, middleware, routing::get, Router};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::http::request::{track_requests, MakeRequestUuidV4, X_REQUEST_ID};

/// State injected into the demo handler.
#[derive(Debug, Clone)]
struct WorkState {
    delay: Duration,
    body: Arc<str>,
}

/// Build the application router from configuration.
pub fn build_router(config: &ServerConfig) -> Router {
    let state = WorkState {
        delay: Duration::from_millis(config.handler.delay_ms),
        body: Arc::from(config.handler.body.as_str()),
    };

    let routes = Router::new()
        .route("/", get(work))
        .route("/healthz", get(healthz))
        .with_state(state);

    with_middleware(routes, Duration::from_secs(config.timeouts.request_secs))
}

/// Wrap `router` with tracing, request IDs, a request timeout and metrics.
#[allow(deprecated)]
pub fn with_middleware(router: Router, request_timeout: Duration) -> Router {
    let x_request_id = HeaderName::from_static(X_REQUEST_ID);

    router
        .layer(middleware::from_fn(track_requests))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuidV4))
}

/// Simulated unit of work.
async fn work(State(state): State<WorkState>) -> String {
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.body.to_string()
}

async fn healthz() -> &'static str {
    "ok"
}
