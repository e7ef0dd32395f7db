//! Request identification and accounting.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Record per-request metrics
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Client-supplied `x-request-id` headers are kept as-is

use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tower_http::request_id::{MakeRequestId, RequestId};

use crate::observability::metrics;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a random UUID v4 for every request lacking an ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Middleware recording request count and latency.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();

    let response = next.run(request).await;

    metrics::record_request(method.as_str(), response.status().as_u16(), started);
    response
}
