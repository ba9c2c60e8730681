use std::sync::Arc;
use std::time::Instant;

use axum::{body::Body, extract::{Request, State}, middleware::Next, response::Response};

use crate::metrics::Metrics;

/// Axum middleware that records API request metrics against the `Metrics`
/// instance owned by the app's state, rather than a process-wide global.
///
/// For each request it records:
/// - `api_requests_total` counter with labels `method`, `path`, `status`
/// - `api_request_duration_seconds` histogram
pub async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    metrics.record_api_request(&method, &path, &status, duration);

    response
}
