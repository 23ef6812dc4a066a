//! HTTP endpoints for metrics and health checks (SPEC_FULL.md §6):
//! `/metrics` (Prometheus text), `/health`, `/readiness`, `/liveness`.
//!
//! Grounded on the donor's `metrics/endpoints.rs` router shape, adapted
//! to this crate's narrower [`super::Metrics`] (no peer-count gate on
//! readiness — this core has no peer layer of its own).

use super::Metrics;
use axum::{extract::State as AxumState, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/health", get(health_check))
        .route("/readiness", get(readiness_check))
        .route("/liveness", get(liveness_check))
        .with_state(metrics)
}

fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

async fn prometheus_metrics(AxumState(metrics): AxumState<Arc<Metrics>>) -> impl IntoResponse {
    (StatusCode::OK, [("Content-Type", "text/plain; version=0.0.4")], metrics.prometheus_export())
}

async fn health_check(AxumState(metrics): AxumState<Arc<Metrics>>) -> impl IntoResponse {
    let health = metrics.health_check(now_unix_secs());
    let status = match health.status.as_str() {
        "healthy" | "degraded" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

/// Ready once the chain isn't reporting a stale tip; this core has no
/// peer layer to gate on, unlike the donor's readiness probe.
async fn readiness_check(AxumState(metrics): AxumState<Arc<Metrics>>) -> impl IntoResponse {
    let health = metrics.health_check(now_unix_secs());
    if health.status == "healthy" {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn liveness_check(AxumState(metrics): AxumState<Arc<Metrics>>) -> impl IntoResponse {
    let _ = metrics.current_height.load(std::sync::atomic::Ordering::Relaxed);
    (StatusCode::OK, "alive")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_router_builds() {
        let metrics = Metrics::new();
        let _router = metrics_router(metrics);
    }
}
