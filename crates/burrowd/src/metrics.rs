//! Prometheus metrics collection and the operational HTTP endpoint.
//!
//! The endpoint serves `/metrics` in the Prometheus exposition format plus
//! `/health`, `/ready` and a JSON `/stats` snapshot. Metric recording goes
//! through the wrapper functions below so names stay in one place.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

use crate::server::ServerState;
use crate::stats::{self, StatsSnapshot};

/// Response body for the health endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Response body for the readiness endpoint.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness flag, flipped once the relay is accepting connections.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Creates a not-yet-ready flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the relay ready to serve.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Whether the relay reports ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Installs the Prometheus recorder and serves the operational endpoint.
///
/// Runs until the process exits; spawn it on its own task.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the endpoint
/// address cannot be bound.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())))
        .route("/stats", get(move || stats_handler(Arc::clone(&state))));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics endpoint listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Liveness check, 200 while the process runs.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Readiness check, 200 once the relay accepts connections and 503 before.
async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

/// Live aggregate counters as JSON.
async fn stats_handler(state: Arc<ServerState>) -> Json<StatsSnapshot> {
    Json(stats::snapshot(&state))
}

/// Gauge wrappers.
pub mod gauges {
    /// Increments the live session gauge.
    pub fn inc_sessions_active() {
        metrics::gauge!("burrow_sessions_active").increment(1.0);
    }

    /// Decrements the live session gauge.
    pub fn dec_sessions_active() {
        metrics::gauge!("burrow_sessions_active").decrement(1.0);
    }
}

/// Counter wrappers.
pub mod counters {
    /// Counts one frame accepted into a recipient queue.
    pub fn frames_relayed_total() {
        metrics::counter!("burrow_frames_relayed_total").increment(1);
    }

    /// Counts one frame dropped, labelled with the reason.
    pub fn frames_dropped_total(reason: &'static str) {
        metrics::counter!("burrow_frames_dropped_total", "reason" => reason).increment(1);
    }

    /// Counts one inbound line that failed to parse.
    pub fn parse_errors_total() {
        metrics::counter!("burrow_parse_errors_total").increment(1);
    }

    /// Counts one data frame that failed to decode or decrypt.
    pub fn decrypt_failures_total() {
        metrics::counter!("burrow_decrypt_failures_total").increment(1);
    }

    /// Accumulates payload bytes, labelled `in` or `out`.
    pub fn payload_bytes_total(direction: &'static str, bytes: u64) {
        metrics::counter!("burrow_payload_bytes_total", "direction" => direction)
            .increment(bytes);
    }
}

/// Histogram wrappers.
pub mod histograms {
    /// Records how long one broadcast fan-out took, in seconds.
    pub fn broadcast_latency_seconds(seconds: f64) {
        metrics::histogram!("burrow_broadcast_latency_seconds").record(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_is_service_unavailable_until_marked() {
        let health = HealthState::new();
        let (status, body) = ready_handler(health.clone()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.0.ready);

        health.set_ready(true);
        let (status, body) = ready_handler(health).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.0.ready);
    }

    #[tokio::test]
    async fn health_always_answers_ok() {
        let (status, body) = health_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0.status, "ok");
    }
}
