//! Health and metrics endpoints.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use super::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" or "unhealthy"
    pub status: &'static str,
    pub version: &'static str,
    /// Records currently held by the store, when it answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    /// Whether a retention cleanup is in progress.
    pub cleanup_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health check that verifies the log store answers.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let count = match state.store.snapshot().await {
        Ok(mut snapshot) => snapshot.total_count().await,
        Err(e) => Err(e),
    };

    let (status_code, health) = match count {
        Ok(total) => (
            StatusCode::OK,
            HealthStatus {
                status: "healthy",
                version: env!("CARGO_PKG_VERSION"),
                total_records: Some(total),
                cleanup_running: state.retention.is_running(),
                message: None,
            },
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Log store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthStatus {
                    status: "unhealthy",
                    version: env!("CARGO_PKG_VERSION"),
                    total_records: None,
                    cleanup_running: state.retention.is_running(),
                    message: Some("Log store unavailable".to_string()),
                },
            )
        }
    };

    (status_code, Json(health))
}

/// Liveness probe. Always 200 while the process serves requests.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Prometheus metrics endpoint.
///
/// Returns metrics in Prometheus text format.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        match get_prometheus_handle() {
            Some(handle) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            ),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        }
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
