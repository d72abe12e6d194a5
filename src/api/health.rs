use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

use super::{error_response, AppState};
use crate::monitoring::HealthStatus;

/// Aggregate health; 503 once the service is unhealthy or shutting down
pub async fn health_check(State(state): State<AppState>) -> Response {
    let health = state.health.check_system_health().await;
    let status = match health.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(health)).into_response()
}

pub async fn readiness_check(State(state): State<AppState>) -> Response {
    let readiness = state.health.check_readiness().await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness)).into_response()
}

pub async fn liveness_check(State(state): State<AppState>) -> Response {
    Json(state.health.check_liveness()).into_response()
}

pub async fn service_info() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "medbuilder-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(metrics) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.gather_metrics(),
        )
            .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Metrics are disabled").into_response(),
    }
}
