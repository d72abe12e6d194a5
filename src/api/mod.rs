pub mod ai;
pub mod health;
pub mod rate_limits;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::llm::CompletionProvider;
use crate::monitoring::{HealthChecker, RateLimitMetrics};
use crate::security::{auth_middleware, rate_limit_middleware, AuthManager, RateLimitManager};

/// Application state for the web API
#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimitManager>,
    pub auth: Arc<AuthManager>,
    pub health: Arc<HealthChecker>,
    pub metrics: Option<Arc<RateLimitMetrics>>,
    pub llm: Option<Arc<dyn CompletionProvider>>,
    pub request_timeout: Duration,
}

/// Create the main API router
pub fn create_api_router(state: AppState) -> Router {
    let router = Router::new()
        // Probes
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/live", get(health::liveness_check))
        .route("/api/health", get(health::service_info))
        .route("/metrics", get(health::metrics))
        // Rate limit inspection and administration
        .route("/api/rate-limits/policies", get(rate_limits::get_policies))
        .route("/api/rate-limits/stats", get(rate_limits::get_statistics))
        .route("/api/rate-limits/keys/:key", delete(rate_limits::reset_key))
        // Code generation
        .route("/api/ai/generate", post(ai::generate))
        .fallback(not_found)
        .with_state(state.clone());

    apply_middleware(router, &state)
}

/// Wrap a router in the request pipeline: tracing, CORS, timeout, optional
/// authentication and finally rate limiting, outermost first.
pub fn apply_middleware(router: Router, state: &AppState) -> Router {
    let router = router
        .layer(middleware::from_fn_with_state(state.rate_limiter.clone(), rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.auth.clone(), auth_middleware))
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(CorsLayer::permissive());

    let router = match &state.metrics {
        Some(metrics) => router.layer(middleware::from_fn_with_state(
            metrics.clone(),
            track_responses,
        )),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

async fn track_responses(
    State(metrics): State<Arc<RateLimitMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    metrics.record_response(response.status().as_u16());
    response
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

pub(crate) fn error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}
