use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{error_response, AppState};
use crate::security::{Category, Claims, Policy, RateLimitStatistics};

#[derive(Debug, Serialize)]
pub struct PolicyView {
    #[serde(flatten)]
    pub policy: Policy,
    pub limit: Option<String>,
    pub header: String,
}

/// Effective policy table, in category order
pub async fn get_policies(State(state): State<AppState>) -> Json<Vec<PolicyView>> {
    let policies = state
        .rate_limiter
        .policies()
        .iter()
        .map(|policy| PolicyView {
            limit: policy.limit_description(),
            header: policy.header_value(),
            policy: policy.clone(),
        })
        .collect();
    Json(policies)
}

pub async fn get_statistics(State(state): State<AppState>) -> Json<RateLimitStatistics> {
    Json(state.rate_limiter.get_statistics().await)
}

/// Clear every counter held for a bucket key; admin only
pub async fn reset_key(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let admin = claims.as_ref().filter(|Extension(claims)| claims.is_admin());
    let Some(Extension(admin)) = admin else {
        warn!("Rejected rate limit reset for {} without admin role", key);
        return Err(error_response(StatusCode::FORBIDDEN, "Admin role required"));
    };

    state.rate_limiter.reset_key(&key).await.map_err(|e| {
        warn!("Failed to reset rate limits for {}: {}", key, e);
        error_response(StatusCode::SERVICE_UNAVAILABLE, "Rate limit store unavailable")
    })?;

    info!(
        "Rate limits for {} reset by {}",
        key,
        admin.principal_id().unwrap_or("<unknown>")
    );
    Ok(Json(json!({
        "key": key,
        "reset": true,
        "categories": Category::ALL.iter().map(Category::as_str).collect::<Vec<_>>(),
    })))
}
