use super::{LayerDecision, Policy, RateLimitManager, RequestIdentity, Verdict};
use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Body of a 429 response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRejection {
    pub error: String,
    pub retry_after: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

impl RateLimitRejection {
    pub fn new(policy: &Policy, reset_after: Duration) -> Self {
        Self {
            error: policy.message.to_string(),
            retry_after: retry_after_secs(reset_after).to_string(),
            limit: policy.limit_description(),
            blocked: policy.security_event.then_some(true),
        }
    }
}

/// Rate limiting middleware for Axum
pub async fn rate_limit_middleware(
    State(manager): State<Arc<RateLimitManager>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = RequestIdentity::from_request(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    match manager.check(&method, &path, &identity).await {
        Verdict::Bypass | Verdict::Allowed(None) => next.run(request).await,
        Verdict::Allowed(Some(decision)) => {
            let mut response = next.run(request).await;
            let policy = manager.policies().get(decision.category);
            insert_headers(response.headers_mut(), policy, &decision);
            response
        }
        Verdict::Rejected(decision) => {
            let policy = manager.policies().get(decision.category);
            let body = RateLimitRejection::new(policy, decision.reset_after);

            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = response.headers_mut();
            insert_headers(headers, policy, &decision);
            headers.insert(
                RETRY_AFTER,
                HeaderValue::from(retry_after_secs(decision.reset_after)),
            );
            response
        }
    }
}

fn insert_headers(headers: &mut HeaderMap, policy: &Policy, decision: &LayerDecision) {
    if let Ok(value) = HeaderValue::from_str(&policy.header_value()) {
        headers.insert(RATELIMIT_POLICY, value);
    }
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        RATELIMIT_RESET,
        HeaderValue::from(retry_after_secs(decision.reset_after)),
    );
}

/// Whole seconds until reset, rounded up and never zero
fn retry_after_secs(reset_after: Duration) -> u64 {
    let secs = reset_after.as_secs() + u64::from(reset_after.subsec_nanos() > 0);
    secs.max(1)
}
