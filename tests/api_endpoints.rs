//! HTTP surface: probes, metrics, rate limit administration and generation

mod helpers;

use anyhow::Result;
use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use helpers::*;
use medbuilder::api::create_api_router;
use medbuilder::llm::{Completion, CompletionProvider, CompletionRequest, LlmError};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_health_probes() -> Result<()> {
    let state = test_state(test_config());
    let app = create_api_router(state);

    let response = TestRequest::get("/health").send(&app).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["components"]["rate_limit_store"]["status"], "healthy");

    let response = TestRequest::get("/ready").send(&app).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ready"], true);

    let response = TestRequest::get("/live").send(&app).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["alive"], true);

    let response = TestRequest::get("/api/health").send(&app).await;
    assert_eq!(body_json(response).await["service"], "medbuilder-api");

    Ok(())
}

#[tokio::test]
async fn test_shutdown_marks_service_unavailable() -> Result<()> {
    let state = test_state(test_config());
    let app = create_api_router(state.clone());

    state.health.set_shutting_down(true);

    assert_eq!(
        TestRequest::get("/ready").send(&app).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        TestRequest::get("/health").send(&app).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        TestRequest::get("/live").send(&app).await.status(),
        StatusCode::OK
    );

    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_json_404() -> Result<()> {
    let app = create_api_router(test_state(test_config()));

    let response = TestRequest::get("/api/does-not-exist").send(&app).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header(&response, "ratelimit-limit"), Some("100"));
    assert_eq!(body_json(response).await, json!({ "error": "Not found" }));

    Ok(())
}

#[tokio::test]
async fn test_policy_table_endpoint() -> Result<()> {
    let app = create_api_router(test_state(test_config()));

    let response = TestRequest::get("/api/rate-limits/policies").send(&app).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let policies = body.as_array().unwrap();
    assert_eq!(policies.len(), 8);
    assert_eq!(policies[0]["category"], "auth");
    assert_eq!(policies[0]["window_secs"], 900);
    assert_eq!(policies[0]["max"], 5);
    assert_eq!(policies[0]["security_event"], true);

    let upload = policies
        .iter()
        .find(|p| p["category"] == "upload")
        .unwrap();
    assert_eq!(upload["skip_in_development"], false);
    assert_eq!(upload["limit"], "10 uploads per minute");

    Ok(())
}

#[tokio::test]
async fn test_statistics_endpoint() -> Result<()> {
    let app = create_api_router(test_state(test_config()));

    TestRequest::post("/api/login")
        .from_ip("203.0.113.9")
        .send_times(&app, 7)
        .await;

    let response = TestRequest::get("/api/rate-limits/stats").send(&app).await;
    let body = body_json(response).await;
    assert_eq!(body["enabled"], true);
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["rejected_requests"], 2);
    assert_eq!(body["rejections_by_category"]["auth"], 2);

    Ok(())
}

#[tokio::test]
async fn test_reset_requires_admin() -> Result<()> {
    let state = test_state(test_config());
    let app = create_api_router(state.clone());
    let login = TestRequest::post("/api/login").from_ip("203.0.113.10");

    login.send_times(&app, 6).await;
    assert_eq!(
        login.send(&app).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let path = "/api/rate-limits/keys/ip:203.0.113.10";

    let anonymous = TestRequest::new(Method::DELETE, path).send(&app).await;
    assert_eq!(anonymous.status(), StatusCode::FORBIDDEN);

    let user = token(&state, "user-1", Some("user"));
    let as_user = TestRequest::new(Method::DELETE, path)
        .bearer(&user)
        .send(&app)
        .await;
    assert_eq!(as_user.status(), StatusCode::FORBIDDEN);

    let admin = token(&state, "admin-1", Some("admin"));
    let as_admin = TestRequest::new(Method::DELETE, path)
        .bearer(&admin)
        .send(&app)
        .await;
    assert_eq!(as_admin.status(), StatusCode::OK);
    let body = body_json(as_admin).await;
    assert_eq!(body["key"], "ip:203.0.113.10");
    assert_eq!(body["reset"], true);

    assert_eq!(login.send(&app).await.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_counts_decisions() -> Result<()> {
    let app = create_api_router(test_state(test_config()));

    TestRequest::post("/api/upload")
        .from_ip("203.0.113.11")
        .send_times(&app, 11)
        .await;

    let response = TestRequest::get("/metrics").send(&app).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("rate_limit_decisions_total"));
    assert!(text.contains("outcome=\"rejected\""));
    assert!(text.contains("http_requests_total"));

    Ok(())
}

#[tokio::test]
async fn test_generate_without_provider_is_unavailable() -> Result<()> {
    let app = create_api_router(test_state(test_config()));

    let response = TestRequest::post("/api/ai/generate")
        .send_json(&app, &json!({ "prompt": "Build a patient intake form" }))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_json(response).await["error"],
        "AI generation is not configured"
    );

    Ok(())
}

struct CannedProvider;

#[async_trait]
impl CompletionProvider for CannedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        if request.prompt.is_empty() {
            return Err(LlmError::InvalidRequest {
                message: "prompt must not be empty".to_string(),
            });
        }
        Ok(Completion {
            content: format!("// {}", request.prompt),
            model: "canned".to_string(),
        })
    }

    fn model(&self) -> &str {
        "canned"
    }
}

#[tokio::test]
async fn test_generate_with_provider() -> Result<()> {
    let state = test_state_with_llm(test_config(), Some(Arc::new(CannedProvider)));
    let app = create_api_router(state);

    let response = TestRequest::post("/api/ai/generate")
        .send_json(&app, &json!({ "prompt": "hello", "system": "You write Rust" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["content"], "// hello");
    assert_eq!(body["model"], "canned");

    let response = TestRequest::post("/api/ai/generate")
        .send_json(&app, &json!({ "prompt": "" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_generate_is_rate_limited_as_ai() -> Result<()> {
    let state = test_state_with_llm(test_config(), Some(Arc::new(CannedProvider)));
    let app = create_api_router(state);

    let mut statuses = Vec::new();
    for _ in 0..11 {
        let response = TestRequest::post("/api/ai/generate")
            .from_ip("203.0.113.12")
            .send_json(&app, &json!({ "prompt": "x" }))
            .await;
        statuses.push(response.status());
    }
    assert!(statuses[..10].iter().all(|s| *s == StatusCode::OK));
    assert_eq!(statuses[10], StatusCode::TOO_MANY_REQUESTS);

    Ok(())
}
