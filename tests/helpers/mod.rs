//! Shared fixtures for router-level tests
#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, Response, StatusCode},
    Router,
};
use medbuilder::api::{apply_middleware, AppState};
use medbuilder::llm::CompletionProvider;
use medbuilder::monitoring::{HealthChecker, RateLimitMetrics};
use medbuilder::security::{AuthConfig, AuthManager, RateLimitConfig, RateLimitManager};
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn test_config() -> RateLimitConfig {
    RateLimitConfig {
        cleanup_interval_secs: 0,
        ..RateLimitConfig::default()
    }
}

pub fn test_state(config: RateLimitConfig) -> AppState {
    test_state_with_llm(config, None)
}

pub fn test_state_with_llm(
    config: RateLimitConfig,
    llm: Option<Arc<dyn CompletionProvider>>,
) -> AppState {
    let metrics = Arc::new(RateLimitMetrics::new().unwrap());
    let rate_limiter = Arc::new(
        RateLimitManager::new(config)
            .unwrap()
            .with_metrics(metrics.clone()),
    );
    let auth = Arc::new(
        AuthManager::new(AuthConfig {
            enabled: true,
            jwt_secret: TEST_SECRET.to_string(),
            ..AuthConfig::default()
        })
        .unwrap(),
    );
    let health = Arc::new(HealthChecker::new(rate_limiter.clone(), "test"));

    AppState {
        rate_limiter,
        auth,
        health,
        metrics: Some(metrics),
        llm,
        request_timeout: Duration::from_secs(30),
    }
}

/// Every path answers 200 behind the full middleware stack
pub fn echo_router(state: &AppState) -> Router {
    apply_middleware(Router::new().fallback(|| async { "ok" }), state)
}

pub fn token(state: &AppState, sub: &str, role: Option<&str>) -> String {
    state.auth.create_token(sub, role, None).unwrap()
}

pub struct TestRequest {
    method: Method,
    path: String,
    peer: Option<IpAddr>,
    headers: Vec<(String, String)>,
}

impl TestRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            peer: Some("198.51.100.1".parse().unwrap()),
            headers: Vec::new(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn from_ip(mut self, ip: &str) -> Self {
        self.peer = Some(ip.parse().unwrap());
        self
    }

    pub fn without_peer(mut self) -> Self {
        self.peer = None;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {token}"))
    }

    pub fn build(&self) -> Request<Body> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.path.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(peer) = self.peer {
            builder = builder.extension(ConnectInfo(SocketAddr::new(peer, 40000)));
        }
        builder.body(Body::empty()).unwrap()
    }

    pub fn json(&self, body: &Value) -> Request<Body> {
        let (mut parts, _) = self.build().into_parts();
        parts.headers.insert(
            axum::http::header::CONTENT_TYPE,
            "application/json".parse().unwrap(),
        );
        Request::from_parts(parts, Body::from(body.to_string()))
    }

    pub async fn send(&self, app: &Router) -> Response<Body> {
        app.clone().oneshot(self.build()).await.unwrap()
    }

    pub async fn send_json(&self, app: &Router, body: &Value) -> Response<Body> {
        app.clone().oneshot(self.json(body)).await.unwrap()
    }

    /// Send the request `times` times, returning the status codes
    pub async fn send_times(&self, app: &Router, times: usize) -> Vec<StatusCode> {
        let mut statuses = Vec::with_capacity(times);
        for _ in 0..times {
            statuses.push(self.send(app).await.status());
        }
        statuses
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}
