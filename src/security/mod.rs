pub mod auth;
pub mod rate_limit;

pub use auth::*;
pub use rate_limit::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Authentication configuration
    pub auth: AuthConfig,

    /// Rate limiting configuration
    pub rate_limiting: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
}

/// Where rate limit counters live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local counters, lost on restart
    #[default]
    Memory,
    /// Shared counters in Redis, consistent across instances
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Bypass every policy that is marked as skippable in development
    pub development_mode: bool,
    /// Key unauthenticated clients on the first `X-Forwarded-For` entry
    pub trust_proxy: bool,
    /// Prefix length used to group IPv6 clients into one bucket
    pub ipv6_prefix: u8,
    /// Paths (and their sub-paths) that are never rate limited
    pub exempt_paths: Vec<String>,
    /// Path prefixes that are never rate limited
    pub exempt_prefixes: Vec<String>,
    pub overrides: HashMap<Category, PolicyOverride>,
    pub store: StoreBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub max_tracked_keys: usize,
    pub cleanup_interval_secs: u64,
}

/// Partial replacement of a default policy's window or quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PolicyOverride {
    pub window_secs: Option<u64>,
    pub max: Option<u32>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: "change-me-in-production".to_string(),
            jwt_expiry_seconds: 3600, // 1 hour
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            development_mode: false,
            trust_proxy: false,
            ipv6_prefix: 56,
            exempt_paths: vec![
                "/health".to_string(),
                "/ready".to_string(),
                "/live".to_string(),
                "/api/health".to_string(),
                "/ping".to_string(),
            ],
            exempt_prefixes: vec!["/_health".to_string()],
            overrides: HashMap::new(),
            store: StoreBackend::Memory,
            redis_url: None,
            key_prefix: "medbuilder:rl:".to_string(),
            max_tracked_keys: 100_000,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Invalid rate limit configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Rate limit store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SecurityError>;
