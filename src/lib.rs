pub mod api;
pub mod config;
pub mod llm;
pub mod monitoring;
pub mod security;
pub mod server;

pub use config::Config;

// Re-export monitoring types
pub use monitoring::{HealthChecker, HealthStatus, RateLimitMetrics, SystemHealth};

// Re-export security types
pub use security::{
    AuthManager, Category, Claims, Classification, PathClassifier, Policy, PolicyTable,
    RateLimitConfig, RateLimitManager, SecurityConfig, SecurityError, Verdict,
};

// Re-export LLM types
pub use llm::{Completion, CompletionProvider, CompletionRequest, LlmError};
