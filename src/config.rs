use crate::llm::LlmConfig;
use crate::security::{Category, PolicyOverride, PolicyTable, SecurityConfig, StoreBackend};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind the HTTP server to
    pub host: String,

    /// HTTP server port
    pub http_port: u16,

    /// Deployment environment (development, production, ...)
    pub environment: String,

    /// Operational settings
    pub operational: OperationalConfig,

    /// Authentication and rate limiting
    pub security: SecurityConfig,

    /// Language model provider
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalConfig {
    pub request_timeout_seconds: u64,
    pub enable_metrics: bool,
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
    /// How long readiness fails before the listener closes on shutdown
    pub shutdown_drain_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 5000,
            environment: "production".to_string(),
            operational: OperationalConfig::default(),
            security: SecurityConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for OperationalConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            enable_metrics: true,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            shutdown_drain_seconds: 5,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = Config::default();

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var("HTTP_PORT")? {
            config.http_port = port;
        }
        if let Ok(environment) = env::var("APP_ENV").or_else(|_| env::var("NODE_ENV")) {
            config.environment = environment.trim().to_lowercase();
        }

        if let Some(timeout) = parse_var("REQUEST_TIMEOUT_SECONDS")? {
            config.operational.request_timeout_seconds = timeout;
        }
        if let Some(drain) = parse_var("SHUTDOWN_DRAIN_SECONDS")? {
            config.operational.shutdown_drain_seconds = drain;
        }
        if let Some(enable) = parse_var("ENABLE_METRICS")? {
            config.operational.enable_metrics = enable;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.operational.log_level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            config.operational.log_format = format.trim().to_lowercase();
        }

        let rate_limiting = &mut config.security.rate_limiting;
        rate_limiting.development_mode = config.environment == "development";
        if let Some(enabled) = parse_var("RATE_LIMIT_ENABLED")? {
            rate_limiting.enabled = enabled;
        }
        if let Some(trust) = parse_var("RATE_LIMIT_TRUST_PROXY")? {
            rate_limiting.trust_proxy = trust;
        }
        if let Some(prefix) = parse_var("RATE_LIMIT_IPV6_PREFIX")? {
            rate_limiting.ipv6_prefix = prefix;
        }
        if let Ok(paths) = env::var("RATE_LIMIT_EXEMPT_PATHS") {
            rate_limiting.exempt_paths.extend(
                paths
                    .split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(str::to_owned),
            );
        }
        if let Ok(overrides) = env::var("RATE_LIMIT_OVERRIDES") {
            rate_limiting.overrides =
                serde_json::from_str::<HashMap<Category, PolicyOverride>>(&overrides)
                    .map_err(|e| anyhow::anyhow!("Invalid RATE_LIMIT_OVERRIDES: {}", e))?;
        }
        if let Ok(store) = env::var("RATE_LIMIT_STORE") {
            rate_limiting.store = match store.trim().to_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "redis" => StoreBackend::Redis,
                other => {
                    return Err(anyhow::anyhow!(
                        "Invalid RATE_LIMIT_STORE: {} (expected memory or redis)",
                        other
                    ))
                }
            };
        }
        if let Ok(url) = env::var("REDIS_URL") {
            rate_limiting.redis_url = Some(url);
        }
        if let Ok(prefix) = env::var("RATE_LIMIT_KEY_PREFIX") {
            rate_limiting.key_prefix = prefix;
        }
        if let Some(max_keys) = parse_var("RATE_LIMIT_MAX_KEYS")? {
            rate_limiting.max_tracked_keys = max_keys;
        }
        if let Some(secs) = parse_var("RATE_LIMIT_CLEANUP_SECS")? {
            rate_limiting.cleanup_interval_secs = secs;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            config.security.auth.enabled = !secret.is_empty();
            config.security.auth.jwt_secret = secret;
        }
        if let Some(expiry) = parse_var("JWT_EXPIRY_SECONDS")? {
            config.security.auth.jwt_expiry_seconds = expiry;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            config.llm.api_key = Some(api_key);
        }
        if let Ok(base_url) = env::var("LLM_BASE_URL") {
            config.llm.base_url = base_url;
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Some(timeout) = parse_var("LLM_TIMEOUT_SECONDS")? {
            config.llm.timeout_seconds = timeout;
        }

        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn validate(&self) -> Result<()> {
        if self.http_port == 0 {
            return Err(anyhow::anyhow!("HTTP port must be greater than 0"));
        }

        if !matches!(self.operational.log_format.as_str(), "pretty" | "json") {
            return Err(anyhow::anyhow!(
                "Invalid log format: {} (expected pretty or json)",
                self.operational.log_format
            ));
        }

        if self.operational.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        let rate_limiting = &self.security.rate_limiting;
        if !(1..=128).contains(&rate_limiting.ipv6_prefix) {
            return Err(anyhow::anyhow!(
                "IPv6 prefix must be between 1 and 128, got {}",
                rate_limiting.ipv6_prefix
            ));
        }

        if rate_limiting.max_tracked_keys == 0 {
            return Err(anyhow::anyhow!("Rate limit key capacity must be greater than 0"));
        }

        if let Some(path) = rate_limiting
            .exempt_paths
            .iter()
            .find(|path| !path.starts_with('/'))
        {
            return Err(anyhow::anyhow!("Exempt path must start with '/': {}", path));
        }

        if rate_limiting.store == StoreBackend::Redis
            && rate_limiting.redis_url.as_deref().unwrap_or("").is_empty()
        {
            return Err(anyhow::anyhow!("REDIS_URL is required for the redis store"));
        }

        PolicyTable::default()
            .apply_overrides(&rate_limiting.overrides)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if self.security.auth.enabled
            && !self.is_development()
            && self.security.auth.jwt_secret == DEFAULT_JWT_SECRET
        {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be changed from the default outside development"
            ));
        }

        if self.llm.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("LLM timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Create a diagnostic report for troubleshooting
    pub fn create_diagnostic_report(&self) -> String {
        let rate_limiting = &self.security.rate_limiting;
        let mut report = String::new();
        report.push_str("=== MedBuilder API - Configuration Report ===\n\n");

        report.push_str("Server Configuration:\n");
        report.push_str(&format!("  Listen: {}:{}\n", self.host, self.http_port));
        report.push_str(&format!("  Environment: {}\n", self.environment));
        report.push_str(&format!(
            "  Request Timeout: {}s\n",
            self.operational.request_timeout_seconds
        ));
        report.push_str(&format!(
            "  Shutdown Drain: {}s\n",
            self.operational.shutdown_drain_seconds
        ));
        report.push_str(&format!(
            "  Logging: {} ({})\n",
            self.operational.log_level, self.operational.log_format
        ));
        report.push_str(&format!("  Metrics: {}\n", self.operational.enable_metrics));

        report.push_str("\nRate Limiting:\n");
        report.push_str(&format!("  Enabled: {}\n", rate_limiting.enabled));
        report.push_str(&format!(
            "  Development Bypass: {}\n",
            rate_limiting.development_mode
        ));
        report.push_str(&format!("  Store: {:?}\n", rate_limiting.store));
        if let Some(url) = &rate_limiting.redis_url {
            report.push_str(&format!("  Redis: {}\n", safe_url(url)));
        }
        report.push_str(&format!("  Trust Proxy: {}\n", rate_limiting.trust_proxy));
        report.push_str(&format!("  IPv6 Prefix: /{}\n", rate_limiting.ipv6_prefix));
        report.push_str(&format!(
            "  Exempt Paths: {}\n",
            rate_limiting.exempt_paths.join(", ")
        ));
        report.push_str(&format!(
            "  Overrides: {}\n",
            if rate_limiting.overrides.is_empty() {
                "none".to_string()
            } else {
                let mut names: Vec<&str> =
                    rate_limiting.overrides.keys().map(|c| c.as_str()).collect();
                names.sort_unstable();
                names.join(", ")
            }
        ));

        report.push_str("\nAuthentication:\n");
        report.push_str(&format!(
            "  JWT: {}\n",
            if self.security.auth.enabled {
                "***configured***"
            } else {
                "Not set"
            }
        ));

        report.push_str("\nLLM Provider:\n");
        report.push_str(&format!("  Base URL: {}\n", self.llm.base_url));
        report.push_str(&format!("  Model: {}\n", self.llm.model));
        report.push_str(&format!(
            "  API Key: {}\n",
            match self.llm.api_key.as_deref() {
                Some(key) if !key.is_empty() => "***configured***",
                _ => "Not set",
            }
        ));

        report.push_str("\nValidation Results:\n");
        match self.validate() {
            Ok(_) => report.push_str("  ✅ All configuration checks passed\n"),
            Err(e) => report.push_str(&format!("  ❌ Configuration error: {e}\n")),
        }

        report.push_str("\n=== End Configuration Report ===\n");
        report
    }
}

/// Strip credentials from a connection URL
fn safe_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***@{}", &url[..scheme], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
