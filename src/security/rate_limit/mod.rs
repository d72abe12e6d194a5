//! Layered rate limiting
//!
//! Every request that is not exempt is charged against the global policy, then
//! the read/write policy for its method, then the policy its path selects.
//! Auth and webhook policies take the place of the method layer. Any exhausted
//! layer rejects the request.

pub mod classifier;
pub mod key;
pub mod middleware;
pub mod policy;
pub mod redis_store;
pub mod store;

pub use classifier::{method_category, Classification, PathClassifier, PathRule};
pub use key::{normalize_ip, KeyResolver, RequestIdentity, UNKNOWN_KEY};
pub use middleware::{rate_limit_middleware, RateLimitRejection};
pub use policy::{Category, KeyStrategy, Policy, PolicyTable};
pub use redis_store::RedisStore;
pub use store::{CounterStore, MemoryStore, StoreError, WindowCount};

use crate::monitoring::RateLimitMetrics;
use crate::security::{RateLimitConfig, Result, SecurityError, StoreBackend};
use axum::http::Method;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outcome of charging one policy layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDecision {
    pub category: Category,
    pub key: String,
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl LayerDecision {
    fn new(policy: &Policy, key: String, count: WindowCount) -> Self {
        let max = u64::from(policy.max);
        Self {
            category: policy.category,
            key,
            allowed: count.hits <= max,
            limit: policy.max,
            remaining: u32::try_from(max.saturating_sub(count.hits)).unwrap_or(0),
            reset_after: count.reset_after,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No limiter applies to this request
    Bypass,
    /// Every layer passed; carries the layer whose headers are reported
    Allowed(Option<LayerDecision>),
    Rejected(LayerDecision),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub bypassed_requests: u64,
    pub rejected_requests: u64,
    pub rejection_rate: f64,
    pub rejections_by_category: BTreeMap<Category, u64>,
    pub store_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatistics {
    pub enabled: bool,
    pub development_mode: bool,
    pub backend: &'static str,
    pub tracked_keys: Option<usize>,
    #[serde(flatten)]
    pub stats: RateLimitStats,
}

/// Rate limiting manager
pub struct RateLimitManager {
    config: RateLimitConfig,
    policies: PolicyTable,
    classifier: PathClassifier,
    resolver: KeyResolver,
    store: Arc<dyn CounterStore>,
    stats: Arc<RwLock<RateLimitStats>>,
    metrics: Option<Arc<RateLimitMetrics>>,
}

impl RateLimitManager {
    /// Manager backed by the in-process store
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        let store = MemoryStore::new(config.max_tracked_keys);
        // the cleanup task needs a running runtime
        if config.cleanup_interval_secs > 0 && tokio::runtime::Handle::try_current().is_ok() {
            store.start_cleanup_task(Duration::from_secs(config.cleanup_interval_secs));
        }
        Self::with_store(config, Arc::new(store))
    }

    /// Manager backed by whichever store the configuration selects
    pub async fn connect(config: RateLimitConfig) -> Result<Self> {
        match config.store {
            StoreBackend::Memory => Self::new(config),
            StoreBackend::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    SecurityError::InvalidConfiguration {
                        message: "REDIS_URL is required for the redis store".to_string(),
                    }
                })?;
                let store = RedisStore::connect(&url).await?;
                info!("Rate limit counters stored in Redis");
                Self::with_store(config, Arc::new(store))
            }
        }
    }

    pub fn with_store(config: RateLimitConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        let mut policies = PolicyTable::default();
        policies.apply_overrides(&config.overrides)?;

        let classifier =
            PathClassifier::new(config.exempt_paths.clone(), config.exempt_prefixes.clone());
        let resolver = KeyResolver::new(config.ipv6_prefix, config.trust_proxy);

        Ok(Self {
            config,
            policies,
            classifier,
            resolver,
            store,
            stats: Arc::new(RwLock::new(RateLimitStats::default())),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<RateLimitMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Run a request through the limiter layers
    pub async fn check(&self, method: &Method, path: &str, identity: &RequestIdentity) -> Verdict {
        if !self.config.enabled {
            return Verdict::Bypass;
        }

        let category = match self.classifier.classify(method, path) {
            Classification::Exempt => {
                self.record_bypass().await;
                return Verdict::Bypass;
            }
            Classification::Limited(category) => category,
        };

        let mut reported = None;
        let mut charged = false;
        for layer in self.policies.layers(method, category) {
            let policy = self.policies.get(layer);
            if self.config.development_mode && policy.skip_in_development {
                continue;
            }
            charged = true;

            let Some(decision) = self.charge(policy, identity).await else {
                continue;
            };
            if !decision.allowed {
                self.record_rejection(policy, path, &decision).await;
                return Verdict::Rejected(decision);
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_allowed(layer);
            }
            reported = Some(decision);
        }

        if charged {
            self.stats.write().await.total_requests += 1;
            debug!("Rate limit checks passed for {} {}", method, path);
            Verdict::Allowed(reported)
        } else {
            self.record_bypass().await;
            Verdict::Bypass
        }
    }

    async fn charge(&self, policy: &Policy, identity: &RequestIdentity) -> Option<LayerDecision> {
        let key = self.resolver.resolve(policy.key_strategy, identity);
        let store_key = self.store_key(policy.category, &key);

        match self.store.hit(&store_key, policy.window).await {
            Ok(count) => Some(LayerDecision::new(policy, key, count)),
            Err(e) => {
                // fail open
                warn!(
                    "Rate limit store error for {} ({}), allowing request: {}",
                    key, policy.category, e
                );
                self.stats.write().await.store_errors += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.store_errors_total.inc();
                }
                None
            }
        }
    }

    fn store_key(&self, category: Category, key: &str) -> String {
        format!("{}{}:{}", self.config.key_prefix, category, key)
    }

    async fn record_bypass(&self) {
        let mut stats = self.stats.write().await;
        stats.total_requests += 1;
        stats.bypassed_requests += 1;
    }

    async fn record_rejection(&self, policy: &Policy, path: &str, decision: &LayerDecision) {
        if policy.security_event {
            warn!(
                security_event = true,
                category = %policy.category,
                "[SECURITY] Rate limit exceeded for auth endpoint: {} from {}",
                path,
                decision.key
            );
        } else {
            info!(
                category = %policy.category,
                "Rate limit exceeded for {} on {}",
                decision.key,
                path
            );
        }

        {
            let mut stats = self.stats.write().await;
            stats.total_requests += 1;
            stats.rejected_requests += 1;
            stats.rejection_rate = stats.rejected_requests as f64 / stats.total_requests as f64;
            *stats
                .rejections_by_category
                .entry(policy.category)
                .or_insert(0) += 1;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_rejected(policy.category);
        }
    }

    /// Drop every counter held for a bucket key (admin function)
    pub async fn reset_key(&self, key: &str) -> Result<()> {
        for category in Category::ALL {
            self.store.reset(&self.store_key(category, key)).await?;
        }
        info!("Reset rate limits for {}", key);
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await?;
        Ok(())
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn get_stats(&self) -> RateLimitStats {
        self.stats.read().await.clone()
    }

    /// Get rate limit statistics
    pub async fn get_statistics(&self) -> RateLimitStatistics {
        RateLimitStatistics {
            enabled: self.config.enabled,
            development_mode: self.config.development_mode,
            backend: self.store.backend(),
            tracked_keys: self.store.tracked_keys().await,
            stats: self.get_stats().await,
        }
    }
}
