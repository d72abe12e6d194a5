use super::{
    ComponentHealth, HealthStatus, LivenessStatus, ReadinessChecks, ReadinessStatus, SystemHealth,
};
use crate::security::RateLimitManager;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Health, readiness and liveness probes, aware of graceful shutdown
pub struct HealthChecker {
    rate_limiter: Arc<RateLimitManager>,
    environment: String,
    start_time: Instant,
    shutting_down: AtomicBool,
}

impl HealthChecker {
    pub fn new(rate_limiter: Arc<RateLimitManager>, environment: impl Into<String>) -> Self {
        Self {
            rate_limiter,
            environment: environment.into(),
            start_time: Instant::now(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn set_shutting_down(&self, state: bool) {
        if state {
            info!("Marking service as shutting down");
        }
        self.shutting_down.store(state, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Aggregate health of the service and its counter store
    pub async fn check_system_health(&self) -> SystemHealth {
        let mut components = HashMap::new();
        let store = self.check_rate_limit_store().await;

        let status = if self.is_shutting_down() {
            HealthStatus::Unhealthy
        } else {
            // the limiter fails open, so a broken store only degrades service
            match store.status {
                HealthStatus::Healthy => HealthStatus::Healthy,
                _ => HealthStatus::Degraded,
            }
        };
        components.insert("rate_limit_store".to_string(), store);

        SystemHealth {
            status,
            timestamp: Utc::now(),
            uptime_seconds: self.uptime_seconds(),
            environment: self.environment.clone(),
            components,
        }
    }

    async fn check_rate_limit_store(&self) -> ComponentHealth {
        let start = Instant::now();
        let (status, message) = match self.rate_limiter.health_check().await {
            Ok(()) => {
                debug!("Rate limit store health check passed");
                (HealthStatus::Healthy, None)
            }
            Err(e) => {
                warn!("Rate limit store health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        ComponentHealth {
            status,
            message,
            last_checked: Utc::now(),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    pub async fn check_readiness(&self) -> ReadinessStatus {
        let server = !self.is_shutting_down();
        let rate_limit_store = self.rate_limiter.health_check().await.is_ok();

        ReadinessStatus {
            ready: server && rate_limit_store,
            timestamp: Utc::now(),
            checks: ReadinessChecks {
                rate_limit_store,
                server,
            },
        }
    }

    pub fn check_liveness(&self) -> LivenessStatus {
        LivenessStatus {
            alive: true,
            timestamp: Utc::now(),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}
