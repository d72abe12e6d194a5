use crate::security::Category;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{error, info};

/// Prometheus counters for rate limit decisions
pub struct RateLimitMetrics {
    registry: Registry,

    pub decisions_total: IntCounterVec,
    pub store_errors_total: IntCounter,
    pub http_requests_total: IntCounterVec,
}

impl RateLimitMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let decisions_total = IntCounterVec::new(
            Opts::new(
                "rate_limit_decisions_total",
                "Rate limit layer decisions by category and outcome",
            ),
            &["category", "outcome"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let store_errors_total = IntCounter::with_opts(Opts::new(
            "rate_limit_store_errors_total",
            "Counter store failures that let a request through",
        ))?;
        registry.register(Box::new(store_errors_total.clone()))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP responses by status class"),
            &["status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        info!("Initialized Prometheus metrics collector");

        Ok(Self {
            registry,
            decisions_total,
            store_errors_total,
            http_requests_total,
        })
    }

    pub fn record_allowed(&self, category: Category) {
        self.decisions_total
            .with_label_values(&[category.as_str(), "allowed"])
            .inc();
    }

    pub fn record_rejected(&self, category: Category) {
        self.decisions_total
            .with_label_values(&[category.as_str(), "rejected"])
            .inc();
    }

    pub fn record_response(&self, status: u16) {
        let class = match status {
            100..=199 => "1xx",
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            _ => "5xx",
        };
        self.http_requests_total.with_label_values(&[class]).inc();
    }

    /// Get metrics in Prometheus format
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| {
                error!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}
