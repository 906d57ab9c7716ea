use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, IntGauge, Opts, Registry};
use std::sync::Arc;

use crate::limiter::Decision;

/// Metrics collector for the limiter
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    decisions: CounterVec,
    store_errors: Counter,
    whitelisted: Counter,
    evaluation_duration: Histogram,
    configured_limits: IntGauge,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let decisions = CounterVec::new(
            Opts::new(
                "ratelimit_decisions_total",
                "Number of admission decisions by outcome",
            ),
            &["outcome"],
        )?;

        let store_errors = Counter::new(
            "ratelimit_store_errors_total",
            "Number of counter store calls that failed or timed out",
        )?;

        let whitelisted = Counter::new(
            "ratelimit_whitelisted_total",
            "Number of requests admitted through the whitelist",
        )?;

        let evaluation_duration = Histogram::with_opts(HistogramOpts::new(
            "ratelimit_evaluation_duration_seconds",
            "Duration of admission decisions in seconds",
        ))?;

        let configured_limits = IntGauge::new(
            "ratelimit_configured_limits",
            "Number of limits evaluated per request",
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(whitelisted.clone()))?;
        registry.register(Box::new(evaluation_duration.clone()))?;
        registry.register(Box::new(configured_limits.clone()))?;

        Ok(Self {
            registry,
            decisions,
            store_errors,
            whitelisted,
            evaluation_duration,
            configured_limits,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_decision(&self, decision: Decision) {
        self.decisions.with_label_values(&[decision.as_str()]).inc();
    }

    pub fn record_store_error(&self) {
        self.store_errors.inc();
    }

    pub fn record_whitelisted(&self) {
        self.whitelisted.inc();
    }

    pub fn set_configured_limits(&self, count: usize) {
        self.configured_limits.set(count as i64);
    }

    /// Create a timer for measuring evaluation duration
    pub fn start_evaluation_timer(&self) -> prometheus::HistogramTimer {
        self.evaluation_duration.start_timer()
    }

    pub fn decision_count(&self, decision: Decision) -> u64 {
        self.decisions.with_label_values(&[decision.as_str()]).get() as u64
    }

    pub fn store_error_count(&self) -> u64 {
        self.store_errors.get() as u64
    }

    pub fn whitelisted_count(&self) -> u64 {
        self.whitelisted.get() as u64
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics")
    }
}
