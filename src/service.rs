use std::sync::Arc;

use crate::{
    config::LimiterHooks,
    error::{Result, StoreError},
    limiter::{Decision, Limiter},
    metrics::Metrics,
};

/// Front door used by request handlers: evaluates identifiers and records
/// every decision in the metrics registry.
#[derive(Clone)]
pub struct RateLimitService {
    limiter: Arc<dyn Limiter>,
    metrics: Arc<Metrics>,
}

impl RateLimitService {
    /// Create a new rate limit service
    pub fn new(limiter: Arc<dyn Limiter>, metrics: Arc<Metrics>) -> Self {
        Self { limiter, metrics }
    }

    /// Decide whether the caller behind `identifier` should be rejected
    pub async fn check(&self, identifier: &str) -> Decision {
        let timer = self.metrics.start_evaluation_timer();
        let decision = self.limiter.evaluate(identifier).await;
        drop(timer);

        self.metrics.record_decision(decision);
        decision
    }

    /// Health check for the service
    pub async fn health_check(&self) -> Result<()> {
        self.limiter.health_check().await
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// Hooks that count store failures and whitelist hits in `metrics`
pub fn metrics_hooks(metrics: Arc<Metrics>) -> LimiterHooks {
    let on_error = metrics.clone();
    let on_whitelist = metrics;

    LimiterHooks {
        on_error: Some(Arc::new(move |_identifier: &str, _err: &StoreError| {
            on_error.record_store_error();
        })),
        on_whitelist: Some(Arc::new(move |_identifier: &str| {
            on_whitelist.record_whitelisted();
        })),
    }
}
