use async_trait::async_trait;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    error::{Result, StoreError},
    limit::{Limit, OrderedLimits},
    store::{Admission, CounterKey, CounterStore},
};

/// Default upper bound on a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Observer for store failures: receives the caller identifier and the error
pub type ErrorHook = Arc<dyn Fn(&str, &StoreError) + Send + Sync>;

/// Observer for whitelisted callers: receives the matched identifier
pub type WhitelistHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Outcome of evaluating a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Limited,
    NotLimited,
}

impl Decision {
    pub fn is_limited(self) -> bool {
        matches!(self, Decision::Limited)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Limited => "limited",
            Decision::NotLimited => "not_limited",
        }
    }
}

impl From<bool> for Decision {
    fn from(limited: bool) -> Self {
        if limited {
            Decision::Limited
        } else {
            Decision::NotLimited
        }
    }
}

/// Anything that can decide whether a caller should be rejected.
///
/// `evaluate` never fails: internal errors are resolved into a decision by the
/// implementation.
#[async_trait]
pub trait Limiter: Send + Sync {
    async fn evaluate(&self, identifier: &str) -> Decision;

    /// Check the health of whatever backs this limiter
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<L: Limiter + ?Sized> Limiter for Arc<L> {
    async fn evaluate(&self, identifier: &str) -> Decision {
        (**self).evaluate(identifier).await
    }

    async fn health_check(&self) -> Result<()> {
        (**self).health_check().await
    }
}

/// Limiter that never limits
#[derive(Debug, Clone, Copy, Default)]
pub struct NopLimiter;

#[async_trait]
impl Limiter for NopLimiter {
    async fn evaluate(&self, _identifier: &str) -> Decision {
        Decision::NotLimited
    }
}

/// Evaluates an identifier against several fixed-window limits.
///
/// Limits are walked in [`OrderedLimits`] order and each one is checked with a
/// single atomic call to the counter store. The first limit that is already
/// full rejects the request and later limits are neither checked nor
/// incremented. A store failure short-circuits the same way and resolves to
/// `limit_on_error`.
pub struct TieredLimiter {
    store: Arc<dyn CounterStore>,
    limits: OrderedLimits,
    limit_on_error: bool,
    store_timeout: Option<Duration>,
    on_error: Option<ErrorHook>,
}

impl TieredLimiter {
    /// Create a fail-closed limiter over `limits`
    pub fn new(store: Arc<dyn CounterStore>, limits: Vec<Limit>) -> Self {
        Self {
            store,
            limits: OrderedLimits::new(limits),
            limit_on_error: true,
            store_timeout: Some(DEFAULT_STORE_TIMEOUT),
            on_error: None,
        }
    }

    /// Treat store failures as limited (`true`) or not limited (`false`)
    pub fn with_limit_on_error(mut self, limit_on_error: bool) -> Self {
        self.limit_on_error = limit_on_error;
        self
    }

    /// Bound each store call; `None` waits for the store indefinitely
    pub fn with_store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn limits(&self) -> &OrderedLimits {
        &self.limits
    }

    pub fn limit_on_error(&self) -> bool {
        self.limit_on_error
    }

    async fn check(&self, limit: &Limit, identifier: &str) -> std::result::Result<Admission, StoreError> {
        let key = CounterKey::for_limit(limit, identifier);
        let call = self
            .store
            .check_and_increment(&key, limit.max_count(), limit.window());

        match self.store_timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .unwrap_or(Err(StoreError::Timeout(timeout))),
            None => call.await,
        }
    }
}

impl fmt::Debug for TieredLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredLimiter")
            .field("limits", &self.limits)
            .field("limit_on_error", &self.limit_on_error)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Limiter for TieredLimiter {
    async fn evaluate(&self, identifier: &str) -> Decision {
        for limit in &self.limits {
            match self.check(limit, identifier).await {
                Ok(Admission::Admitted) => {}
                Ok(Admission::OverLimit) => {
                    debug!(identifier, %limit, "over limit");
                    return Decision::Limited;
                }
                Err(err) => {
                    warn!(identifier, %limit, error = %err, "counter store failed");
                    if let Some(hook) = &self.on_error {
                        hook(identifier, &err);
                    }
                    return Decision::from(self.limit_on_error);
                }
            }
        }

        Decision::NotLimited
    }

    async fn health_check(&self) -> Result<()> {
        self.store.health_check().await?;
        Ok(())
    }
}
