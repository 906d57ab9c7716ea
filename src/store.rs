use async_trait::async_trait;
use std::{fmt, time::Duration};

use crate::{
    error::StoreError,
    limit::{Limit, Scope},
    utils::format_window,
};

/// Outcome of one check-and-increment against the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The counter was below the maximum and has been incremented
    Admitted,
    /// The counter was already at the maximum; nothing was written
    OverLimit,
}

/// Logical name of one window counter: whose counter and which window.
///
/// Per-key and global counters live in separate namespaces, so a caller whose
/// identifier happens to equal the global sentinel never shares its counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    name: String,
    window: Duration,
}

impl CounterKey {
    /// Counter name for a limit as seen by `identifier`
    pub fn for_limit(limit: &Limit, identifier: &str) -> Self {
        let window = format_window(limit.window());
        let name = match limit.scope() {
            Scope::PerKey => format!("requests:key:{identifier}:{window}"),
            Scope::Global => format!("requests:global:{window}"),
        };

        Self {
            name,
            window: limit.window(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Shared counter store exposing the atomic fixed-window primitive.
///
/// `check_and_increment` must behave as one indivisible operation, even when
/// invoked concurrently from independent processes:
///
/// - if the counter is already `>= max_count`, return [`Admission::OverLimit`]
///   and leave it untouched;
/// - otherwise increment it, creating it with an expiry of `window` when it
///   does not exist, and return [`Admission::Admitted`].
///
/// The expiry is set only on creation and never refreshed. Any failure to run
/// the operation is reported as an error, never as either admission value.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        max_count: u64,
        window: Duration,
    ) -> Result<Admission, StoreError>;

    /// Check that the store is reachable
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
