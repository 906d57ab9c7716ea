//! Process-local counter store.
//!
//! Implements the same fixed-window primitive as the Redis store, but its
//! counters are only visible inside one process. Useful for single-instance
//! deployments and for tests that need to control time.
//!
//! Expired counters stay in the map until they are purged. Long-running
//! processes should call [`MemoryStore::spawn_purger`] once after creating the
//! store.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::debug;

use crate::{
    error::StoreError,
    store::{Admission, CounterKey, CounterStore},
    utils::{Clock, SystemClock},
};

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    expires_at: Instant,
}

/// In-memory [`CounterStore`]
pub struct MemoryStore {
    counters: Mutex<HashMap<String, WindowCounter>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that reads time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Current count for a key, or `None` if it has no live window
    pub async fn count(&self, key: &CounterKey) -> Option<u64> {
        let now = self.clock.now();
        let counters = self.counters.lock().await;
        counters
            .get(key.as_str())
            .filter(|c| c.expires_at > now)
            .map(|c| c.count)
    }

    /// Number of counters held, expired or not
    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every counter whose window has elapsed
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, c| c.expires_at > now);
        before - counters.len()
    }

    /// Purge expired counters every `every` on a background task.
    ///
    /// The task holds a weak reference and exits once the store is dropped.
    pub fn spawn_purger(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "purged expired counters");
                }
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        max_count: u64,
        window: Duration,
    ) -> Result<Admission, StoreError> {
        let now = self.clock.now();
        let mut counters = self.counters.lock().await;

        if let Some(counter) = counters.get_mut(key.as_str()) {
            if counter.expires_at > now {
                if counter.count >= max_count {
                    return Ok(Admission::OverLimit);
                }
                counter.count += 1;
                return Ok(Admission::Admitted);
            }
        }

        if max_count == 0 {
            return Ok(Admission::OverLimit);
        }

        counters.insert(
            key.as_str().to_string(),
            WindowCounter {
                count: 1,
                expires_at: now + window,
            },
        );
        Ok(Admission::Admitted)
    }
}
