use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    error::StoreError,
    store::{Admission, CounterKey, CounterStore},
};

/// Check-and-increment with expiry set on creation only.
///
/// Returns 1 when the counter is already at the limit (nothing written) and
/// 0 when the request was counted.
const WINDOW_COUNTER_SCRIPT: &str = r#"
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local current = tonumber(redis.call("GET", KEYS[1]) or "0")
if current >= limit then
    return 1
end
if redis.call("INCR", KEYS[1]) == 1 then
    redis.call("PEXPIRE", KEYS[1], window_ms)
end
return 0
"#;

/// Redis client configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
    pub connection_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: String::new(),
            connection_timeout: Some(Duration::from_secs(5)),
            command_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// Redis-backed [`CounterStore`] shared by every limiter process
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    script: Script,
    config: RedisConfig,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING
    pub async fn connect(config: RedisConfig) -> Result<Self, StoreError> {
        info!("Creating Redis client for URL: {}", config.url);

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            StoreError::Redis(e)
        })?;

        let connect_timeout = config.connection_timeout.unwrap_or(Duration::from_secs(10));
        let connection = match tokio::time::timeout(connect_timeout, client.get_connection_manager()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("Failed to create connection manager: {}", e);
                return Err(StoreError::Redis(e));
            }
            Err(_) => {
                warn!(
                    "Timeout while creating connection manager ({}s)",
                    connect_timeout.as_secs()
                );
                return Err(StoreError::Timeout(connect_timeout));
            }
        };

        let store = Self {
            connection,
            script: Script::new(WINDOW_COUNTER_SCRIPT),
            config,
        };

        store.health_check().await?;
        info!("Redis store initialized successfully");
        Ok(store)
    }

    /// Full Redis key for a counter
    pub fn redis_key(&self, key: &CounterKey) -> String {
        prefixed_key(&self.config.key_prefix, key)
    }

    async fn with_command_timeout<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match self.config.command_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result.map_err(StoreError::Redis),
                Err(_) => Err(StoreError::Timeout(limit)),
            },
            None => fut.await.map_err(StoreError::Redis),
        }
    }
}

fn prefixed_key(prefix: &str, key: &CounterKey) -> String {
    if prefix.is_empty() {
        key.as_str().to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

fn admission_from_reply(reply: i64) -> Result<Admission, StoreError> {
    match reply {
        0 => Ok(Admission::Admitted),
        1 => Ok(Admission::OverLimit),
        other => Err(StoreError::UnexpectedReply(format!(
            "window counter script returned {other}"
        ))),
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn check_and_increment(
        &self,
        key: &CounterKey,
        max_count: u64,
        window: Duration,
    ) -> Result<Admission, StoreError> {
        let redis_key = self.redis_key(key);
        let window_ms = window.as_millis().max(1) as u64;
        let mut conn = self.connection.clone();

        let mut invocation = self.script.prepare_invoke();
        invocation.key(&redis_key).arg(max_count).arg(window_ms);
        let reply: i64 = self
            .with_command_timeout(invocation.invoke_async::<_, i64>(&mut conn))
            .await?;

        debug!(key = %redis_key, reply, "window counter script");
        admission_from_reply(reply)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        self.with_command_timeout(redis::cmd("PING").query_async::<_, ()>(&mut conn))
            .await
    }
}
