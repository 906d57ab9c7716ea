use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::warn;

use crate::{
    error::Result,
    limit::Limit,
    limiter::{ErrorHook, Limiter, TieredLimiter, WhitelistHook},
    parse::parse_limits,
    redis::RedisConfig,
    store::CounterStore,
    whitelist::{Whitelist, WhitelistedLimiter},
};

/// Environment variable prefix for layered configuration
pub const ENV_PREFIX: &str = "RATELIMIT";

/// Limiter configuration as read from YAML and the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Limits in `<count>/<duration>[/g]` form; order does not matter
    #[serde(default)]
    pub limits: Vec<String>,

    /// Exact identifiers and CIDR ranges that are never limited
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Reject requests when the counter store fails
    #[serde(default = "default_limit_on_error")]
    pub limit_on_error: bool,

    /// Per store call timeout; 0 disables it
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default)]
    pub redis: RedisSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_limit_on_error() -> bool {
    true
}

fn default_store_timeout_ms() -> u64 {
    1000
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limits: Vec::new(),
            whitelist: Vec::new(),
            limit_on_error: default_limit_on_error(),
            store_timeout_ms: default_store_timeout_ms(),
            redis: RedisSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: String::new(),
            connection_timeout_ms: default_connection_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl RedisSettings {
    pub fn to_redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.url.clone(),
            key_prefix: self.key_prefix.clone(),
            connection_timeout: millis(self.connection_timeout_ms),
            command_timeout: millis(self.command_timeout_ms),
        }
    }
}

/// Optional observers wired into the limiter
#[derive(Clone, Default)]
pub struct LimiterHooks {
    pub on_error: Option<ErrorHook>,
    pub on_whitelist: Option<WhitelistHook>,
}

impl LimiterConfig {
    /// Load from an optional file, then overlay `RATELIMIT__*` environment
    /// variables (e.g. `RATELIMIT__REDIS__URL`, `RATELIMIT__LIMITS=1/1s,100/1h/g`)
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("limits")
                    .with_list_parse_key("whitelist"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        millis(self.store_timeout_ms)
    }

    /// Parse and validate the configured limits
    pub fn parsed_limits(&self) -> Result<Vec<Limit>> {
        Ok(parse_limits(&self.limits)?)
    }

    /// Parse and validate the configured whitelist
    pub fn parsed_whitelist(&self) -> Result<Whitelist> {
        Whitelist::parse(&self.whitelist)
    }

    /// Build the limiter described by this configuration on top of `store`.
    ///
    /// Every limit and whitelist entry is validated here, so a bad entry fails
    /// startup instead of a request.
    pub fn build_limiter(
        &self,
        store: Arc<dyn CounterStore>,
        hooks: LimiterHooks,
    ) -> Result<Arc<dyn Limiter>> {
        let limits = self.parsed_limits()?;
        let whitelist = self.parsed_whitelist()?;

        let mut tiered = TieredLimiter::new(store, limits)
            .with_limit_on_error(self.limit_on_error)
            .with_store_timeout(self.store_timeout());
        if let Some(hook) = hooks.on_error {
            tiered = tiered.with_error_hook(hook);
        }
        for (first, second) in tiered.limits().shared_counters() {
            warn!(
                %first,
                %second,
                "limits share one counter; each request increments it once per limit"
            );
        }

        if whitelist.is_empty() {
            return Ok(Arc::new(tiered));
        }

        let mut limiter = WhitelistedLimiter::new(tiered, whitelist);
        if let Some(hook) = hooks.on_whitelist {
            limiter = limiter.with_whitelist_hook(hook);
        }
        Ok(Arc::new(limiter))
    }
}

/// Load configuration from YAML string
pub fn load_config_from_yaml(yaml: &str) -> Result<LimiterConfig> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Load configuration from YAML file
pub fn load_config_from_file(path: &str) -> Result<LimiterConfig> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_yaml(&content)
}
