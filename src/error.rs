use std::time::Duration;
use thiserror::Error;

/// Result type for rate limit operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors that can occur while configuring or running the limiter
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid limit: {0}")]
    Limit(#[from] ParseLimitError),

    #[error("Invalid limit list: {0}")]
    Limits(#[from] ParseLimitsError),

    #[error("Invalid whitelist entry: {0}")]
    Whitelist(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Failures of the shared counter store.
///
/// These are never turned into a decision by the store itself; the evaluator
/// resolves them through its failure policy.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure to parse a single `<count>/<duration>[/g]` limit string
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseLimitError {
    #[error("malformed limit {0:?}: expected <count>/<duration>[/g]")]
    Malformed(String),

    #[error("malformed count {input:?}: {source}")]
    InvalidCount {
        input: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("count must be > 0, got {0}")]
    NonPositiveCount(i64),

    #[error("invalid duration {input:?}: {source}")]
    InvalidDuration {
        input: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("duration must be at least 1s, got {0:?}")]
    SubSecondDuration(Duration),
}

/// Failure while parsing a list of limit strings; carries the position of the
/// first bad entry.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("limit #{index} ({input:?}): {source}")]
pub struct ParseLimitsError {
    pub index: usize,
    pub input: String,
    #[source]
    pub source: ParseLimitError,
}
