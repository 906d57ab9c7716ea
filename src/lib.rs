//! Rust Rate Limiter
//!
//! Tiered fixed-window rate limiting backed by Redis. A request identifier is
//! checked against an ordered set of per-key and global limits; each check is
//! one atomic read-increment-expire on the counter store.

pub mod config;
pub mod error;
pub mod http;
pub mod limit;
pub mod limiter;
pub mod memory;
pub mod metrics;
pub mod parse;
pub mod redis;
pub mod service;
pub mod store;
pub mod utils;
pub mod whitelist;

// Re-export main types
pub use config::{LimiterConfig, LimiterHooks};
pub use error::{ParseLimitError, RateLimitError, Result, StoreError};
pub use http::RateLimitLayer;
pub use limit::{Limit, OrderedLimits, Scope};
pub use limiter::{Decision, Limiter, NopLimiter, TieredLimiter};
pub use memory::MemoryStore;
pub use parse::{must_parse_limit, must_parse_limits, parse_limit, parse_limits};
pub use redis::{RedisConfig, RedisStore};
pub use service::RateLimitService;
pub use store::{Admission, CounterKey, CounterStore};
pub use whitelist::{Whitelist, WhitelistedLimiter};
