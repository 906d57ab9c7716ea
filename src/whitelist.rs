//! Identifiers exempt from rate limiting.

use async_trait::async_trait;
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};
use tracing::debug;

use crate::{
    error::{RateLimitError, Result},
    limiter::{Decision, Limiter, WhitelistHook},
};

/// An IPv4 or IPv6 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    network: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(RateLimitError::Whitelist(format!(
                "prefix length must be 0-{max}, got {prefix_len}"
            )));
        }

        let network = match addr {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix_len))),
            IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix_len))),
        };

        Ok(Self { network, prefix_len })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                u32::from(ip) & v4_mask(self.prefix_len) == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                u128::from(ip) & v6_mask(self.prefix_len) == u128::from(net)
            }
            _ => false,
        }
    }
}

fn v4_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        !0u32 << (32 - u32::from(prefix_len))
    }
}

fn v6_mask(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        !0u128 << (128 - u32::from(prefix_len))
    }
}

impl FromStr for IpNetwork {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| RateLimitError::Whitelist(format!("{s:?} is not in CIDR notation")))?;

        let addr: IpAddr = addr
            .parse()
            .map_err(|e| RateLimitError::Whitelist(format!("invalid address in {s:?}: {e}")))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| RateLimitError::Whitelist(format!("invalid prefix length in {s:?}")))?;

        Self::new(addr, prefix_len)
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Allow-set of identifiers: exact strings and address ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    exact: Vec<String>,
    networks: Vec<IpNetwork>,
}

impl Whitelist {
    /// Exact-match whitelist; entries are compared as plain strings
    pub fn exact<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exact: values.into_iter().map(Into::into).collect(),
            networks: Vec::new(),
        }
    }

    /// Range whitelist built from networks
    pub fn networks<I>(networks: I) -> Self
    where
        I: IntoIterator<Item = IpNetwork>,
    {
        Self {
            exact: Vec::new(),
            networks: networks.into_iter().collect(),
        }
    }

    /// Parse configured entries: anything containing `/` is a CIDR range,
    /// everything else an exact value
    pub fn parse<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut whitelist = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if entry.contains('/') {
                whitelist.networks.push(entry.parse()?);
            } else {
                whitelist.exact.push(entry.to_string());
            }
        }
        Ok(whitelist)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        if self.exact.iter().any(|e| e == identifier) {
            return true;
        }
        if self.networks.is_empty() {
            return false;
        }

        match identifier.parse::<IpAddr>() {
            Ok(addr) => self.networks.iter().any(|net| net.contains(addr)),
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.networks.is_empty()
    }
}

/// Limiter decorator that lets whitelisted identifiers through untouched
pub struct WhitelistedLimiter<L> {
    inner: L,
    whitelist: Whitelist,
    on_whitelist: Option<WhitelistHook>,
}

impl<L: Limiter> WhitelistedLimiter<L> {
    pub fn new(inner: L, whitelist: Whitelist) -> Self {
        Self {
            inner,
            whitelist,
            on_whitelist: None,
        }
    }

    pub fn with_whitelist_hook(mut self, hook: WhitelistHook) -> Self {
        self.on_whitelist = Some(hook);
        self
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: Limiter> Limiter for WhitelistedLimiter<L> {
    async fn evaluate(&self, identifier: &str) -> Decision {
        if self.whitelist.contains(identifier) {
            debug!(identifier, "whitelisted");
            if let Some(hook) = &self.on_whitelist {
                hook(identifier);
            }
            return Decision::NotLimited;
        }

        self.inner.evaluate(identifier).await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    /// Limiter that always limits and counts how often it was asked
    #[derive(Default)]
    struct AlwaysLimited {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Limiter for AlwaysLimited {
        async fn evaluate(&self, _identifier: &str) -> Decision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Decision::Limited
        }
    }

    #[test]
    fn test_parse_network() {
        let net: IpNetwork = "192.168.1.77/24".parse().unwrap();
        assert_eq!(net.to_string(), "192.168.1.0/24");
        assert!(net.contains("192.168.1.200".parse().unwrap()));
        assert!(!net.contains("192.168.2.1".parse().unwrap()));
        assert!(!net.contains("::1".parse().unwrap()));

        assert!("10.0.0.0/33".parse::<IpNetwork>().is_err());
        assert!("10.0.0/8".parse::<IpNetwork>().is_err());
        assert!("10.0.0.0".parse::<IpNetwork>().is_err());
    }

    #[test]
    fn test_ipv6_network() {
        let net: IpNetwork = "2001:db8::/32".parse().unwrap();
        assert!(net.contains("2001:db8:1::7".parse().unwrap()));
        assert!(!net.contains("2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn test_zero_prefix_matches_family() {
        let net: IpNetwork = "0.0.0.0/0".parse().unwrap();
        assert!(net.contains("8.8.8.8".parse().unwrap()));
        assert!(!net.contains("::1".parse().unwrap()));
    }

    #[test]
    fn test_whitelist_contains() {
        let whitelist =
            Whitelist::parse(["127.0.0.1", "10.0.0.0/8", "internal-batch-job", " "]).unwrap();

        assert!(whitelist.contains("127.0.0.1"));
        assert!(whitelist.contains("10.20.30.40"));
        assert!(whitelist.contains("internal-batch-job"));
        assert!(!whitelist.contains("127.0.0.2"));
        assert!(!whitelist.contains("not-an-ip"));
        assert!(Whitelist::parse(["10.0.0.0/99"]).is_err());
    }

    #[test]
    fn test_exact_whitelist_does_not_match_ranges() {
        let whitelist = Whitelist::exact(["10.0.0.0/8"]);
        assert!(whitelist.contains("10.0.0.0/8"));
        assert!(!whitelist.contains("10.1.1.1"));
    }

    #[tokio::test]
    async fn test_whitelisted_ignores_inner_limiter() {
        let net: IpNetwork = "192.168.1.100/32".parse().unwrap();
        let limiter = WhitelistedLimiter::new(AlwaysLimited::default(), Whitelist::networks([net]));

        assert_eq!(limiter.evaluate("192.168.1.100").await, Decision::NotLimited);
        assert_eq!(limiter.inner().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_defers_when_not_whitelisted() {
        let limiter = WhitelistedLimiter::new(AlwaysLimited::default(), Whitelist::default());

        assert_eq!(limiter.evaluate("192.168.1.100").await, Decision::Limited);
        assert_eq!(limiter.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_calls_hook_when_whitelisted() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = seen.clone();
        let limiter = WhitelistedLimiter::new(
            AlwaysLimited::default(),
            Whitelist::exact(["192.168.1.100"]),
        )
        .with_whitelist_hook(Arc::new(move |id: &str| {
            hook_seen.lock().unwrap().push(id.to_string());
        }));

        assert_eq!(limiter.evaluate("192.168.1.100").await, Decision::NotLimited);
        assert_eq!(limiter.evaluate("192.168.1.101").await, Decision::Limited);
        assert_eq!(*seen.lock().unwrap(), vec!["192.168.1.100".to_string()]);
    }
}
