//! Engine configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```
//! use rdht::dht::{DhtConfig, RoutingMode};
//!
//! let config = DhtConfig::from_toml_str(r#"
//!     mode = "crawl"
//!     local_addr = "0.0.0.0:7000"
//!     check_bucket_period = 10
//! "#).unwrap();
//! assert_eq!(config.mode, RoutingMode::Crawl);
//! assert_eq!(config.check_bucket_period.as_secs(), 10);
//! assert_eq!(config.k, 8);
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::DhtError;
use crate::constants::*;

/// How the routing table organizes and churns its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// One bucket per shared-prefix length, `bucket_size` nodes each.
    #[default]
    Standard,
    /// A single oversized bucket bounded only by `max_nodes`; nodes are
    /// queried and dropped on every refresh so the table keeps turning over.
    Crawl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Udp4,
    Udp6,
}

impl Network {
    pub fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Udp4 => addr.is_ipv4(),
            Network::Udp6 => addr.is_ipv6(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtConfig {
    pub mode: RoutingMode,
    pub network: Network,
    pub local_addr: SocketAddr,
    pub seed_nodes: Vec<String>,
    pub k: usize,
    pub bucket_size: usize,
    pub max_nodes: usize,
    #[serde(with = "secs")]
    pub bucket_expired_after: Duration,
    #[serde(with = "secs")]
    pub node_expired_after: Duration,
    #[serde(with = "secs")]
    pub check_bucket_period: Duration,
    pub max_transaction_cursor: u64,
    pub refresh_node_num: usize,
    #[serde(with = "secs")]
    pub query_timeout: Duration,
    pub retry_budget: usize,
    pub max_concurrent_lookups: usize,
    pub enable_nat: bool,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Standard,
            network: Network::Udp4,
            local_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            seed_nodes: BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
            k: DEFAULT_K,
            bucket_size: DEFAULT_BUCKET_SIZE,
            max_nodes: DEFAULT_MAX_NODES,
            bucket_expired_after: DEFAULT_BUCKET_EXPIRED_AFTER,
            node_expired_after: DEFAULT_NODE_EXPIRED_AFTER,
            check_bucket_period: DEFAULT_CHECK_BUCKET_PERIOD,
            max_transaction_cursor: DEFAULT_MAX_TRANSACTION_CURSOR,
            refresh_node_num: DEFAULT_REFRESH_NODE_NUM,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            retry_budget: DEFAULT_RETRY_BUDGET,
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
            enable_nat: true,
        }
    }
}

impl DhtConfig {
    /// The crawler preset: one unbounded bucket, everything considered stale
    /// on every tick.
    pub fn crawler() -> Self {
        Self {
            mode: RoutingMode::Crawl,
            bucket_size: usize::MAX,
            bucket_expired_after: Duration::ZERO,
            node_expired_after: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, DhtError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DhtError> {
        let config: DhtConfig =
            toml::from_str(content).map_err(|e| DhtError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DhtError> {
        if self.k == 0 {
            return Err(DhtError::Config("k must be positive".into()));
        }
        if self.bucket_size == 0 {
            return Err(DhtError::Config("bucket_size must be positive".into()));
        }
        if self.max_transaction_cursor < 2 {
            return Err(DhtError::Config(
                "max_transaction_cursor must be at least 2".into(),
            ));
        }
        if self.retry_budget == 0 {
            return Err(DhtError::Config("retry_budget must be positive".into()));
        }
        if self.check_bucket_period.is_zero() {
            return Err(DhtError::Config("check_bucket_period must be positive".into()));
        }
        if !self.network.matches(&self.local_addr) {
            return Err(DhtError::Config(format!(
                "local_addr {} does not match network {:?}",
                self.local_addr, self.network
            )));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
