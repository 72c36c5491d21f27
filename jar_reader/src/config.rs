//! Reader configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `JAR_READER` (`__` separates sections,
//! e.g. `JAR_READER_RPC__MAX_BATCH_SIZE=50`).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::chains::NativeCurrency;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "JAR_READER";

/// Top-level configuration for the read layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Comma-separated global admin addresses. Unset means nobody is admin.
    pub admin_addresses: Option<String>,
    /// Chains to aggregate, in any order. Empty means every registered chain.
    pub enabled_chains: Vec<u64>,
    /// Overrides and additions to the built-in chain table.
    ///
    /// Built-in chains ship without a jar registry address, so every enabled
    /// chain needs an entry here with `jar_registry` set. A chain without one
    /// is reported in `failed_chains` (`Misconfigured`) on every listing.
    pub chains: Vec<ChainConfig>,
    pub rpc: RpcConfig,
    pub cache: CacheConfig,
    pub metadata: MetadataConfig,
    pub aggregator: AggregatorConfig,
}

/// Per-chain override. Fields left unset keep the built-in value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: Option<String>,
    pub rpc_urls: Vec<String>,
    pub native_currency: Option<NativeCurrency>,
    /// Jar registry (factory) contract address, 0x-prefixed hex.
    /// Required for the chain to be enumerated.
    pub jar_registry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Maximum number of calls per JSON-RPC batch request
    pub max_batch_size: usize,
    /// Timeout for a single HTTP request
    pub request_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            max_batch_size: 100,
            request_timeout_ms: 10_000,
        }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Freshness window for jar listings and single jars
    pub read_model_ttl_secs: u64,
    /// Freshness window for listings with failed chains, so those chains are retried sooner
    pub partial_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            read_model_ttl_secs: 30,
            partial_ttl_secs: 5,
        }
    }
}

impl CacheConfig {
    pub fn read_model_ttl(&self) -> Duration {
        Duration::from_secs(self.read_model_ttl_secs)
    }

    pub fn partial_ttl(&self) -> Duration {
        Duration::from_secs(self.partial_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Freshness window for symbols and decimals
    pub ttl_secs: u64,
    /// Entries older than this are purged, never served
    pub max_age_secs: u64,
    /// Placeholder returned when a symbol cannot be read
    pub fallback_symbol: String,
    /// Placeholder returned when decimals cannot be read
    pub fallback_decimals: u8,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig {
            ttl_secs: 60,
            max_age_secs: 300,
            fallback_symbol: "TOKEN".to_string(),
            fallback_decimals: 18,
        }
    }
}

impl MetadataConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Deadline for one chain's whole enumeration pass
    pub chain_timeout_ms: u64,
    /// A chain whose per-jar calls fail above this ratio is reported as failed
    pub max_failure_ratio: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            chain_timeout_ms: 15_000,
            max_failure_ratio: 0.5,
        }
    }
}

impl AggregatorConfig {
    pub fn chain_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_timeout_ms)
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            admin_addresses: None,
            enabled_chains: Vec::new(),
            chains: Vec::new(),
            rpc: RpcConfig::default(),
            cache: CacheConfig::default(),
            metadata: MetadataConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

impl ReaderConfig {
    /// Load defaults, then `path` (if given), then `JAR_READER_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&ReaderConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: ReaderConfig = builder
            .build()
            .map_err(|e| anyhow!("Failed to load configuration: {}", e))?
            .try_deserialize()
            .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values that would make the reader misbehave
    pub fn validate(&self) -> Result<()> {
        if self.rpc.max_batch_size == 0 {
            return Err(anyhow!("rpc.max_batch_size must be at least 1"));
        }
        if self.rpc.request_timeout_ms == 0 || self.aggregator.chain_timeout_ms == 0 {
            return Err(anyhow!("timeouts must be non-zero"));
        }
        if self.metadata.max_age_secs < self.metadata.ttl_secs {
            return Err(anyhow!(
                "metadata.max_age_secs ({}) must not be below metadata.ttl_secs ({})",
                self.metadata.max_age_secs,
                self.metadata.ttl_secs
            ));
        }
        if self.cache.partial_ttl_secs > self.cache.read_model_ttl_secs {
            return Err(anyhow!(
                "cache.partial_ttl_secs ({}) must not exceed cache.read_model_ttl_secs ({})",
                self.cache.partial_ttl_secs,
                self.cache.read_model_ttl_secs
            ));
        }
        if !(0.0..=1.0).contains(&self.aggregator.max_failure_ratio) {
            return Err(anyhow!("aggregator.max_failure_ratio must be within 0.0..=1.0"));
        }
        Ok(())
    }
}
