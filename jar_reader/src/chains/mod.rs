//! Chain registry
//!
//! The set of supported networks is fixed at startup: a built-in table of
//! well-known chains, patched by configuration. Registry order is the order in
//! which aggregated results are grouped.
//!
//! Built-in entries carry no jar registry; deployments supply one per chain
//! through `chains[].jar_registry`.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::common::{parse_address, Address, ReaderError, Result};
use crate::config::ReaderConfig;

/// Native currency of a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl NativeCurrency {
    fn new(name: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
        }
    }

    fn ether() -> Self {
        Self::new("Ether", "ETH", 18)
    }
}

/// Static description of one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainDescriptor {
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Human readable name
    pub name: String,
    /// RPC endpoints, tried in order
    pub rpc_urls: Vec<String>,
    /// Native currency metadata
    pub native_currency: NativeCurrency,
    /// Jar registry contract; chains without one cannot be enumerated
    pub jar_registry: Option<Address>,
}

impl ChainDescriptor {
    pub fn new(chain_id: u64, name: &str, rpc_urls: &[&str], native_currency: NativeCurrency) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            rpc_urls: rpc_urls.iter().map(|url| url.to_string()).collect(),
            native_currency,
            jar_registry: None,
        }
    }

    pub fn with_jar_registry(mut self, registry: Address) -> Self {
        self.jar_registry = Some(registry);
        self
    }
}

/// Built-in chain table, in registry order
pub fn builtin_chains() -> Vec<ChainDescriptor> {
    vec![
        ChainDescriptor::new(1, "Ethereum", &["https://ethereum-rpc.publicnode.com"], NativeCurrency::ether()),
        ChainDescriptor::new(10, "Optimism", &["https://mainnet.optimism.io"], NativeCurrency::ether()),
        ChainDescriptor::new(
            100,
            "Gnosis",
            &["https://rpc.gnosischain.com"],
            NativeCurrency::new("xDAI", "XDAI", 18),
        ),
        ChainDescriptor::new(8453, "Base", &["https://mainnet.base.org"], NativeCurrency::ether()),
        ChainDescriptor::new(42161, "Arbitrum One", &["https://arb1.arbitrum.io/rpc"], NativeCurrency::ether()),
        ChainDescriptor::new(
            42220,
            "Celo",
            &["https://forno.celo.org"],
            NativeCurrency::new("Celo", "CELO", 18),
        ),
        ChainDescriptor::new(84532, "Base Sepolia", &["https://sepolia.base.org"], NativeCurrency::ether()),
        ChainDescriptor::new(
            11155111,
            "Sepolia",
            &["https://ethereum-sepolia-rpc.publicnode.com"],
            NativeCurrency::ether(),
        ),
    ]
}

/// Read-only set of chain descriptors
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainDescriptor>,
}

impl ChainRegistry {
    /// Build a registry from explicit descriptors. Duplicate ids keep the first.
    pub fn new(descriptors: Vec<ChainDescriptor>) -> Self {
        let mut seen = BTreeSet::new();
        let chains = descriptors
            .into_iter()
            .filter(|chain| seen.insert(chain.chain_id))
            .collect();
        Self { chains }
    }

    /// Built-in table patched by `config.chains`, restricted to `config.enabled_chains`
    pub fn from_config(config: &ReaderConfig) -> Result<Self> {
        let mut chains = builtin_chains();

        for patch in &config.chains {
            let jar_registry = patch
                .jar_registry
                .as_deref()
                .map(parse_address)
                .transpose()
                .map_err(|e| {
                    ReaderError::Misconfigured(format!(
                        "jar_registry for chain {}: {}",
                        patch.chain_id, e
                    ))
                })?;

            match chains.iter_mut().find(|c| c.chain_id == patch.chain_id) {
                Some(existing) => {
                    if let Some(name) = &patch.name {
                        existing.name = name.clone();
                    }
                    if !patch.rpc_urls.is_empty() {
                        existing.rpc_urls = patch.rpc_urls.clone();
                    }
                    if let Some(currency) = &patch.native_currency {
                        existing.native_currency = currency.clone();
                    }
                    if jar_registry.is_some() {
                        existing.jar_registry = jar_registry;
                    }
                }
                None => {
                    debug!("Registering chain {} from configuration", patch.chain_id);
                    chains.push(ChainDescriptor {
                        chain_id: patch.chain_id,
                        name: patch
                            .name
                            .clone()
                            .unwrap_or_else(|| format!("chain-{}", patch.chain_id)),
                        rpc_urls: patch.rpc_urls.clone(),
                        native_currency: patch.native_currency.clone().unwrap_or_else(NativeCurrency::ether),
                        jar_registry,
                    });
                }
            }
        }

        if !config.enabled_chains.is_empty() {
            if let Some(unknown) = config
                .enabled_chains
                .iter()
                .find(|id| !chains.iter().any(|c| c.chain_id == **id))
            {
                return Err(ReaderError::Misconfigured(format!(
                    "enabled chain {unknown} has no descriptor"
                )));
            }
            chains.retain(|c| config.enabled_chains.contains(&c.chain_id));
        }

        for chain in chains.iter().filter(|c| c.jar_registry.is_none()) {
            warn!(
                "Chain {} ({}) has no jar_registry configured; it cannot be enumerated",
                chain.chain_id, chain.name
            );
        }

        Ok(Self::new(chains))
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainDescriptor> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// All chains in registry order
    pub fn iter(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.chains.iter()
    }

    pub fn chain_ids(&self) -> BTreeSet<u64> {
        self.chains.iter().map(|c| c.chain_id).collect()
    }

    /// Order `requested` by registry position; ids not in the registry come last, ascending
    pub fn in_registry_order(&self, requested: &BTreeSet<u64>) -> Vec<u64> {
        let mut ordered: Vec<u64> = self
            .chains
            .iter()
            .map(|c| c.chain_id)
            .filter(|id| requested.contains(id))
            .collect();
        ordered.extend(requested.iter().filter(|id| self.get(**id).is_none()));
        ordered
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;

    #[test]
    fn test_builtin_registry_order() {
        let registry = ChainRegistry::from_config(&ReaderConfig::default()).unwrap();
        let ids: Vec<u64> = registry.iter().map(|c| c.chain_id).collect();
        assert_eq!(ids[0], 1);
        assert!(ids.contains(&8453));
        assert_eq!(registry.get(100).unwrap().native_currency.symbol, "XDAI");
    }

    #[test]
    fn test_builtins_need_a_configured_jar_registry() {
        assert!(builtin_chains().iter().all(|c| c.jar_registry.is_none()));
        let registry = ChainRegistry::from_config(&ReaderConfig::default()).unwrap();
        assert!(registry.iter().all(|c| c.jar_registry.is_none()));
    }

    #[test]
    fn test_registry_order_ignores_request_order() {
        let registry = ChainRegistry::from_config(&ReaderConfig::default()).unwrap();
        let requested: BTreeSet<u64> = [8453, 1, 999].into_iter().collect();
        assert_eq!(registry.in_registry_order(&requested), vec![1, 8453, 999]);
    }

    #[test]
    fn test_config_patches_and_adds_chains() {
        let config = ReaderConfig {
            chains: vec![
                ChainConfig {
                    chain_id: 8453,
                    rpc_urls: vec!["http://base.local".to_string()],
                    jar_registry: Some("0x00000000000000000000000000000000000000aa".to_string()),
                    ..Default::default()
                },
                ChainConfig {
                    chain_id: 31337,
                    name: Some("Anvil".to_string()),
                    rpc_urls: vec!["http://127.0.0.1:8545".to_string()],
                    ..Default::default()
                },
            ],
            enabled_chains: vec![31337, 8453],
            ..Default::default()
        };

        let registry = ChainRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        let base = registry.get(8453).unwrap();
        assert_eq!(base.rpc_urls, vec!["http://base.local".to_string()]);
        assert!(base.jar_registry.is_some());
        assert_eq!(registry.get(31337).unwrap().name, "Anvil");
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn test_rejects_unknown_enabled_chain() {
        let config = ReaderConfig {
            enabled_chains: vec![424242],
            ..Default::default()
        };
        assert!(matches!(
            ChainRegistry::from_config(&config),
            Err(ReaderError::Misconfigured(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_registry_address() {
        let config = ReaderConfig {
            chains: vec![ChainConfig {
                chain_id: 1,
                jar_registry: Some("not-an-address".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(ChainRegistry::from_config(&config).is_err());
    }
}
