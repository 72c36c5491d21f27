//! Cached read model served to the dashboard
//!
//! Ties together the chain registry, the contract reader, token metadata, jar
//! aggregation and authorization behind query-keyed caches.

use futures::future::join_all;
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::{jar_key, JarAggregator, JarFilter, JarRecord};
use crate::authorization::{AuthorizationEvaluator, AuthorizationView};
use crate::cache::ReadModelCache;
use crate::chains::ChainRegistry;
use crate::common::{format_address, parse_address, Address, ReaderError, Result};
use crate::config::ReaderConfig;
use crate::metadata::TokenMetadataCache;
use crate::rpc::{ContractReader, HttpTransport, RpcTransport};

/// A jar with its currency resolved for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JarView {
    #[serde(flatten)]
    pub jar: JarRecord,
    pub currency_symbol: String,
    pub currency_decimals: u8,
}

/// One listing as served to clients
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JarPage {
    pub jars: Vec<JarView>,
    pub partial: bool,
    pub failed_chains: BTreeSet<u64>,
    pub unreadable_jars: Vec<String>,
}

struct Services {
    registry: Arc<ChainRegistry>,
    aggregator: JarAggregator,
    metadata: TokenMetadataCache,
}

impl Services {
    async fn page(&self, filter: JarFilter) -> Result<JarPage> {
        let listing = self.aggregator.list_jars(&self.registry.chain_ids(), &filter).await;
        let jars = self.enrich(listing.jars).await;
        Ok(JarPage {
            jars,
            partial: listing.partial,
            failed_chains: listing.failed_chains,
            unreadable_jars: listing.unreadable_jars,
        })
    }

    async fn view(&self, chain_id: u64, address: Address) -> Result<JarView> {
        let record = self.aggregator.get_jar(chain_id, address).await?;
        self.enrich(vec![record])
            .await
            .pop()
            .ok_or_else(|| ReaderError::NotFound(jar_key(chain_id, &address)))
    }

    /// Attach currency symbol and decimals, one metadata batch per chain
    async fn enrich(&self, jars: Vec<JarRecord>) -> Vec<JarView> {
        let mut currencies: BTreeMap<u64, Vec<Address>> = BTreeMap::new();
        for jar in &jars {
            let tokens = currencies.entry(jar.chain_id).or_default();
            if !tokens.contains(&jar.currency) {
                tokens.push(jar.currency);
            }
        }

        let lookups = currencies.iter().map(|(chain_id, tokens)| async move {
            let (symbols, decimals) = futures::join!(
                self.metadata.get_symbols(*chain_id, tokens),
                self.metadata.get_decimals(*chain_id, tokens)
            );
            (*chain_id, (symbols, decimals))
        });
        let resolved: HashMap<u64, (HashMap<Address, String>, HashMap<Address, u8>)> =
            join_all(lookups).await.into_iter().collect();

        jars.into_iter()
            .map(|jar| {
                let (symbols, decimals) = match resolved.get(&jar.chain_id) {
                    Some((symbols, decimals)) => (symbols.get(&jar.currency), decimals.get(&jar.currency)),
                    None => (None, None),
                };
                JarView {
                    currency_symbol: symbols
                        .cloned()
                        .unwrap_or_else(|| self.metadata.fallback_symbol().to_string()),
                    currency_decimals: decimals.copied().unwrap_or(self.metadata.fallback_decimals()),
                    jar,
                }
            })
            .collect()
    }
}

/// Entry point for every read the dashboard performs
pub struct JarReadModel {
    services: Arc<Services>,
    evaluator: AuthorizationEvaluator,
    pages: ReadModelCache<JarPage>,
    views: ReadModelCache<JarView>,
    /// Lifetime of a listing with failed chains
    partial_ttl: Duration,
}

impl JarReadModel {
    /// Build a read model talking HTTP JSON-RPC to the configured endpoints
    pub fn from_config(config: &ReaderConfig) -> Result<Self> {
        let registry = ChainRegistry::from_config(config)?;
        let transport = HttpTransport::new(config.rpc.request_timeout())?;
        Ok(Self::new(config, registry, Arc::new(transport)))
    }

    pub fn new(config: &ReaderConfig, registry: ChainRegistry, transport: Arc<dyn RpcTransport>) -> Self {
        let registry = Arc::new(registry);
        let reader = ContractReader::new(registry.clone(), transport, config.rpc.max_batch_size);

        info!(
            "Jar read model serving {} chain(s): {:?}",
            registry.len(),
            registry.chain_ids()
        );

        let services = Services {
            registry,
            aggregator: JarAggregator::new(reader.clone(), config.aggregator.clone()),
            metadata: TokenMetadataCache::new(reader, config.metadata.clone()),
        };

        Self {
            services: Arc::new(services),
            evaluator: AuthorizationEvaluator::from_setting(config.admin_addresses.as_deref()),
            pages: ReadModelCache::new(config.cache.read_model_ttl()),
            views: ReadModelCache::new(config.cache.read_model_ttl()),
            partial_ttl: config.cache.partial_ttl(),
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.services.registry
    }

    /// Every jar on every enabled chain that matches `filter`
    pub async fn all_jars(&self, filter: &JarFilter) -> Result<JarPage> {
        let key = format!("jars:all:{}", filter.cache_key());
        self.listing(&key, filter.clone()).await
    }

    /// Jars owned by `owner`, blacklisted ones excluded
    pub async fn jars_by_owner(&self, owner: &str) -> Result<JarPage> {
        let owner = parse_address(owner)?;
        let key = format!("jars:owner:{}", format_address(&owner));
        self.listing(&key, JarFilter::by_owner(owner)).await
    }

    /// One jar, read directly. `NotFound` when nothing lives at `address`.
    pub async fn jar(&self, chain_id: u64, address: &str) -> Result<JarView> {
        let address = parse_address(address)?;
        let key = format!("jar:{}", jar_key(chain_id, &address));
        let services = self.services.clone();
        self.views
            .get(&key, move || async move { services.view(chain_id, address).await })
            .await
    }

    pub async fn symbols(&self, chain_id: u64, addresses: &[Address]) -> HashMap<Address, String> {
        self.services.metadata.get_symbols(chain_id, addresses).await
    }

    /// Roles of `address` across every listed jar, blacklisted jars included.
    /// Jars on failed chains contribute nothing.
    pub async fn authorization(&self, address: &str) -> Result<AuthorizationView> {
        let everything = JarFilter {
            owner: None,
            include_blacklisted: true,
        };
        let page = self.all_jars(&everything).await?;
        let records: Vec<JarRecord> = page.jars.into_iter().map(|view| view.jar).collect();
        Ok(self.evaluator.evaluate(address, &records))
    }

    /// Drop a jar's cached view and every listing
    pub fn invalidate_jar(&self, chain_id: u64, address: &Address) {
        debug!("Invalidating jar {}", jar_key(chain_id, address));
        self.views.invalidate(&format!("jar:{}", jar_key(chain_id, address)));
        self.pages.clear();
    }

    /// Drop every cached view on `chain_id` and every listing
    pub fn invalidate_chain(&self, chain_id: u64) {
        debug!("Invalidating chain {}", chain_id);
        self.views.invalidate_prefix(&format!("jar:{chain_id}:"));
        self.pages.clear();
    }

    pub fn invalidate_all(&self) {
        self.views.clear();
        self.pages.clear();
    }

    /// Drop expired entries from every cache
    pub fn purge_expired(&self) {
        let dropped = self.pages.purge_expired() + self.views.purge_expired();
        self.services.metadata.purge_expired();
        debug!("Purged {} expired read-model entries", dropped);
    }

    async fn listing(&self, key: &str, filter: JarFilter) -> Result<JarPage> {
        let services = self.services.clone();
        let ttl = self.pages.ttl();
        let partial_ttl = self.partial_ttl;
        // Pages with failed chains expire sooner so those chains are retried.
        self.pages
            .get_with_ttl(
                key,
                move || async move { services.page(filter).await },
                move |page: &JarPage| if page.partial { partial_ttl } else { ttl },
            )
            .await
    }
}
