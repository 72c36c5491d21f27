//! Token metadata cache
//!
//! Symbols and decimals are effectively immutable, so they are cached per
//! `(chain_id, address)` for `ttl` and retained for at most `max_age`. A stale
//! entry is refetched; if the refetch fails the stale value is still served
//! until it ages past `max_age`. Lookups that fail with nothing retained yield
//! a placeholder instead of an error.
//!
//! Each address is fetched by at most one batch at a time: overlapping callers
//! wait on the batch already in flight.

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::CacheEntry;
use crate::common::{format_address, Address};
use crate::config::MetadataConfig;
use crate::rpc::{AbiKind, AbiValue, ContractCallSpec, ContractReader};

/// Addresses conventionally standing for a chain's native currency
pub fn native_placeholders() -> [Address; 3] {
    [
        Address::zero(),
        Address::from_low_u64_be(3),
        Address::from_slice(&[0xee; 20]),
    ]
}

pub fn is_native_placeholder(address: &Address) -> bool {
    native_placeholders().contains(address)
}

type MetadataKey = (u64, Address);
type Lookup<V> = Shared<BoxFuture<'static, Option<V>>>;

struct Flight<V> {
    id: u64,
    lookup: Lookup<V>,
}

struct FieldState<V> {
    entries: HashMap<MetadataKey, CacheEntry<V>>,
    in_flight: HashMap<MetadataKey, Flight<V>>,
    next_flight_id: u64,
}

/// Cache for one no-argument metadata getter such as `symbol()`
struct FieldCache<V> {
    method: &'static str,
    returns: AbiKind,
    extract: fn(&AbiValue) -> Option<V>,
    state: Mutex<FieldState<V>>,
}

impl<V> FieldCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn new(method: &'static str, returns: AbiKind, extract: fn(&AbiValue) -> Option<V>) -> Self {
        Self {
            method,
            returns,
            extract,
            state: Mutex::new(FieldState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                next_flight_id: 0,
            }),
        }
    }

    /// `None` for an address means the lookup failed and nothing usable was retained
    async fn resolve(
        &self,
        reader: &ContractReader,
        chain_id: u64,
        addresses: &[Address],
        ttl: Duration,
        max_age: Duration,
    ) -> HashMap<Address, Option<V>> {
        let mut resolved = HashMap::new();
        let mut waiting: Vec<(Address, u64, Lookup<V>)> = Vec::new();

        {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.entries.retain(|_, entry| entry.age_at(now) <= max_age);

            let mut to_fetch = Vec::new();
            let mut seen = HashSet::new();
            for address in addresses.iter().filter(|a| seen.insert(**a)) {
                let key = (chain_id, *address);
                if let Some(entry) = state.entries.get(&key).filter(|e| e.is_fresh_at(now)) {
                    resolved.insert(*address, Some(entry.value.clone()));
                } else if let Some(flight) = state.in_flight.get(&key) {
                    waiting.push((*address, flight.id, flight.lookup.clone()));
                } else {
                    to_fetch.push(*address);
                }
            }

            if !to_fetch.is_empty() {
                debug!(
                    "Fetching {} for {} address(es) on chain {}",
                    self.method,
                    to_fetch.len(),
                    chain_id
                );
                let id = state.next_flight_id;
                state.next_flight_id += 1;

                let batch = fetch_field(
                    reader.clone(),
                    chain_id,
                    to_fetch.clone(),
                    self.method,
                    self.returns,
                    self.extract,
                )
                .boxed()
                .shared();

                for address in to_fetch {
                    let lookup: Lookup<V> = batch
                        .clone()
                        .map(move |values| values.get(&address).cloned())
                        .boxed()
                        .shared();
                    state.in_flight.insert(
                        (chain_id, address),
                        Flight {
                            id,
                            lookup: lookup.clone(),
                        },
                    );
                    waiting.push((address, id, lookup));
                }
            }
        }

        let outcomes = join_all(waiting.iter().map(|(_, _, lookup)| lookup.clone())).await;

        let mut state = self.state.lock();
        for ((address, id, _), outcome) in waiting.into_iter().zip(outcomes) {
            let key = (chain_id, address);
            if state.in_flight.get(&key).map(|flight| flight.id) == Some(id) {
                state.in_flight.remove(&key);
                if let Some(value) = &outcome {
                    let label = format!("{}:{}:{}", self.method, chain_id, format_address(&address));
                    state.entries.insert(key, CacheEntry::new(&label, value.clone(), ttl));
                }
            }

            let value = outcome.or_else(|| state.entries.get(&key).map(|entry| entry.value.clone()));
            resolved.insert(address, value);
        }

        resolved
    }

    fn purge_expired(&self, max_age: Duration) {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .retain(|_, entry| entry.age_at(now) <= max_age);
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

async fn fetch_field<V>(
    reader: ContractReader,
    chain_id: u64,
    addresses: Vec<Address>,
    method: &'static str,
    returns: AbiKind,
    extract: fn(&AbiValue) -> Option<V>,
) -> Arc<HashMap<Address, V>> {
    let specs = addresses
        .iter()
        .map(|address| ContractCallSpec::new(chain_id, *address, method, vec![], returns))
        .collect();

    let mut values = HashMap::new();
    for result in reader.read_batch(chain_id, specs).await {
        let extracted = result.value().and_then(extract);
        match extracted {
            Some(value) => {
                values.insert(result.spec.address, value);
            }
            None => warn!(
                "{} failed for {} on chain {}: {}",
                method,
                format_address(&result.spec.address),
                chain_id,
                result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unexpected value".to_string())
            ),
        }
    }
    Arc::new(values)
}

fn extract_symbol(value: &AbiValue) -> Option<String> {
    value
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_decimals(value: &AbiValue) -> Option<u8> {
    value
        .as_uint()
        .filter(|v| v.bits() <= 8)
        .map(|v| v.low_u64() as u8)
}

/// Symbol and decimals lookups with placeholder fallback
pub struct TokenMetadataCache {
    reader: ContractReader,
    config: MetadataConfig,
    symbols: FieldCache<String>,
    decimals: FieldCache<u8>,
}

impl TokenMetadataCache {
    pub fn new(reader: ContractReader, config: MetadataConfig) -> Self {
        Self {
            reader,
            config,
            symbols: FieldCache::new("symbol()", AbiKind::String, extract_symbol),
            decimals: FieldCache::new("decimals()", AbiKind::Uint, extract_decimals),
        }
    }

    pub fn fallback_symbol(&self) -> &str {
        &self.config.fallback_symbol
    }

    pub fn fallback_decimals(&self) -> u8 {
        self.config.fallback_decimals
    }

    /// Symbol per address; failed lookups map to the fallback symbol
    pub async fn get_symbols(&self, chain_id: u64, addresses: &[Address]) -> HashMap<Address, String> {
        let native = self
            .reader
            .registry()
            .get(chain_id)
            .map(|chain| chain.native_currency.symbol.clone());

        let (placeholders, tokens): (Vec<Address>, Vec<Address>) =
            addresses.iter().copied().partition(|a| is_native_placeholder(a));

        let mut symbols: HashMap<Address, String> = self
            .symbols
            .resolve(&self.reader, chain_id, &tokens, self.config.ttl(), self.config.max_age())
            .await
            .into_iter()
            .map(|(address, symbol)| {
                (address, symbol.unwrap_or_else(|| self.config.fallback_symbol.clone()))
            })
            .collect();

        for address in placeholders {
            let symbol = native
                .clone()
                .unwrap_or_else(|| self.config.fallback_symbol.clone());
            symbols.insert(address, symbol);
        }
        symbols
    }

    /// Decimals per address; failed lookups map to the fallback decimals
    pub async fn get_decimals(&self, chain_id: u64, addresses: &[Address]) -> HashMap<Address, u8> {
        let native = self
            .reader
            .registry()
            .get(chain_id)
            .map(|chain| chain.native_currency.decimals);

        let (placeholders, tokens): (Vec<Address>, Vec<Address>) =
            addresses.iter().copied().partition(|a| is_native_placeholder(a));

        let mut decimals: HashMap<Address, u8> = self
            .decimals
            .resolve(&self.reader, chain_id, &tokens, self.config.ttl(), self.config.max_age())
            .await
            .into_iter()
            .map(|(address, value)| (address, value.unwrap_or(self.config.fallback_decimals)))
            .collect();

        for address in placeholders {
            decimals.insert(address, native.unwrap_or(self.config.fallback_decimals));
        }
        decimals
    }

    /// Drop entries past the retention cap
    pub fn purge_expired(&self) {
        self.symbols.purge_expired(self.config.max_age());
        self.decimals.purge_expired(self.config.max_age());
    }

    /// Number of retained entries (symbols, decimals)
    pub fn len(&self) -> (usize, usize) {
        (self.symbols.len(), self.decimals.len())
    }
}
