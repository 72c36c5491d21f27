//! Cross-chain jar enumeration
//!
//! Each requested chain is read concurrently under its own deadline. A chain
//! that cannot be enumerated is reported in `failed_chains` and contributes no
//! jars; the rest of the listing is still returned.

mod jar;

pub use jar::{
    assemble_jar, jar_calls, jar_key, AccessType, JarRecord, WithdrawalOption, WithdrawalRules,
    CALLS_PER_JAR, REGISTRY_BLACKLISTED, REGISTRY_ENUMERATE,
};

use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use crate::common::{format_address, Address, ReaderError, Result};
use crate::config::AggregatorConfig;
use crate::rpc::{AbiKind, ContractCallSpec, ContractReader};

/// Post-merge filter over a listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JarFilter {
    pub owner: Option<Address>,
    /// Blacklisted jars are hidden unless set
    pub include_blacklisted: bool,
}

impl JarFilter {
    pub fn by_owner(owner: Address) -> Self {
        Self {
            owner: Some(owner),
            include_blacklisted: false,
        }
    }

    pub fn matches(&self, jar: &JarRecord) -> bool {
        if !self.include_blacklisted && jar.is_blacklisted {
            return false;
        }
        self.owner.map_or(true, |owner| jar.owner == owner)
    }

    /// Stable textual form, used in read-model keys
    pub fn cache_key(&self) -> String {
        let owner = self
            .owner
            .map(|owner| format_address(&owner))
            .unwrap_or_else(|| "any".to_string());
        format!("owner={};blacklisted={}", owner, self.include_blacklisted)
    }
}

/// Result of a cross-chain enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JarListing {
    pub jars: Vec<JarRecord>,
    /// True iff at least one requested chain failed
    pub partial: bool,
    pub failed_chains: BTreeSet<u64>,
    /// `<chain_id>:<address>` of enumerated jars whose essential fields could not be read
    pub unreadable_jars: Vec<String>,
}

struct ChainJars {
    jars: Vec<JarRecord>,
    unreadable: Vec<String>,
}

pub struct JarAggregator {
    reader: ContractReader,
    config: AggregatorConfig,
}

impl JarAggregator {
    pub fn new(reader: ContractReader, config: AggregatorConfig) -> Self {
        Self { reader, config }
    }

    pub fn reader(&self) -> &ContractReader {
        &self.reader
    }

    /// Enumerate jars on `chains`, merged in registry order and filtered.
    pub async fn list_jars(&self, chains: &BTreeSet<u64>, filter: &JarFilter) -> JarListing {
        let ordered = self.reader.registry().in_registry_order(chains);
        let deadline = self.config.chain_timeout();

        let passes = ordered.iter().map(|chain_id| async move {
            let outcome = match tokio::time::timeout(deadline, self.read_chain(*chain_id)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ReaderError::Timeout(duration_ms(deadline))),
            };
            (*chain_id, outcome)
        });

        let mut listing = JarListing::default();
        for (chain_id, outcome) in join_all(passes).await {
            match outcome {
                Ok(chain_jars) => {
                    listing.jars.extend(chain_jars.jars);
                    listing.unreadable_jars.extend(chain_jars.unreadable);
                }
                Err(e) => {
                    warn!("Chain {} excluded from jar listing: {}", chain_id, e);
                    listing.failed_chains.insert(chain_id);
                }
            }
        }

        listing.jars.retain(|jar| filter.matches(jar));
        listing.partial = !listing.failed_chains.is_empty();

        info!(
            "Listed {} jar(s) across {} chain(s), {} failed",
            listing.jars.len(),
            ordered.len(),
            listing.failed_chains.len()
        );
        listing
    }

    /// Read a single jar without enumerating its registry
    pub async fn get_jar(&self, chain_id: u64, address: Address) -> Result<JarRecord> {
        let registry = self.jar_registry(chain_id)?;
        let deadline = self.config.chain_timeout();

        let read = self.reader.read_batch(chain_id, jar_calls(chain_id, registry, address));
        let results = tokio::time::timeout(deadline, read)
            .await
            .map_err(|_| ReaderError::Timeout(duration_ms(deadline)))?;

        // A transport-class failure on the owner read is a chain problem, not a missing jar.
        if let Some(error) = results.first().and_then(|r| r.error.as_ref()) {
            if error.is_transport() {
                return Err(error.clone());
            }
        }

        match assemble_jar(chain_id, address, &results) {
            Some(record) if !record.owner.is_zero() => Ok(record),
            _ => Err(ReaderError::NotFound(jar_key(chain_id, &address))),
        }
    }

    fn jar_registry(&self, chain_id: u64) -> Result<Address> {
        let chain = self
            .reader
            .registry()
            .get(chain_id)
            .ok_or_else(|| ReaderError::Misconfigured(format!("Chain {chain_id} is not registered")))?;
        chain
            .jar_registry
            .ok_or_else(|| ReaderError::Misconfigured(format!("No jar registry configured for chain {chain_id}")))
    }

    async fn read_chain(&self, chain_id: u64) -> Result<ChainJars> {
        let registry = self.jar_registry(chain_id)?;

        let enumerate = ContractCallSpec::new(chain_id, registry, REGISTRY_ENUMERATE, vec![], AbiKind::AddressArray);
        let mut listed = self.reader.read_batch(chain_id, vec![enumerate]).await;
        let listed = listed
            .pop()
            .ok_or_else(|| ReaderError::Decode("Empty registry response".to_string()))?;
        if let Some(error) = listed.error {
            return Err(error);
        }
        let listed = listed
            .value()
            .and_then(|v| v.as_address_array())
            .ok_or_else(|| ReaderError::Decode("Registry did not return an address list".to_string()))?;

        // A jar registered twice is listed once, at its first position.
        let mut seen = HashSet::with_capacity(listed.len());
        let addresses: Vec<Address> = listed.iter().copied().filter(|jar| seen.insert(*jar)).collect();
        if addresses.len() < listed.len() {
            warn!(
                "Chain {} registry lists {} duplicate jar(s)",
                chain_id,
                listed.len() - addresses.len()
            );
        }

        debug!("Chain {} registry lists {} jar(s)", chain_id, addresses.len());
        if addresses.is_empty() {
            return Ok(ChainJars {
                jars: Vec::new(),
                unreadable: Vec::new(),
            });
        }

        let specs = addresses
            .iter()
            .flat_map(|jar| jar_calls(chain_id, registry, *jar))
            .collect();
        let results = self.reader.read_batch(chain_id, specs).await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        let ratio = failed as f64 / results.len() as f64;
        if ratio > self.config.max_failure_ratio {
            return Err(ReaderError::Transport(format!(
                "{failed} of {} jar reads failed on chain {chain_id}",
                results.len()
            )));
        }

        let mut chain_jars = ChainJars {
            jars: Vec::with_capacity(addresses.len()),
            unreadable: Vec::new(),
        };
        for (address, block) in addresses.iter().zip(results.chunks(CALLS_PER_JAR)) {
            match assemble_jar(chain_id, *address, block) {
                // Same rule as `get_jar`: no owner means no jar at this address.
                Some(record) if record.owner.is_zero() => {
                    debug!("Skipping {}: owner is the zero address", jar_key(chain_id, address));
                }
                Some(record) => chain_jars.jars.push(record),
                None => {
                    warn!("Jar {} is unreadable", jar_key(chain_id, address));
                    chain_jars.unreadable.push(jar_key(chain_id, address));
                }
            }
        }
        Ok(chain_jars)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{builtin_chains, ChainRegistry};
    use crate::rpc::{AbiValue, InMemoryTransport};
    use ethers::types::U256;
    use std::sync::Arc;

    const REGISTRY: u64 = 0xfeed;

    fn registry_chains() -> Arc<ChainRegistry> {
        let chains = builtin_chains()
            .into_iter()
            .map(|chain| chain.with_jar_registry(Address::from_low_u64_be(REGISTRY)))
            .collect();
        Arc::new(ChainRegistry::new(chains))
    }

    fn aggregator(transport: Arc<InMemoryTransport>) -> JarAggregator {
        let reader = ContractReader::new(registry_chains(), transport, 100);
        JarAggregator::new(reader, AggregatorConfig::default())
    }

    fn script_jar(transport: &InMemoryTransport, chain_id: u64, jar: Address, owner: Address, blacklisted: bool) {
        let registry = Address::from_low_u64_be(REGISTRY);
        transport
            .respond(chain_id, jar, "owner()", &[], AbiValue::Address(owner))
            .respond(chain_id, jar, "currency()", &[], AbiValue::Address(Address::zero()))
            .respond(chain_id, jar, "currencyHeldByJar()", &[], AbiValue::Uint(U256::from(1_000u64)))
            .respond(chain_id, jar, "accessType()", &[], AbiValue::Uint(U256::zero()))
            .respond(chain_id, jar, "withdrawalOption()", &[], AbiValue::Uint(U256::zero()))
            .respond(chain_id, jar, "fixedAmount()", &[], AbiValue::Uint(U256::from(10u64)))
            .respond(chain_id, jar, "maxWithdrawal()", &[], AbiValue::Uint(U256::zero()))
            .respond(chain_id, jar, "withdrawalInterval()", &[], AbiValue::Uint(U256::from(3_600u64)))
            .respond(chain_id, jar, "strictPurpose()", &[], AbiValue::Bool(false))
            .respond(chain_id, jar, "emergencyWithdrawalEnabled()", &[], AbiValue::Bool(true))
            .respond(chain_id, jar, "oneTimeWithdrawal()", &[], AbiValue::Bool(false))
            .respond(chain_id, jar, "getAllowlist()", &[], AbiValue::AddressArray(vec![]))
            .respond(
                chain_id,
                registry,
                REGISTRY_BLACKLISTED,
                &[AbiValue::Address(jar)],
                AbiValue::Bool(blacklisted),
            );
    }

    fn script_registry(transport: &InMemoryTransport, chain_id: u64, jars: &[Address]) {
        transport.respond(
            chain_id,
            Address::from_low_u64_be(REGISTRY),
            REGISTRY_ENUMERATE,
            &[],
            AbiValue::AddressArray(jars.to_vec()),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_chain_is_reported_as_failed() {
        let transport = Arc::new(InMemoryTransport::new());
        let owner = Address::from_low_u64_be(0xaa);
        let jars: Vec<Address> = (1..=3).map(|i| Address::from_low_u64_be(0x100 + i)).collect();
        script_registry(&transport, 1, &jars);
        for jar in &jars {
            script_jar(&transport, 1, *jar, owner, false);
        }
        script_registry(&transport, 8453, &[]);
        transport.delay_chain(8453, Duration::from_secs(60));

        let listing = aggregator(transport)
            .list_jars(&BTreeSet::from([1, 8453]), &JarFilter::default())
            .await;

        assert_eq!(listing.jars.len(), 3);
        assert!(listing.jars.iter().all(|jar| jar.chain_id == 1));
        assert_eq!(listing.jars.iter().map(|j| j.address).collect::<Vec<_>>(), jars);
        assert!(listing.partial);
        assert_eq!(listing.failed_chains, BTreeSet::from([8453]));
    }

    #[tokio::test]
    async fn test_registry_order_and_filters() {
        let transport = Arc::new(InMemoryTransport::new());
        let alice = Address::from_low_u64_be(0xa1);
        let bob = Address::from_low_u64_be(0xb0);
        let base_jar = Address::from_low_u64_be(0x201);
        let eth_jar = Address::from_low_u64_be(0x101);
        let hidden = Address::from_low_u64_be(0x102);

        script_registry(&transport, 8453, &[base_jar]);
        script_jar(&transport, 8453, base_jar, alice, false);
        script_registry(&transport, 1, &[eth_jar, hidden]);
        script_jar(&transport, 1, eth_jar, bob, false);
        script_jar(&transport, 1, hidden, alice, true);

        let aggregator = aggregator(transport);
        let chains = BTreeSet::from([8453, 1]);

        let all = aggregator.list_jars(&chains, &JarFilter::default()).await;
        assert!(!all.partial);
        assert_eq!(all.jars.iter().map(|j| j.address).collect::<Vec<_>>(), vec![eth_jar, base_jar]);

        let with_hidden = JarFilter {
            owner: Some(alice),
            include_blacklisted: true,
        };
        let alices = aggregator.list_jars(&chains, &with_hidden).await;
        assert_eq!(alices.jars.iter().map(|j| j.address).collect::<Vec<_>>(), vec![hidden, base_jar]);
    }

    #[tokio::test]
    async fn test_missing_registry_and_unknown_chain_fail() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(ChainRegistry::new(builtin_chains()));
        let aggregator = JarAggregator::new(
            ContractReader::new(registry, transport.clone(), 100),
            AggregatorConfig::default(),
        );

        let listing = aggregator
            .list_jars(&BTreeSet::from([1, 424242]), &JarFilter::default())
            .await;
        assert_eq!(listing.failed_chains, BTreeSet::from([1, 424242]));
        assert!(listing.jars.is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_ratio_marks_chain_failed() {
        let transport = Arc::new(InMemoryTransport::new());
        // Enumerated jars without any scripted getters decode as failures.
        let jars: Vec<Address> = (1..=2).map(|i| Address::from_low_u64_be(0x300 + i)).collect();
        script_registry(&transport, 10, &jars);

        let listing = aggregator(transport)
            .list_jars(&BTreeSet::from([10]), &JarFilter::default())
            .await;
        assert_eq!(listing.failed_chains, BTreeSet::from([10]));
    }

    #[tokio::test]
    async fn test_unreadable_jar_is_reported_but_chain_survives() {
        let transport = Arc::new(InMemoryTransport::new());
        let owner = Address::from_low_u64_be(0xaa);
        let good: Vec<Address> = (1..=3).map(|i| Address::from_low_u64_be(0x400 + i)).collect();
        let broken = Address::from_low_u64_be(0x4ff);
        let mut listed = good.clone();
        listed.push(broken);
        script_registry(&transport, 1, &listed);
        for jar in &good {
            script_jar(&transport, 1, *jar, owner, false);
        }
        script_jar(&transport, 1, broken, owner, false);
        transport.revert(1, broken, "owner()", &[]);

        let listing = aggregator(transport)
            .list_jars(&BTreeSet::from([1]), &JarFilter::default())
            .await;
        assert!(!listing.partial);
        assert_eq!(listing.jars.len(), 3);
        assert_eq!(listing.unreadable_jars, vec![jar_key(1, &broken)]);
    }

    #[tokio::test]
    async fn test_duplicate_registry_entries_listed_once() {
        let transport = Arc::new(InMemoryTransport::new());
        let owner = Address::from_low_u64_be(0xaa);
        let first = Address::from_low_u64_be(0x601);
        let second = Address::from_low_u64_be(0x602);
        script_registry(&transport, 1, &[first, second, first, second, first]);
        script_jar(&transport, 1, first, owner, false);
        script_jar(&transport, 1, second, owner, false);

        let listing = aggregator(transport.clone())
            .list_jars(&BTreeSet::from([1]), &JarFilter::default())
            .await;
        assert_eq!(listing.jars.iter().map(|j| j.address).collect::<Vec<_>>(), vec![first, second]);
        assert!(listing.unreadable_jars.is_empty());
        // One enumeration call plus one block of getters per distinct jar
        assert_eq!(transport.call_count(), 1 + 2 * CALLS_PER_JAR);
    }

    #[tokio::test]
    async fn test_zero_owner_is_not_listed() {
        let transport = Arc::new(InMemoryTransport::new());
        let owner = Address::from_low_u64_be(0xaa);
        let live = Address::from_low_u64_be(0x701);
        let empty = Address::from_low_u64_be(0x702);
        script_registry(&transport, 1, &[live, empty]);
        script_jar(&transport, 1, live, owner, false);
        script_jar(&transport, 1, empty, Address::zero(), false);

        let aggregator = aggregator(transport);
        let listing = aggregator
            .list_jars(&BTreeSet::from([1]), &JarFilter::default())
            .await;
        assert!(!listing.partial);
        assert_eq!(listing.jars.iter().map(|j| j.address).collect::<Vec<_>>(), vec![live]);
        assert!(listing.unreadable_jars.is_empty());
        assert!(matches!(aggregator.get_jar(1, empty).await, Err(ReaderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_jar() {
        let transport = Arc::new(InMemoryTransport::new());
        let owner = Address::from_low_u64_be(0xaa);
        let jar = Address::from_low_u64_be(0x501);
        script_jar(&transport, 1, jar, owner, false);
        let aggregator = aggregator(transport.clone());

        let record = aggregator.get_jar(1, jar).await.unwrap();
        assert_eq!(record.owner, owner);
        assert_eq!(record.withdrawal_rules.withdrawal_interval, U256::from(3_600u64));

        let missing = aggregator.get_jar(1, Address::from_low_u64_be(0x999)).await;
        assert!(matches!(missing, Err(ReaderError::NotFound(_))));

        transport.fail_chain(1, ReaderError::Transport("down".to_string()));
        assert!(matches!(aggregator.get_jar(1, jar).await, Err(ReaderError::Transport(_))));
    }

    #[test]
    fn test_filter_cache_key() {
        assert_eq!(JarFilter::default().cache_key(), "owner=any;blacklisted=false");
        let owner = Address::from_low_u64_be(0xab);
        assert_eq!(
            JarFilter::by_owner(owner).cache_key(),
            format!("owner={};blacklisted=false", format_address(&owner))
        );
    }
}
