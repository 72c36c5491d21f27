//! End-to-end tests of the read model against a scripted transport

use ethers::types::U256;
use jar_reader::aggregator::{REGISTRY_BLACKLISTED, REGISTRY_ENUMERATE};
use jar_reader::common::format_address;
use jar_reader::config::{ChainConfig, ReaderConfig};
use jar_reader::rpc::{AbiValue, InMemoryTransport};
use jar_reader::{Address, ChainRegistry, JarFilter, JarReadModel, ReaderError, Role};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const REGISTRY: &str = "0x00000000000000000000000000000000000f00d5";

fn registry_address() -> Address {
    Address::from_low_u64_be(0xf00d5)
}

fn config(chains: &[u64], admins: Option<&str>) -> ReaderConfig {
    ReaderConfig {
        admin_addresses: admins.map(str::to_string),
        enabled_chains: chains.to_vec(),
        chains: chains
            .iter()
            .map(|chain_id| ChainConfig {
                chain_id: *chain_id,
                jar_registry: Some(REGISTRY.to_string()),
                ..ChainConfig::default()
            })
            .collect(),
        ..ReaderConfig::default()
    }
}

fn read_model(config: &ReaderConfig, transport: Arc<InMemoryTransport>) -> JarReadModel {
    let registry = ChainRegistry::from_config(config).unwrap();
    JarReadModel::new(config, registry, transport)
}

fn script_registry(transport: &InMemoryTransport, chain_id: u64, jars: &[Address]) {
    transport.respond(
        chain_id,
        registry_address(),
        REGISTRY_ENUMERATE,
        &[],
        AbiValue::AddressArray(jars.to_vec()),
    );
}

fn script_jar(transport: &InMemoryTransport, chain_id: u64, jar: Address, owner: Address, allowlist: Vec<Address>) {
    // Native currency placeholder: resolved without RPC
    let currency = Address::zero();
    transport
        .respond(chain_id, jar, "owner()", &[], AbiValue::Address(owner))
        .respond(chain_id, jar, "currency()", &[], AbiValue::Address(currency))
        .respond(chain_id, jar, "currencyHeldByJar()", &[], AbiValue::Uint(U256::exp10(18)))
        .respond(chain_id, jar, "accessType()", &[], AbiValue::Uint(U256::zero()))
        .respond(chain_id, jar, "withdrawalOption()", &[], AbiValue::Uint(U256::zero()))
        .respond(chain_id, jar, "fixedAmount()", &[], AbiValue::Uint(U256::exp10(16)))
        .respond(chain_id, jar, "maxWithdrawal()", &[], AbiValue::Uint(U256::zero()))
        .respond(chain_id, jar, "withdrawalInterval()", &[], AbiValue::Uint(U256::from(86_400u64)))
        .respond(chain_id, jar, "strictPurpose()", &[], AbiValue::Bool(true))
        .respond(chain_id, jar, "emergencyWithdrawalEnabled()", &[], AbiValue::Bool(false))
        .respond(chain_id, jar, "oneTimeWithdrawal()", &[], AbiValue::Bool(false))
        .respond(chain_id, jar, "getAllowlist()", &[], AbiValue::AddressArray(allowlist))
        .respond(
            chain_id,
            registry_address(),
            REGISTRY_BLACKLISTED,
            &[AbiValue::Address(jar)],
            AbiValue::Bool(false),
        );
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_chain_yields_partial_listing() {
    let transport = Arc::new(InMemoryTransport::new());
    let owner = Address::from_low_u64_be(0xa11ce);
    let jars: Vec<Address> = (1..=3).map(|i| Address::from_low_u64_be(0x1000 + i)).collect();

    script_registry(&transport, 1, &jars);
    for jar in &jars {
        script_jar(&transport, 1, *jar, owner, vec![]);
    }
    script_registry(&transport, 8453, &[]);
    transport.delay_chain(8453, Duration::from_secs(120));

    let model = read_model(&config(&[8453, 1], Some("0x1")), transport);
    let page = model.all_jars(&JarFilter::default()).await.unwrap();

    assert_eq!(page.jars.len(), 3);
    assert!(page.jars.iter().all(|view| view.jar.chain_id == 1));
    assert!(page.jars.iter().all(|view| view.currency_symbol == "ETH"));
    assert!(page.partial);
    assert_eq!(page.failed_chains, BTreeSet::from([8453]));
}

#[tokio::test(start_paused = true)]
async fn test_listing_cache_expires_after_ttl() {
    let transport = Arc::new(InMemoryTransport::new());
    let jar = Address::from_low_u64_be(0x2001);
    script_registry(&transport, 100, &[jar]);
    script_jar(&transport, 100, jar, Address::from_low_u64_be(0xb0b), vec![]);

    let model = read_model(&config(&[100], Some("0x1")), transport.clone());

    let page = model.all_jars(&JarFilter::default()).await.unwrap();
    assert_eq!(page.jars[0].currency_symbol, "XDAI");
    let requests = transport.request_count(100);

    tokio::time::advance(Duration::from_secs(30)).await;
    model.all_jars(&JarFilter::default()).await.unwrap();
    assert_eq!(transport.request_count(100), requests);

    tokio::time::advance(Duration::from_secs(1)).await;
    model.all_jars(&JarFilter::default()).await.unwrap();
    assert!(transport.request_count(100) > requests);
}

#[tokio::test]
async fn test_concurrent_listings_share_one_enumeration() {
    let transport = Arc::new(InMemoryTransport::new());
    let jar = Address::from_low_u64_be(0x3001);
    script_registry(&transport, 10, &[jar]);
    script_jar(&transport, 10, jar, Address::from_low_u64_be(0xb0b), vec![]);

    let model = read_model(&config(&[10], Some("0x1")), transport.clone());
    let filter_a = JarFilter::default();
    let filter_b = JarFilter::default();
    let (a, b) = tokio::join!(model.all_jars(&filter_a), model.all_jars(&filter_b));

    assert_eq!(a.unwrap(), b.unwrap());
    // One enumeration request plus one per-jar batch
    assert_eq!(transport.request_count(10), 2);
}

#[tokio::test]
async fn test_whoami_roles_and_misconfigured_admins() {
    let transport = Arc::new(InMemoryTransport::new());
    let user = Address::from_low_u64_be(0xbeef);
    let owner = Address::from_low_u64_be(0xcafe);
    let owned = Address::from_low_u64_be(0x4001);
    let shared = Address::from_low_u64_be(0x4002);
    script_registry(&transport, 42220, &[owned, shared]);
    script_jar(&transport, 42220, owned, user, vec![]);
    script_jar(&transport, 42220, shared, owner, vec![user]);

    let model = read_model(&config(&[42220], None), transport);
    let view = model.authorization(&format_address(&user)).await.unwrap();

    assert!(!view.is_global_admin);
    assert!(matches!(view.config_issue, Some(ReaderError::Misconfigured(_))));
    assert_eq!(view.per_jar_role.get(&format!("42220:{}", format_address(&owned))), Some(&Role::Owner));
    assert_eq!(
        view.per_jar_role.get(&format!("42220:{}", format_address(&shared))),
        Some(&Role::Allowlisted)
    );
}

#[tokio::test]
async fn test_invalidated_jar_is_reread() {
    let transport = Arc::new(InMemoryTransport::new());
    let jar = Address::from_low_u64_be(0x5001);
    script_jar(&transport, 1, jar, Address::from_low_u64_be(0xaaaa), vec![]);

    let model = read_model(&config(&[1], Some("0x1")), transport.clone());
    let first = model.jar(1, &format_address(&jar)).await.unwrap();
    assert_eq!(first.jar.owner, Address::from_low_u64_be(0xaaaa));

    transport.respond(1, jar, "owner()", &[], AbiValue::Address(Address::from_low_u64_be(0xbbbb)));
    let cached = model.jar(1, &format_address(&jar)).await.unwrap();
    assert_eq!(cached.jar.owner, Address::from_low_u64_be(0xaaaa));

    model.invalidate_jar(1, &jar);
    let fresh = model.jar(1, &format_address(&jar)).await.unwrap();
    assert_eq!(fresh.jar.owner, Address::from_low_u64_be(0xbbbb));
}

#[tokio::test]
async fn test_chain_without_jar_registry_is_failed() {
    let transport = Arc::new(InMemoryTransport::new());
    let config = ReaderConfig {
        admin_addresses: Some("0x1".to_string()),
        enabled_chains: vec![1, 8453],
        ..ReaderConfig::default()
    };
    let model = read_model(&config, transport.clone());

    let page = model.all_jars(&JarFilter::default()).await.unwrap();
    assert!(page.jars.is_empty());
    assert!(page.partial);
    assert_eq!(page.failed_chains, BTreeSet::from([1, 8453]));
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn test_unknown_enabled_chain_is_rejected() {
    let mut config = config(&[1], None);
    config.enabled_chains.push(999_999);
    assert!(matches!(
        ChainRegistry::from_config(&config),
        Err(ReaderError::Misconfigured(_))
    ));
}
