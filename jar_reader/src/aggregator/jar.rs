//! Jar records and the contract getters they are read from

use ethers::types::U256;
use serde::Serialize;

use crate::common::{format_address, Address};
use crate::rpc::{AbiKind, AbiValue, ContractCallResult, ContractCallSpec};

/// Registry getter enumerating every jar on a chain
pub const REGISTRY_ENUMERATE: &str = "getAllJars()";
/// Registry getter for the per-jar blacklist flag
pub const REGISTRY_BLACKLISTED: &str = "isBlacklisted(address)";

/// How a jar gates withdrawals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessType {
    Allowlist,
    NftGated,
    Other(u8),
}

impl From<u8> for AccessType {
    fn from(raw: u8) -> Self {
        match raw {
            0 => AccessType::Allowlist,
            1 => AccessType::NftGated,
            other => AccessType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WithdrawalOption {
    Fixed,
    Variable,
    Other(u8),
}

impl From<u8> for WithdrawalOption {
    fn from(raw: u8) -> Self {
        match raw {
            0 => WithdrawalOption::Fixed,
            1 => WithdrawalOption::Variable,
            other => WithdrawalOption::Other(other),
        }
    }
}

/// Withdrawal and access rules of a jar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalRules {
    pub access_type: AccessType,
    pub withdrawal_option: WithdrawalOption,
    pub fixed_amount: U256,
    pub max_withdrawal: U256,
    /// Seconds between withdrawals
    pub withdrawal_interval: U256,
    pub strict_purpose: bool,
    pub emergency_withdrawal_enabled: bool,
    pub one_time_withdrawal: bool,
    /// `None` when the allow-list could not be read
    pub allowlist: Option<Vec<Address>>,
}

impl WithdrawalRules {
    pub fn allows(&self, address: &Address) -> Option<bool> {
        self.allowlist.as_ref().map(|list| list.contains(address))
    }
}

/// Snapshot of one jar. `(chain_id, address)` is unique across the read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JarRecord {
    pub chain_id: u64,
    pub address: Address,
    pub owner: Address,
    pub currency: Address,
    pub balance: U256,
    pub withdrawal_rules: WithdrawalRules,
    pub is_blacklisted: bool,
}

impl JarRecord {
    /// `<chain_id>:<address>` with the address lower-cased
    pub fn key(&self) -> String {
        jar_key(self.chain_id, &self.address)
    }
}

pub fn jar_key(chain_id: u64, address: &Address) -> String {
    format!("{}:{}", chain_id, format_address(address))
}

/// Position of each getter in a jar's call block
#[derive(Debug, Clone, Copy)]
enum Field {
    Owner,
    Currency,
    Balance,
    AccessType,
    WithdrawalOption,
    FixedAmount,
    MaxWithdrawal,
    WithdrawalInterval,
    StrictPurpose,
    EmergencyWithdrawal,
    OneTimeWithdrawal,
    Allowlist,
    Blacklisted,
}

const FIELDS: [(Field, &str, AbiKind); 12] = [
    (Field::Owner, "owner()", AbiKind::Address),
    (Field::Currency, "currency()", AbiKind::Address),
    (Field::Balance, "currencyHeldByJar()", AbiKind::Uint),
    (Field::AccessType, "accessType()", AbiKind::Uint),
    (Field::WithdrawalOption, "withdrawalOption()", AbiKind::Uint),
    (Field::FixedAmount, "fixedAmount()", AbiKind::Uint),
    (Field::MaxWithdrawal, "maxWithdrawal()", AbiKind::Uint),
    (Field::WithdrawalInterval, "withdrawalInterval()", AbiKind::Uint),
    (Field::StrictPurpose, "strictPurpose()", AbiKind::Bool),
    (Field::EmergencyWithdrawal, "emergencyWithdrawalEnabled()", AbiKind::Bool),
    (Field::OneTimeWithdrawal, "oneTimeWithdrawal()", AbiKind::Bool),
    (Field::Allowlist, "getAllowlist()", AbiKind::AddressArray),
];

/// Number of calls issued per jar
pub const CALLS_PER_JAR: usize = FIELDS.len() + 1;

/// Calls reading one jar: its own getters followed by the registry blacklist flag
pub fn jar_calls(chain_id: u64, registry: Address, jar: Address) -> Vec<ContractCallSpec> {
    let mut specs: Vec<ContractCallSpec> = FIELDS
        .iter()
        .map(|(_, method, kind)| ContractCallSpec::new(chain_id, jar, method, vec![], *kind))
        .collect();
    specs.push(ContractCallSpec::new(
        chain_id,
        registry,
        REGISTRY_BLACKLISTED,
        vec![AbiValue::Address(jar)],
        AbiKind::Bool,
    ));
    specs
}

fn value_of(results: &[ContractCallResult], field: Field) -> Option<&AbiValue> {
    results.get(field as usize).and_then(|r| r.value())
}

fn small_uint(value: Option<&AbiValue>) -> u8 {
    value
        .and_then(AbiValue::as_uint)
        .filter(|v| v.bits() <= 8)
        .map(|v| v.low_u64() as u8)
        .unwrap_or(0)
}

/// Assemble a record from the results of `jar_calls`.
///
/// Returns `None` when owner, currency or balance could not be read. Optional
/// rule fields fall back to zero/false; an unreadable blacklist flag counts as
/// blacklisted.
pub fn assemble_jar(chain_id: u64, jar: Address, results: &[ContractCallResult]) -> Option<JarRecord> {
    if results.len() != CALLS_PER_JAR {
        return None;
    }

    let owner = value_of(results, Field::Owner)?.as_address()?;
    let currency = value_of(results, Field::Currency)?.as_address()?;
    let balance = value_of(results, Field::Balance)?.as_uint()?;

    let uint = |field| value_of(results, field).and_then(AbiValue::as_uint).unwrap_or_default();
    let flag = |field| value_of(results, field).and_then(AbiValue::as_bool).unwrap_or(false);

    let withdrawal_rules = WithdrawalRules {
        access_type: AccessType::from(small_uint(value_of(results, Field::AccessType))),
        withdrawal_option: WithdrawalOption::from(small_uint(value_of(results, Field::WithdrawalOption))),
        fixed_amount: uint(Field::FixedAmount),
        max_withdrawal: uint(Field::MaxWithdrawal),
        withdrawal_interval: uint(Field::WithdrawalInterval),
        strict_purpose: flag(Field::StrictPurpose),
        emergency_withdrawal_enabled: flag(Field::EmergencyWithdrawal),
        one_time_withdrawal: flag(Field::OneTimeWithdrawal),
        allowlist: value_of(results, Field::Allowlist)
            .and_then(AbiValue::as_address_array)
            .map(<[Address]>::to_vec),
    };

    let is_blacklisted = value_of(results, Field::Blacklisted)
        .and_then(AbiValue::as_bool)
        .unwrap_or(true);

    Some(JarRecord {
        chain_id,
        address: jar,
        owner,
        currency,
        balance,
        withdrawal_rules,
        is_blacklisted,
    })
}
