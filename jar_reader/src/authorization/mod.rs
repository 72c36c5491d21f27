//! Role evaluation for a connected address

use log::warn;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::aggregator::{jar_key, JarRecord};
use crate::common::{normalize_address, parse_address, ReaderError};

/// Role an address holds on one jar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Owner,
    Allowlisted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationView {
    /// Normalized (trimmed, lower-cased) address
    pub address: String,
    pub is_global_admin: bool,
    /// Keyed by `<chain_id>:<jar address>`
    pub per_jar_role: BTreeMap<String, Role>,
    /// Set when the admin list is missing, so admin status could not be granted
    pub config_issue: Option<ReaderError>,
}

/// Parsed `admin_addresses` setting
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    entries: HashSet<String>,
}

impl AdminList {
    /// Parse a comma-separated list; entries are trimmed and lower-cased
    pub fn parse(raw: Option<&str>) -> Self {
        let entries = raw
            .unwrap_or_default()
            .split(',')
            .map(normalize_address)
            .filter(|entry| !entry.is_empty())
            .collect();
        Self { entries }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains(&normalize_address(address))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct AuthorizationEvaluator {
    admins: AdminList,
    warned: AtomicBool,
}

impl AuthorizationEvaluator {
    pub fn new(admins: AdminList) -> Self {
        Self {
            admins,
            warned: AtomicBool::new(false),
        }
    }

    pub fn from_setting(raw: Option<&str>) -> Self {
        Self::new(AdminList::parse(raw))
    }

    /// Derive `address`'s roles over `jars`.
    ///
    /// With no admin list configured nobody is a global admin and the view
    /// carries a `Misconfigured` issue.
    pub fn evaluate(&self, address: &str, jars: &[JarRecord]) -> AuthorizationView {
        let normalized = normalize_address(address);

        let config_issue = if self.admins.is_empty() {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!("No admin addresses configured; global admin access is disabled");
            }
            Some(ReaderError::Misconfigured("admin_addresses is not set".to_string()))
        } else {
            None
        };
        let is_global_admin = config_issue.is_none() && self.admins.contains(&normalized);

        let mut per_jar_role = BTreeMap::new();
        // Unparseable input cannot own or be allow-listed on anything.
        if let Ok(parsed) = parse_address(&normalized) {
            for jar in jars {
                let role = if jar.owner == parsed {
                    Some(Role::Owner)
                } else if jar.withdrawal_rules.allows(&parsed) == Some(true) {
                    Some(Role::Allowlisted)
                } else {
                    None
                };
                if let Some(role) = role {
                    per_jar_role.insert(jar_key(jar.chain_id, &jar.address), role);
                }
            }
        }

        AuthorizationView {
            address: normalized,
            is_global_admin,
            per_jar_role,
            config_issue,
        }
    }
}
