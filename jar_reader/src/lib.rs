//! Multi-chain read layer for Cookie Jar contracts
//!
//! Reads jar state from several EVM chains through batched JSON-RPC calls,
//! resolves token metadata, derives per-address roles and caches the result
//! for the dashboard.

pub mod aggregator;
pub mod authorization;
pub mod cache;
pub mod chains;
pub mod common;
pub mod config;
pub mod metadata;
pub mod read_model;
pub mod rpc;

pub use aggregator::{JarAggregator, JarFilter, JarListing, JarRecord};
pub use authorization::{AuthorizationEvaluator, AuthorizationView, Role};
pub use chains::{ChainDescriptor, ChainRegistry};
pub use common::{Address, ReaderError, Result};
pub use config::ReaderConfig;
pub use read_model::{JarPage, JarReadModel, JarView};
