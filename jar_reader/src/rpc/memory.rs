//! Scriptable in-memory transport
//!
//! Answers `eth_call`s from a per-chain table of canned responses. Used by the
//! test suites and handy for running the read model without a node.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::abi::{encode, encode_call, AbiValue};
use super::transport::{CallOutcome, EthCall, RpcTransport};
use crate::chains::ChainDescriptor;
use crate::common::{Address, ReaderError, Result};

#[derive(Debug, Clone)]
enum Scripted {
    Return(Vec<u8>),
    Fail(ReaderError),
}

#[derive(Debug, Default)]
struct ChainScript {
    responses: HashMap<EthCall, Scripted>,
    outage: Option<ReaderError>,
    /// Batches carrying one of these calls fail as a whole
    poisoned: HashMap<EthCall, ReaderError>,
    delay: Option<Duration>,
}

/// In-memory `RpcTransport`
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    chains: Mutex<HashMap<u64, ChainScript>>,
    batch_sizes: Mutex<Vec<(u64, usize)>>,
    call_count: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `signature(args)` on `to` with `value`
    pub fn respond(&self, chain_id: u64, to: Address, signature: &str, args: &[AbiValue], value: AbiValue) -> &Self {
        let call = EthCall { to, data: encode_call(signature, args) };
        self.chains
            .lock()
            .entry(chain_id)
            .or_default()
            .responses
            .insert(call, Scripted::Return(encode(&[value])));
        self
    }

    /// Make `signature(args)` on `to` revert
    pub fn revert(&self, chain_id: u64, to: Address, signature: &str, args: &[AbiValue]) -> &Self {
        let call = EthCall { to, data: encode_call(signature, args) };
        self.chains
            .lock()
            .entry(chain_id)
            .or_default()
            .responses
            .insert(call, Scripted::Fail(ReaderError::Reverted("execution reverted".to_string())));
        self
    }

    /// Fail every batch sent to `chain_id` with `error`
    pub fn fail_chain(&self, chain_id: u64, error: ReaderError) -> &Self {
        self.chains.lock().entry(chain_id).or_default().outage = Some(error);
        self
    }

    /// Fail any batch that includes `signature(args)` on `to`, leaving other batches alone
    pub fn fail_batches_with(
        &self,
        chain_id: u64,
        to: Address,
        signature: &str,
        args: &[AbiValue],
        error: ReaderError,
    ) -> &Self {
        let call = EthCall { to, data: encode_call(signature, args) };
        self.chains.lock().entry(chain_id).or_default().poisoned.insert(call, error);
        self
    }

    /// Delay every batch sent to `chain_id`
    pub fn delay_chain(&self, chain_id: u64, delay: Duration) -> &Self {
        self.chains.lock().entry(chain_id).or_default().delay = Some(delay);
        self
    }

    /// Total `eth_call`s received, across all batches and chains
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Sizes of the batches received for `chain_id`, in arrival order
    pub fn batch_sizes(&self, chain_id: u64) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .iter()
            .filter(|(chain, _)| *chain == chain_id)
            .map(|(_, size)| *size)
            .collect()
    }

    /// Number of batch requests received for `chain_id`
    pub fn request_count(&self, chain_id: u64) -> usize {
        self.batch_sizes(chain_id).len()
    }
}

#[async_trait]
impl RpcTransport for InMemoryTransport {
    async fn batch_call(&self, chain: &ChainDescriptor, calls: &[EthCall]) -> Result<Vec<CallOutcome>> {
        self.batch_sizes.lock().push((chain.chain_id, calls.len()));
        self.call_count.fetch_add(calls.len(), Ordering::SeqCst);

        let delay = self.chains.lock().get(&chain.chain_id).and_then(|script| script.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let chains = self.chains.lock();
        let Some(script) = chains.get(&chain.chain_id) else {
            return Err(ReaderError::Transport(format!("chain {} is not reachable", chain.chain_id)));
        };
        if let Some(error) = &script.outage {
            return Err(error.clone());
        }
        if let Some(error) = calls.iter().find_map(|call| script.poisoned.get(call)) {
            return Err(error.clone());
        }

        Ok(calls
            .iter()
            .map(|call| match script.responses.get(call) {
                Some(Scripted::Return(data)) => Ok(data.clone()),
                Some(Scripted::Fail(error)) => Err(error.clone()),
                // Calling an address without code succeeds with empty return data.
                None => Ok(Vec::new()),
            })
            .collect())
    }
}
