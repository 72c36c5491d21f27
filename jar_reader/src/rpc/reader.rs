//! Batched contract reader for one chain at a time

use futures::future::join_all;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;

use super::abi::{decode, encode_call, AbiKind, AbiValue};
use super::transport::{EthCall, RpcTransport};
use crate::chains::{ChainDescriptor, ChainRegistry};
use crate::common::{Address, ReaderError};

/// One contract read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractCallSpec {
    pub chain_id: u64,
    pub address: Address,
    /// Solidity signature, e.g. `isBlacklisted(address)`
    pub method: String,
    pub args: Vec<AbiValue>,
    /// Expected return type
    pub returns: AbiKind,
}

impl ContractCallSpec {
    pub fn new(chain_id: u64, address: Address, method: &str, args: Vec<AbiValue>, returns: AbiKind) -> Self {
        Self {
            chain_id,
            address,
            method: method.to_string(),
            args,
            returns,
        }
    }

    pub fn calldata(&self) -> Vec<u8> {
        encode_call(&self.method, &self.args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallStatus {
    Success,
    Failure,
}

/// Outcome of one `ContractCallSpec`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractCallResult {
    pub spec: ContractCallSpec,
    pub status: CallStatus,
    pub value: Option<AbiValue>,
    pub error: Option<ReaderError>,
}

impl ContractCallResult {
    pub fn success(spec: ContractCallSpec, value: AbiValue) -> Self {
        Self {
            spec,
            status: CallStatus::Success,
            value: Some(value),
            error: None,
        }
    }

    pub fn failure(spec: ContractCallSpec, error: ReaderError) -> Self {
        Self {
            spec,
            status: CallStatus::Failure,
            value: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }

    pub fn value(&self) -> Option<&AbiValue> {
        self.value.as_ref()
    }
}

/// Executes batches of contract reads, splitting them to fit the provider's batch limit
#[derive(Clone)]
pub struct ContractReader {
    registry: Arc<ChainRegistry>,
    transport: Arc<dyn RpcTransport>,
    max_batch_size: usize,
}

impl ContractReader {
    pub fn new(registry: Arc<ChainRegistry>, transport: Arc<dyn RpcTransport>, max_batch_size: usize) -> Self {
        Self {
            registry,
            transport,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    /// Read every spec against `chain_id`. Never fails as a whole: the result
    /// has one entry per spec, in input order.
    pub async fn read_batch(&self, chain_id: u64, specs: Vec<ContractCallSpec>) -> Vec<ContractCallResult> {
        let Some(chain) = self.registry.get(chain_id) else {
            let error = ReaderError::Misconfigured(format!("Chain {chain_id} is not registered"));
            return specs
                .into_iter()
                .map(|spec| ContractCallResult::failure(spec, error.clone()))
                .collect();
        };

        let mut slots: Vec<Option<ContractCallResult>> = vec![None; specs.len()];
        let mut sendable = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            if spec.chain_id == chain_id {
                sendable.push((index, spec));
            } else {
                let error = ReaderError::Misconfigured(format!(
                    "Call for chain {} submitted in a batch for chain {}",
                    spec.chain_id, chain_id
                ));
                slots[index] = Some(ContractCallResult::failure(spec, error));
            }
        }

        debug!(
            "Reading {} call(s) on chain {} in chunks of {}",
            sendable.len(),
            chain_id,
            self.max_batch_size
        );

        let chunks = sendable
            .chunks(self.max_batch_size)
            .map(|chunk| self.read_chunk(chain, chunk));

        for (index, result) in join_all(chunks).await.into_iter().flatten() {
            slots[index] = Some(result);
        }

        slots.into_iter().flatten().collect()
    }

    async fn read_chunk(
        &self,
        chain: &ChainDescriptor,
        chunk: &[(usize, ContractCallSpec)],
    ) -> Vec<(usize, ContractCallResult)> {
        let calls: Vec<EthCall> = chunk
            .iter()
            .map(|(_, spec)| EthCall {
                to: spec.address,
                data: spec.calldata(),
            })
            .collect();

        let outcomes = match self.transport.batch_call(chain, &calls).await {
            Ok(outcomes) if outcomes.len() == calls.len() => outcomes,
            Ok(outcomes) => {
                let error = ReaderError::Decode(format!(
                    "Transport returned {} outcomes for {} calls",
                    outcomes.len(),
                    calls.len()
                ));
                return fail_chunk(chunk, error);
            }
            Err(error) => {
                warn!(
                    "Batch of {} call(s) on chain {} failed: {}",
                    calls.len(),
                    chain.chain_id,
                    error
                );
                return fail_chunk(chunk, error);
            }
        };

        chunk
            .iter()
            .zip(outcomes)
            .map(|((index, spec), outcome)| {
                let result = match outcome.and_then(|data| decode(spec.returns, &data)) {
                    Ok(value) => ContractCallResult::success(spec.clone(), value),
                    Err(error) => ContractCallResult::failure(spec.clone(), error),
                };
                (*index, result)
            })
            .collect()
    }
}

fn fail_chunk(chunk: &[(usize, ContractCallSpec)], error: ReaderError) -> Vec<(usize, ContractCallResult)> {
    chunk
        .iter()
        .map(|(index, spec)| (*index, ContractCallResult::failure(spec.clone(), error.clone())))
        .collect()
}
