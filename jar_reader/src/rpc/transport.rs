//! JSON-RPC transport
//!
//! A transport executes one batch of `eth_call`s against one chain. The outer
//! `Result` reports a failure of the whole request (unreachable endpoint, HTTP
//! error, unparseable body); the inner per-call results report reverts and
//! malformed return data.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::chains::ChainDescriptor;
use crate::common::{format_address, Address, ReaderError, Result};

/// One `eth_call` request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EthCall {
    pub to: Address,
    pub data: Vec<u8>,
}

/// Raw return data of one call, or why it failed
pub type CallOutcome = Result<Vec<u8>>;

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Execute `calls` as a single batch. On success the returned vector has
    /// exactly one outcome per call, in call order.
    async fn batch_call(&self, chain: &ChainDescriptor, calls: &[EthCall]) -> Result<Vec<CallOutcome>>;
}

/// HTTP JSON-RPC transport with endpoint fallback
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ReaderError::Misconfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn post_batch(&self, url: &str, body: &Value, expected: usize) -> Result<Vec<CallOutcome>> {
        let response = self.client.post(url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReaderError::Transport(format!("{url} answered HTTP {status}")));
        }

        let payload: Value = response.json().await?;
        parse_batch_response(payload, expected)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn batch_call(&self, chain: &ChainDescriptor, calls: &[EthCall]) -> Result<Vec<CallOutcome>> {
        if chain.rpc_urls.is_empty() {
            return Err(ReaderError::Misconfigured(format!(
                "No RPC URL configured for chain {}",
                chain.chain_id
            )));
        }
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let body = build_batch_request(calls);
        let mut last_error = None;

        for url in &chain.rpc_urls {
            debug!("Sending {} eth_call(s) to chain {} via {}", calls.len(), chain.chain_id, url);
            match self.post_batch(url, &body, calls.len()).await {
                Ok(outcomes) => return Ok(outcomes),
                Err(e) if e.is_transport() => {
                    warn!("RPC endpoint {} for chain {} failed: {}", url, chain.chain_id, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ReaderError::Transport("no endpoint attempted".to_string())))
    }
}

/// JSON-RPC 2.0 batch body; each request id is its position in `calls`
pub fn build_batch_request(calls: &[EthCall]) -> Value {
    Value::Array(
        calls
            .iter()
            .enumerate()
            .map(|(id, call)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": "eth_call",
                    "params": [{
                        "to": format_address(&call.to),
                        "data": format!("0x{}", hex::encode(&call.data)),
                    }, "latest"],
                })
            })
            .collect(),
    )
}

/// Match a batch response back to request positions by id
pub fn parse_batch_response(payload: Value, expected: usize) -> Result<Vec<CallOutcome>> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(ref obj) if obj.contains_key("error") => {
            // Providers answer a rejected batch (too large, rate limited) with one error object.
            return Err(ReaderError::Transport(format!("Batch rejected: {}", obj["error"])));
        }
        other => {
            return Err(ReaderError::Decode(format!("Expected a batch response array, got {other}")));
        }
    };

    let mut outcomes: Vec<CallOutcome> = (0..expected)
        .map(|id| Err(ReaderError::Decode(format!("No response for request id {id}"))))
        .collect();

    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_u64).map(|id| id as usize) else {
            debug!("Dropping batch response item without numeric id: {}", item);
            continue;
        };
        if id >= expected {
            debug!("Dropping batch response item with unknown id {}", id);
            continue;
        }
        outcomes[id] = parse_call_item(&item);
    }

    Ok(outcomes)
}

fn parse_call_item(item: &Value) -> CallOutcome {
    if let Some(error) = item.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("execution reverted");
        return Err(ReaderError::Reverted(message.to_string()));
    }

    let result = item
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| ReaderError::Decode("Response has neither result nor error".to_string()))?;

    let hex_part = result.strip_prefix("0x").unwrap_or(result);
    hex::decode(hex_part).map_err(|e| ReaderError::Decode(format!("Invalid hex in result: {e}")))
}
