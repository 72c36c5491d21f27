//! Error kinds shared by every layer of the reader.
//!
//! Single-call failures never escape the contract reader as errors; they are
//! carried inside `ContractCallResult`. The same enum is reused there, which is
//! why it is `Clone`.

use serde::Serialize;

/// Errors produced while reading on-chain state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail")]
pub enum ReaderError {
    /// Network failure talking to an RPC endpoint
    #[error("Transport error: {0}")]
    Transport(String),

    /// A request did not complete within its deadline
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Malformed JSON-RPC or ABI payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// The call reverted or the node returned a JSON-RPC error object
    #[error("Call reverted: {0}")]
    Reverted(String),

    /// No jar exists at the requested location
    #[error("Not found: {0}")]
    NotFound(String),

    /// Required configuration is missing or invalid
    #[error("Misconfigured: {0}")]
    Misconfigured(String),
}

impl ReaderError {
    /// Transport-class errors (network, timeout) as opposed to data errors
    pub fn is_transport(&self) -> bool {
        matches!(self, ReaderError::Transport(_) | ReaderError::Timeout(_))
    }
}

impl From<reqwest::Error> for ReaderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ReaderError::Transport(format!("request timed out: {err}"))
        } else if err.is_decode() {
            ReaderError::Decode(err.to_string())
        } else {
            ReaderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ReaderError {
    fn from(err: serde_json::Error) -> Self {
        ReaderError::Decode(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ReaderError>;
