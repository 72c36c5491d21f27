//! Contract reads over JSON-RPC

pub mod abi;
pub mod memory;
pub mod reader;
pub mod transport;

pub use abi::{AbiKind, AbiValue};
pub use memory::InMemoryTransport;
pub use reader::{CallStatus, ContractCallResult, ContractCallSpec, ContractReader};
pub use transport::{CallOutcome, EthCall, HttpTransport, RpcTransport};
