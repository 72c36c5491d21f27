//! ABI values exchanged with the jar contracts
//!
//! Thin layer over `ethers::abi` covering the types the contracts expose:
//! `address`, `uint*`, `bool`, `bytes32`, `string` and `address[]`. Return
//! data is always decoded as a single value.

use ethers::abi::{self, ParamType, Token};
use ethers::types::U256;
use serde::Serialize;

use crate::common::{format_address, Address, ReaderError, Result};

/// Expected return type of a contract call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbiKind {
    Address,
    Uint,
    Bool,
    Bytes32,
    String,
    AddressArray,
}

impl AbiKind {
    fn param_type(self) -> ParamType {
        match self {
            AbiKind::Address => ParamType::Address,
            AbiKind::Uint => ParamType::Uint(256),
            AbiKind::Bool => ParamType::Bool,
            AbiKind::Bytes32 => ParamType::FixedBytes(32),
            AbiKind::String => ParamType::String,
            AbiKind::AddressArray => ParamType::Array(Box::new(ParamType::Address)),
        }
    }
}

/// Decoded (or to-be-encoded) ABI value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Bytes32([u8; 32]),
    String(String),
    AddressArray(Vec<Address>),
}

impl AbiValue {
    pub fn kind(&self) -> AbiKind {
        match self {
            AbiValue::Address(_) => AbiKind::Address,
            AbiValue::Uint(_) => AbiKind::Uint,
            AbiValue::Bool(_) => AbiKind::Bool,
            AbiValue::Bytes32(_) => AbiKind::Bytes32,
            AbiValue::String(_) => AbiKind::String,
            AbiValue::AddressArray(_) => AbiKind::AddressArray,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            AbiValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            AbiValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbiValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AbiValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_address_array(&self) -> Option<&[Address]> {
        match self {
            AbiValue::AddressArray(list) => Some(list.as_slice()),
            _ => None,
        }
    }

    /// Short human form used in logs
    pub fn describe(&self) -> String {
        match self {
            AbiValue::Address(a) => format_address(a),
            AbiValue::Uint(v) => v.to_string(),
            AbiValue::Bool(b) => b.to_string(),
            AbiValue::Bytes32(b) => format!("0x{}", hex::encode(b)),
            AbiValue::String(s) => s.clone(),
            AbiValue::AddressArray(list) => format!("[{} addresses]", list.len()),
        }
    }

    fn into_token(self) -> Token {
        match self {
            AbiValue::Address(a) => Token::Address(a),
            AbiValue::Uint(v) => Token::Uint(v),
            AbiValue::Bool(b) => Token::Bool(b),
            AbiValue::Bytes32(b) => Token::FixedBytes(b.to_vec()),
            AbiValue::String(s) => Token::String(s),
            AbiValue::AddressArray(list) => Token::Array(list.into_iter().map(Token::Address).collect()),
        }
    }

    fn from_token(kind: AbiKind, token: Token) -> Result<Self> {
        let mismatch = |token: &Token| ReaderError::Decode(format!("Expected {:?}, decoded {:?}", kind, token));
        match (kind, token) {
            (AbiKind::Address, Token::Address(a)) => Ok(AbiValue::Address(a)),
            (AbiKind::Uint, Token::Uint(v)) => Ok(AbiValue::Uint(v)),
            (AbiKind::Bool, Token::Bool(b)) => Ok(AbiValue::Bool(b)),
            (AbiKind::Bytes32, Token::FixedBytes(bytes)) => bytes32(&bytes).map(AbiValue::Bytes32),
            (AbiKind::String, Token::String(s)) => Ok(AbiValue::String(s)),
            (AbiKind::AddressArray, Token::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Token::Address(a) => Ok(a),
                    other => Err(mismatch(&other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(AbiValue::AddressArray),
            (_, other) => Err(mismatch(&other)),
        }
    }
}

fn bytes32(bytes: &[u8]) -> Result<[u8; 32]> {
    <[u8; 32]>::try_from(bytes)
        .map_err(|_| ReaderError::Decode(format!("Expected 32 bytes, got {}", bytes.len())))
}

/// First four bytes of keccak-256 of a function signature, e.g. `symbol()`
pub fn selector(signature: &str) -> [u8; 4] {
    ethers::utils::id(signature)
}

/// Calldata for `signature` applied to `args`
pub fn encode_call(signature: &str, args: &[AbiValue]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(encode(args));
    data
}

/// Standard ABI encoding of a value tuple
pub fn encode(values: &[AbiValue]) -> Vec<u8> {
    let tokens: Vec<Token> = values.iter().cloned().map(AbiValue::into_token).collect();
    abi::encode(&tokens)
}

/// Decode a single return value of `kind`
pub fn decode(kind: AbiKind, data: &[u8]) -> Result<AbiValue> {
    if data.is_empty() {
        return Err(ReaderError::Decode("Empty return data".to_string()));
    }

    // Some older tokens return `bytes32` from `symbol()`; accept that shape too.
    if kind == AbiKind::String && data.len() == 32 {
        let text: Vec<u8> = data.iter().copied().take_while(|b| *b != 0).collect();
        return String::from_utf8(text)
            .map(AbiValue::String)
            .map_err(|e| ReaderError::Decode(format!("bytes32 string is not UTF-8: {e}")));
    }

    let mut tokens = abi::decode(&[kind.param_type()], data)
        .map_err(|e| ReaderError::Decode(format!("Cannot decode {:?} return: {}", kind, e)))?;
    let token = tokens
        .pop()
        .ok_or_else(|| ReaderError::Decode(format!("No {:?} value in return data", kind)))?;
    AbiValue::from_token(kind, token)
}
