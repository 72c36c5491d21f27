use crate::common::{ReaderError, Result};

pub use ethers::types::H160 as Address;

/// Parse a 0x-prefixed, 20-byte hex address (any letter case)
pub fn parse_address(input: &str) -> Result<Address> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| ReaderError::Decode(format!("Address must start with 0x: {trimmed}")))?;

    let bytes = hex::decode(hex_part)
        .map_err(|e| ReaderError::Decode(format!("Invalid address {trimmed}: {e}")))?;

    if bytes.len() != 20 {
        return Err(ReaderError::Decode(format!(
            "Address must be 20 bytes, got {}",
            bytes.len()
        )));
    }

    Ok(Address::from_slice(&bytes))
}

/// Full lower-case 0x form, the canonical key format used by caches
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Case-insensitive comparison form of an address string
pub fn normalize_address(input: &str) -> String {
    input.trim().to_lowercase()
}
