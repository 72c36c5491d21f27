mod address;
mod error;

pub use address::{format_address, normalize_address, parse_address, Address};
pub use error::{ReaderError as Error, ReaderError, Result};
