//! Utility helpers shared across the node

pub mod serialization;

pub use serialization::{deserialize, serialize};

use crate::error::{NodeError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds, as carried in block headers
pub fn unix_timestamp() -> Result<u64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| NodeError::Io(format!("System time error: {e}")))?;
    Ok(duration.as_secs())
}

/// Big-endian bytes of an unsigned integer with leading zeros stripped.
///
/// Zero encodes as the empty slice, matching the minimal-length rule of
/// the header preimage.
pub fn be_bytes_trimmed(value: &num_bigint::BigUint) -> Vec<u8> {
    if value == &num_bigint::BigUint::default() {
        return Vec::new();
    }
    value.to_bytes_be()
}

/// Minimal-length big-endian bytes of a u64; zero encodes as empty
pub fn u64_be_trimmed(value: u64) -> Vec<u8> {
    let be = value.to_be_bytes();
    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len());
    be[first..].to_vec()
}
