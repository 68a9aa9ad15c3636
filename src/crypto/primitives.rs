use crate::error::{NodeError, Result};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Expected length of an address in bytes
pub const ADDRESS_LENGTH: usize = 20;
/// Expected length of a hash in bytes
pub const HASH_LENGTH: usize = 32;

/// Keccak-256 of the empty byte string
pub const KECCAK_EMPTY: Hash = Hash([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
]);

/// Computes the Keccak-256 hash of the input data
pub fn keccak256(data: impl AsRef<[u8]>) -> Hash {
    let digest: [u8; HASH_LENGTH] = Keccak256::digest(data).into();
    Hash(digest)
}

/// 20-byte account address
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Address([u8; ADDRESS_LENGTH]);

/// 32-byte Keccak-256 digest
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Hash([u8; HASH_LENGTH]);

impl Address {
    pub fn zero() -> Address {
        Address::default()
    }

    /// Builds an address from a byte slice, keeping the rightmost 20 bytes
    /// when the slice is longer and left-padding with zeros when shorter
    pub fn from_slice(bytes: &[u8]) -> Address {
        let mut addr = [0u8; ADDRESS_LENGTH];
        let bytes = if bytes.len() > ADDRESS_LENGTH {
            &bytes[bytes.len() - ADDRESS_LENGTH..]
        } else {
            bytes
        };
        addr[ADDRESS_LENGTH - bytes.len()..].copy_from_slice(bytes);
        Address(addr)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Hex form with `0x` prefix and EIP-55 mixed-case checksum
    pub fn to_checksum_hex(&self) -> String {
        let hex = HEXLOWER.encode(&self.0);
        let digest = keccak256(hex.as_bytes());
        let mut out = String::with_capacity(2 + hex.len());
        out.push_str("0x");
        for (i, c) in hex.chars().enumerate() {
            let hash_byte = digest.0[i / 2];
            let nibble = if i % 2 == 0 {
                hash_byte >> 4
            } else {
                hash_byte & 0x0f
            };
            if c.is_ascii_alphabetic() && nibble > 7 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Parses an address from hex, with or without the `0x` prefix
    pub fn from_hex(s: &str) -> Result<Address> {
        let bytes = hex_to_bytes(s)?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(NodeError::Crypto(format!(
                "invalid address length: expected {ADDRESS_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Address::from_slice(&bytes))
    }
}

impl Hash {
    pub fn zero() -> Hash {
        Hash::default()
    }

    /// Builds a hash from a byte slice, tail-aligned like `Address::from_slice`
    pub fn from_slice(bytes: &[u8]) -> Hash {
        let mut hash = [0u8; HASH_LENGTH];
        let bytes = if bytes.len() > HASH_LENGTH {
            &bytes[bytes.len() - HASH_LENGTH..]
        } else {
            bytes
        };
        hash[HASH_LENGTH - bytes.len()..].copy_from_slice(bytes);
        Hash(hash)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_fixed_bytes(&self) -> [u8; HASH_LENGTH] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }

    /// Lowercase hex form with `0x` prefix
    pub fn to_hex(&self) -> String {
        format!("0x{}", HEXLOWER.encode(&self.0))
    }

    /// Parses a hash from hex, with or without the `0x` prefix
    pub fn from_hex(s: &str) -> Result<Hash> {
        let bytes = hex_to_bytes(s)?;
        if bytes.len() != HASH_LENGTH {
            return Err(NodeError::Crypto(format!(
                "invalid hash length: expected {HASH_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Hash::from_slice(&bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Address(bytes)
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Hash(bytes)
    }
}

/// Derives the account address from an uncompressed secp256k1 public key:
/// the rightmost 20 bytes of the Keccak-256 of the key without its 0x04 tag
pub fn pubkey_to_address(pubkey: &[u8]) -> Address {
    let key = if pubkey.len() == 65 { &pubkey[1..] } else { pubkey };
    let digest = keccak256(key);
    Address::from_slice(&digest.as_bytes()[12..])
}

/// True when the string is a well-formed hex address (checksum not enforced)
pub fn is_hex_address(s: &str) -> bool {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    s.len() == 2 * ADDRESS_LENGTH && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn hex_to_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let padded;
    let normalized = if s.len() % 2 == 1 {
        padded = format!("0{s}");
        padded.as_str()
    } else {
        s
    };
    let lowered = normalized.to_ascii_lowercase();
    HEXLOWER
        .decode(lowered.as_bytes())
        .map_err(|e| NodeError::Crypto(format!("invalid hex string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_empty_matches_constant() {
        assert_eq!(keccak256([]), KECCAK_EMPTY);
    }

    #[test]
    fn address_hex_round_trip() {
        let addr = Address::from_slice(&[0xab; ADDRESS_LENGTH]);
        let parsed = Address::from_hex(&addr.to_checksum_hex()).unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn eip55_checksum_vectors() {
        // Reference vectors from the EIP-55 specification
        let vectors = [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ];
        for expected in vectors {
            let addr = Address::from_hex(expected).unwrap();
            assert_eq!(addr.to_checksum_hex(), *expected);
        }
    }

    #[test]
    fn checksum_form_is_stable() {
        let addr = Address::from_hex("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        let first = addr.to_checksum_hex();
        let second = Address::from_hex(&first).unwrap().to_checksum_hex();
        assert_eq!(first, second);
    }

    #[test]
    fn hash_hex_round_trip() {
        let hash = keccak256(b"ember");
        let parsed = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn tail_alignment_matches_reference_behavior() {
        // Longer inputs keep the rightmost bytes, shorter inputs left-pad
        let long = Address::from_slice(&[1u8; 25]);
        assert_eq!(long.as_bytes(), &[1u8; 20]);

        let short = Address::from_slice(&[0xff]);
        let mut expected = [0u8; 20];
        expected[19] = 0xff;
        assert_eq!(short.as_bytes(), &expected);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(Address::from_hex("0xzz").is_err());
        assert!(Hash::from_hex("0x1234").is_err());
        assert!(!is_hex_address("0x1234"));
        assert!(is_hex_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"));
    }
}
