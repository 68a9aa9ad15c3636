//! Cryptographic primitives for the account model
//!
//! 20-byte addresses, 32-byte Keccak-256 hashes, hex codecs with EIP-55
//! checksums, secp256k1 signatures with public-key recovery, and wallet
//! key management.

pub mod keys;
pub mod primitives;
pub mod signature;

pub use keys::Wallet;
pub use primitives::{
    is_hex_address, keccak256, pubkey_to_address, Address, Hash, ADDRESS_LENGTH, HASH_LENGTH,
    KECCAK_EMPTY,
};
pub use signature::{
    recover_address, recover_pubkey, sign_hash, validate_signature_values, verify,
    SIGNATURE_LENGTH,
};
