//! Error handling for the node
//!
//! This module provides the error types for all node operations.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Error types for node operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Block, transaction, or account absent where a lookup expected one
    NotFound(String),
    /// Hash mismatch, broken parent link, bad number sequence, or gas-bound violation
    InvalidBlock(String),
    /// Header digest does not satisfy the difficulty target
    InvalidPow,
    /// Malformed transaction or failed admission validation
    InvalidTransaction(String),
    /// Signature components invalid, or recovered address differs from the sender
    InvalidSignature(String),
    /// Account nonce does not match the transaction nonce at execution time
    InvalidNonce { expected: u64, got: u64 },
    /// Sender balance cannot cover value plus gas cost
    InsufficientBalance { required: String, available: String },
    /// Execution consumed more gas than the transaction's gas limit
    GasLimitExceeded,
    /// Pool at capacity and the incoming transaction did not qualify
    MempoolFull,
    /// Duplicate transaction hash in the mempool
    AlreadyPresent,
    /// Underlying byte store failure
    Storage(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Configuration errors
    Config(String),
    /// Cryptographic operation errors
    Crypto(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::NotFound(what) => write!(f, "not found: {what}"),
            NodeError::InvalidBlock(msg) => write!(f, "invalid block: {msg}"),
            NodeError::InvalidPow => write!(f, "invalid proof of work"),
            NodeError::InvalidTransaction(msg) => write!(f, "invalid transaction: {msg}"),
            NodeError::InvalidSignature(msg) => write!(f, "invalid signature: {msg}"),
            NodeError::InvalidNonce { expected, got } => {
                write!(f, "invalid nonce: expected {expected}, got {got}")
            }
            NodeError::InsufficientBalance {
                required,
                available,
            } => {
                write!(
                    f,
                    "insufficient balance: required {required}, available {available}"
                )
            }
            NodeError::GasLimitExceeded => write!(f, "gas limit exceeded"),
            NodeError::MempoolFull => write!(f, "mempool is full"),
            NodeError::AlreadyPresent => write!(f, "transaction already in mempool"),
            NodeError::Storage(msg) => write!(f, "storage error: {msg}"),
            NodeError::Serialization(msg) => write!(f, "serialization error: {msg}"),
            NodeError::Io(msg) => write!(f, "I/O error: {msg}"),
            NodeError::Config(msg) => write!(f, "configuration error: {msg}"),
            NodeError::Crypto(msg) => write!(f, "cryptographic error: {msg}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

impl From<sled::Error> for NodeError {
    fn from(err: sled::Error) -> Self {
        NodeError::Storage(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for NodeError {
    fn from(err: bincode::error::EncodeError) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for NodeError {
    fn from(err: bincode::error::DecodeError) -> Self {
        NodeError::Serialization(err.to_string())
    }
}
