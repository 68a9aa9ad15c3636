//! # Ember Chain
//!
//! A standalone blockchain node implementing an account-model chain with
//! proof-of-work consensus: Ethereum-compatible accounts and transactions,
//! a gas-priced mempool, a persistent world state, and a block-authoring
//! loop.
//!
//! ## How the code is organized
//! - `crypto/`: addresses, Keccak-256 hashes, EIP-55 hex, secp256k1
//!   signatures with public-key recovery, wallet keys
//! - `core/`: blocks, transactions, the canonical chain, the world-state
//!   store, the execution engine, and proof of work
//! - `storage/`: the byte-store abstraction, its sled implementation, and
//!   the priority mempool
//! - `node/`: the coordinator wiring everything together, the mining
//!   loop, and the event stream consumed by external adapters
//! - `config/`, `error/`, `cli/`, `utils/`: the usual supporting cast
//!
//! ## Data flow
//! Transactions enter through `Node::submit_transaction`, wait in the
//! mempool ordered by gas price, and leave when the miner drains the top
//! of the pool into a candidate block. The miner runs the nonce search to
//! completion, the chain manager validates and appends, and the execution
//! engine replays the block deterministically before the state commits.
//! Foreign blocks delivered by a peer take the same path through
//! `Node::import_block`.

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod node;
pub mod storage;
pub mod utils;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Settings;
pub use core::{
    Account, Block, BlockHeader, Blockchain, ExecutionConfig, ExecutionEngine, ExecutionResult,
    Genesis, Log, ProofOfWork, Receipt, StateDb, Transaction,
};
pub use crypto::{keccak256, pubkey_to_address, Address, Hash, Wallet};
pub use error::{NodeError, Result};
pub use node::{Node, NodeEvent};
pub use storage::{Database, Mempool, MempoolConfig, SledDatabase};
