//! The core engine: blocks and transactions, the canonical chain, the
//! world-state store, the execution engine, and proof of work.

pub mod block;
pub mod chain;
pub mod execution;
pub mod proof_of_work;
pub mod state;
pub mod transaction;

pub use block::{Block, BlockHeader, Genesis};
pub use chain::Blockchain;
pub use execution::{
    contract_address_for, ExecutionConfig, ExecutionEngine, ExecutionResult, BASE_TX_GAS,
    CONTRACT_CREATION_GAS,
};
pub use proof_of_work::ProofOfWork;
pub use state::{Account, StateDb};
pub use transaction::{
    validate_intrinsic, Bloom, Log, Receipt, Transaction, BLOOM_LENGTH, MAX_TX_DATA_SIZE,
    MAX_TX_GAS_LIMIT,
};
