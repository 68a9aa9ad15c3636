//! Persistence layer: the byte store abstraction, its sled-backed
//! implementation, and the transaction memory pool.

pub mod database;
pub mod memory_pool;

pub use database::{keys, Batch, Database, SledDatabase};
pub use memory_pool::{Mempool, MempoolConfig, MempoolStats};
