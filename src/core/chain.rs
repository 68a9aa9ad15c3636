// Canonical chain management: genesis bootstrap, strict block validation,
// and atomic persistence over the shared byte store.

use crate::core::proof_of_work::ProofOfWork;
use crate::core::state::StateDb;
use crate::core::transaction::validate_intrinsic;
use crate::core::{Block, Genesis};
use crate::crypto::{Address, Hash};
use crate::error::{NodeError, Result};
use crate::storage::{keys, Database};
use log::info;
use num_bigint::BigUint;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Holds the canonical chain head and the genesis block.
///
/// Only linear extension is supported: a new block must link to the
/// current head by hash and number. No reorg is ever attempted.
pub struct Blockchain {
    db: Arc<dyn Database>,
    min_gas_price: BigUint,
    current_block: RwLock<Block>,
    genesis: Block,
}

impl Blockchain {
    /// Loads the chain head from `current-block`, or builds and persists
    /// the genesis block (funding its alloc into the state store) when
    /// the byte store is empty
    pub fn new(
        db: Arc<dyn Database>,
        genesis_config: &Genesis,
        state: &StateDb,
        min_gas_price: BigUint,
    ) -> Result<Blockchain> {
        match Self::load_current_block(&db) {
            Ok(current) => {
                let genesis = Self::load_block_by_number(&db, 0)?;
                state.reset_root(*current.get_header().get_state_root());
                info!(
                    "Loaded chain head #{} {}",
                    current.get_header().get_number(),
                    current.get_hash()
                );
                Ok(Blockchain {
                    db,
                    min_gas_price,
                    current_block: RwLock::new(current),
                    genesis,
                })
            }
            Err(NodeError::NotFound(_)) => {
                let mut block = genesis_config.build_block();

                for (addr, account) in &genesis_config.alloc {
                    state.set_account(addr, account.clone());
                }
                let root = state.commit()?;
                block.header_mut().set_state_root(root);
                block.seal();

                Self::persist(&db, &block)?;
                info!("Created genesis block {}", block.get_hash());
                Ok(Blockchain {
                    db,
                    min_gas_price,
                    current_block: RwLock::new(block.clone()),
                    genesis: block,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Validates a block against the current head and the given state,
    /// then persists it in a single atomic batch and advances the head.
    ///
    /// Any failure rejects the block with no partial writes.
    pub fn add_block(&self, block: &Block, state: &StateDb) -> Result<()> {
        let mut current = self
            .current_block
            .write()
            .expect("Failed to acquire write lock on chain head - this should never happen");

        // Hash integrity: the stored hash must be the hash of the header,
        // and the header must commit to the carried transactions
        if block.compute_hash() != *block.get_hash() {
            return Err(NodeError::InvalidBlock(format!(
                "hash mismatch: stored {}, computed {}",
                block.get_hash(),
                block.compute_hash()
            )));
        }
        if Block::compute_transactions_root(block.get_transactions())
            != *block.get_header().get_transactions_root()
        {
            return Err(NodeError::InvalidBlock(
                "transactions root mismatch".to_string(),
            ));
        }

        if !ProofOfWork::validate(block) {
            return Err(NodeError::InvalidPow);
        }

        if block.get_header().get_previous_hash() != current.get_hash() {
            return Err(NodeError::InvalidBlock(format!(
                "invalid previous hash: expected {}, got {}",
                current.get_hash(),
                block.get_header().get_previous_hash()
            )));
        }
        let expected_number = current.get_header().get_number() + 1;
        if block.get_header().get_number() != expected_number {
            return Err(NodeError::InvalidBlock(format!(
                "invalid block number: expected {expected_number}, got {}",
                block.get_header().get_number()
            )));
        }

        if block.get_header().get_gas_used() > block.get_header().get_gas_limit() {
            return Err(NodeError::InvalidBlock(format!(
                "gas used {} exceeds gas limit {}",
                block.get_header().get_gas_used(),
                block.get_header().get_gas_limit()
            )));
        }

        // Transaction validity: admission rules, authentic senders, and
        // nonces that follow on from the sender's current state
        let mut expected_nonces: HashMap<Address, u64> = HashMap::new();
        for tx in block.get_transactions() {
            validate_intrinsic(tx, &self.min_gas_price)?;

            let recovered = tx.recover_sender()?;
            if recovered != *tx.get_from() {
                return Err(NodeError::InvalidSignature(format!(
                    "sender mismatch: declared {}, recovered {recovered}",
                    tx.get_from()
                )));
            }

            let expected = expected_nonces
                .entry(*tx.get_from())
                .or_insert_with(|| state.get_nonce(tx.get_from()));
            if *expected != tx.get_nonce() {
                return Err(NodeError::InvalidNonce {
                    expected: *expected,
                    got: tx.get_nonce(),
                });
            }
            *expected += 1;
        }

        Self::persist(&self.db, block)?;
        *current = block.clone();
        info!(
            "Appended block #{} {} with {} transaction(s)",
            block.get_header().get_number(),
            block.get_hash(),
            block.get_transactions().len()
        );
        Ok(())
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block> {
        let bytes = self
            .db
            .get(&keys::block(hash))
            .map_err(|_| NodeError::NotFound(format!("block {hash}")))?;
        Block::deserialize(&bytes)
    }

    pub fn get_block_by_number(&self, number: u64) -> Result<Block> {
        Self::load_block_by_number(&self.db, number)
    }

    pub fn get_current_block(&self) -> Block {
        self.current_block
            .read()
            .expect("Failed to acquire read lock on chain head - this should never happen")
            .clone()
    }

    pub fn get_block_number(&self) -> u64 {
        self.current_block
            .read()
            .expect("Failed to acquire read lock on chain head - this should never happen")
            .get_header()
            .get_number()
    }

    pub fn get_genesis_block(&self) -> &Block {
        &self.genesis
    }

    // Persistence sequence: block bytes, number index, head pointer, all
    // in one batch so a partially committed block is impossible
    fn persist(db: &Arc<dyn Database>, block: &Block) -> Result<()> {
        let bytes = block.serialize()?;
        let mut batch = db.new_batch();
        batch.put(&keys::block(block.get_hash()), &bytes);
        batch.put(
            &keys::block_number(block.get_header().get_number()),
            block.get_hash().as_bytes(),
        );
        batch.put(&keys::current_block(), block.get_hash().as_bytes());
        batch.write()
    }

    fn load_current_block(db: &Arc<dyn Database>) -> Result<Block> {
        let hash_bytes = db.get(&keys::current_block())?;
        let hash = Hash::from_slice(&hash_bytes);
        let bytes = db
            .get(&keys::block(&hash))
            .map_err(|_| NodeError::NotFound(format!("block {hash}")))?;
        Block::deserialize(&bytes)
    }

    fn load_block_by_number(db: &Arc<dyn Database>, number: u64) -> Result<Block> {
        let hash_bytes = db
            .get(&keys::block_number(number))
            .map_err(|_| NodeError::NotFound(format!("block #{number}")))?;
        let hash = Hash::from_slice(&hash_bytes);
        let bytes = db
            .get(&keys::block(&hash))
            .map_err(|_| NodeError::NotFound(format!("block {hash}")))?;
        Block::deserialize(&bytes)
    }
}
