//! Node coordinator
//!
//! Owns the byte store and wires the chain manager, world-state store,
//! mempool, execution engine, and proof-of-work engine together. Runs the
//! mining loop on a dedicated thread and publishes typed events for the
//! RPC and P2P adapters; the core never calls back into them.

use crate::config::Settings;
use crate::core::{
    Block, BlockHeader, Blockchain, Bloom, ExecutionConfig, ExecutionEngine, Genesis, ProofOfWork,
    Receipt, StateDb, Transaction,
};
use crate::crypto::{Address, Hash};
use crate::error::{NodeError, Result};
use crate::storage::{keys, Database, Mempool, MempoolConfig, MempoolStats, SledDatabase};
use crate::utils::unix_timestamp;
use log::{debug, error, info, warn};
use num_bigint::BigUint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Messages the core publishes to external adapters
#[derive(Debug, Clone)]
pub enum NodeEvent {
    BlockAppended(Block),
    TransactionAccepted(Hash),
}

/// The blockchain node: component wiring, the mining loop, and the query
/// surface consumed by the RPC and P2P boundaries
pub struct Node {
    settings: Settings,
    db: Arc<dyn Database>,
    chain: Blockchain,
    state: StateDb,
    mempool: Mempool,
    pow: ProofOfWork,
    engine: ExecutionEngine,
    event_sender: Mutex<Sender<NodeEvent>>,
    event_receiver: Mutex<Option<Receiver<NodeEvent>>>,
    shutdown: AtomicBool,
    miner_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Opens the byte store and bootstraps every component with a genesis
    /// configuration derived from the settings
    pub fn new(settings: Settings) -> Result<Node> {
        let genesis = Genesis {
            chain_id: settings.chain_id,
            gas_limit: settings.block_gas_limit,
            difficulty: BigUint::from(settings.difficulty),
            coinbase: settings.coinbase,
            ..Genesis::default()
        };
        Self::with_genesis(settings, genesis)
    }

    /// Same as `new` but with full control over the genesis block,
    /// including pre-funded alloc accounts
    pub fn with_genesis(settings: Settings, genesis: Genesis) -> Result<Node> {
        settings.validate()?;

        let db: Arc<dyn Database> = Arc::new(SledDatabase::open(&settings.db_path)?);
        let state = StateDb::new(Arc::clone(&db), Hash::zero());
        let chain = Blockchain::new(
            Arc::clone(&db),
            &genesis,
            &state,
            settings.min_gas_price.clone(),
        )?;
        let mempool = Mempool::new(MempoolConfig {
            max_size: settings.mempool_max_size,
            min_gas_price: settings.min_gas_price.clone(),
            max_tx_size: settings.mempool_max_tx_size,
        });
        let pow = ProofOfWork::new(BigUint::from(settings.difficulty))?;
        let engine = ExecutionEngine::new(ExecutionConfig {
            chain_id: settings.chain_id,
            block_gas_limit: settings.block_gas_limit,
            min_gas_price: settings.min_gas_price.clone(),
        });

        let (event_sender, event_receiver) = mpsc::channel();

        info!(
            "Node initialized: chain id {}, head #{}, difficulty {} bits",
            settings.chain_id,
            chain.get_block_number(),
            settings.difficulty
        );

        Ok(Node {
            settings,
            db,
            chain,
            state,
            mempool,
            pow,
            engine,
            event_sender: Mutex::new(event_sender),
            event_receiver: Mutex::new(Some(event_receiver)),
            shutdown: AtomicBool::new(false),
            miner_handle: Mutex::new(None),
        })
    }

    /// Hands the event stream to exactly one adapter; later calls get None
    pub fn take_event_receiver(&self) -> Option<Receiver<NodeEvent>> {
        self.event_receiver
            .lock()
            .expect("Failed to acquire lock on event receiver - this should never happen")
            .take()
    }

    fn emit(&self, event: NodeEvent) {
        let sender = self
            .event_sender
            .lock()
            .expect("Failed to acquire lock on event sender - this should never happen");
        // An adapter that dropped its receiver just stops listening
        let _ = sender.send(event);
    }

    /// The RPC-boundary entry point: authenticates the transaction and
    /// admits it into the mempool
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash> {
        if tx.compute_hash() != *tx.get_hash() {
            return Err(NodeError::InvalidTransaction(
                "content hash mismatch".to_string(),
            ));
        }
        let recovered = tx.recover_sender()?;
        if recovered != *tx.get_from() {
            return Err(NodeError::InvalidSignature(format!(
                "sender mismatch: declared {}, recovered {recovered}",
                tx.get_from()
            )));
        }

        let hash = *tx.get_hash();
        self.mempool.add(tx)?;
        self.emit(NodeEvent::TransactionAccepted(hash));
        Ok(hash)
    }

    /// The P2P-boundary entry point: a foreign block takes the same
    /// validate-and-append path as a mined one, with execution replayed
    /// for deterministic state
    pub fn import_block(&self, block: &Block) -> Result<()> {
        self.verify_execution(block)?;
        self.chain.add_block(block, &self.state)?;
        self.apply_block(block)?;

        for tx in block.get_transactions() {
            self.mempool.remove(tx.get_hash());
        }
        self.emit(NodeEvent::BlockAppended(block.clone()));
        Ok(())
    }

    /// Assembles a candidate from the highest-priority transactions,
    /// mines it to completion, appends it, and applies its state
    /// transitions. Returns None when mining was cancelled.
    pub fn mine_one_block(&self) -> Result<Option<Block>> {
        let parent = self.chain.get_current_block();
        let candidates = self.mempool.top_for_mining(self.settings.max_txs_per_block);

        let mut header = BlockHeader::new(
            *parent.get_hash(),
            parent.get_header().get_number() + 1,
            self.settings.block_gas_limit,
            unix_timestamp()?,
            BigUint::from(self.settings.difficulty),
            self.settings.coinbase,
            Vec::new(),
        );

        // Pre-execute on a state copy to fix gas usage, the receipts
        // commitment, and the post-state root before the nonce search
        let simulation = self.state.copy();
        let mut included = Vec::with_capacity(candidates.len());
        let mut sim_receipts = Vec::with_capacity(candidates.len());
        let mut bloom = Bloom::default();
        let mut gas_total: u64 = 0;

        for tx in candidates {
            if gas_total.saturating_add(tx.get_gas_limit()) > header.get_gas_limit() {
                continue; // does not fit this block, stays pooled
            }
            match self.engine.execute_transaction(&simulation, &tx, &header) {
                Ok(result) => {
                    gas_total += result.gas_used;
                    for log in &result.logs {
                        bloom.accrue_log(log);
                    }
                    sim_receipts.push(Receipt {
                        transaction_hash: *tx.get_hash(),
                        transaction_index: sim_receipts.len() as u64,
                        block_hash: Hash::zero(),
                        block_number: header.get_number(),
                        from: *tx.get_from(),
                        to: tx.get_to().copied(),
                        gas_used: result.gas_used,
                        cumulative_gas_used: gas_total,
                        contract_address: result.contract_address,
                        logs: result.logs,
                        status: result.status,
                    });
                    included.push(tx);
                }
                Err(NodeError::InvalidNonce { expected, got }) if got > expected => {
                    // The price-ordered pull visited this transaction
                    // ahead of its lower-nonce sibling; admission allows
                    // that, so it stays pooled for a later round
                    debug!(
                        "Transaction {} waits for nonce {expected} (carries {got})",
                        tx.get_hash()
                    );
                }
                Err(e) => {
                    // A stale nonce or any other hard failure can never
                    // execute against this chain, and keeping it pooled
                    // would wedge every future round
                    warn!("Dropping transaction {} from mempool: {e}", tx.get_hash());
                    self.mempool.remove(tx.get_hash());
                }
            }
        }

        header.set_gas_used(gas_total);
        header.set_state_root(simulation.preview_root());
        header.set_receipts_root(Block::compute_receipts_root(&sim_receipts));
        header.set_logs_bloom(bloom);

        let mut block = Block::new(header, included);

        let started = Instant::now();
        if !self
            .pow
            .mine_parallel(&mut block, self.settings.mining_threads, &self.shutdown)?
        {
            debug!("Mining cancelled, discarding candidate");
            return Ok(None);
        }
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            debug!(
                "Mined block #{} after {} nonce(s), {:.0} H/s",
                block.get_header().get_number(),
                block.get_header().get_nonce() + 1,
                (block.get_header().get_nonce() + 1) as f64 / elapsed
            );
        }

        self.chain.add_block(&block, &self.state)?;
        self.apply_block(&block)?;

        for tx in block.get_transactions() {
            self.mempool.remove(tx.get_hash());
        }
        self.emit(NodeEvent::BlockAppended(block.clone()));
        Ok(Some(block))
    }

    // Replays the block's transactions on an isolated copy and checks the
    // header's gas total and state root before anything durable happens
    fn verify_execution(&self, block: &Block) -> Result<()> {
        let simulation = self.state.copy();
        let mut gas_total: u64 = 0;
        for tx in block.get_transactions() {
            let result = self
                .engine
                .execute_transaction(&simulation, tx, block.get_header())?;
            gas_total += result.gas_used;
        }

        if gas_total != block.get_header().get_gas_used() {
            return Err(NodeError::InvalidBlock(format!(
                "gas used mismatch: header says {}, execution used {gas_total}",
                block.get_header().get_gas_used()
            )));
        }
        if simulation.preview_root() != *block.get_header().get_state_root() {
            return Err(NodeError::InvalidBlock(
                "state root mismatch after execution".to_string(),
            ));
        }
        Ok(())
    }

    // Replays the block against the live state, commits the new root, and
    // persists one receipt per transaction in a single batch
    fn apply_block(&self, block: &Block) -> Result<Vec<Receipt>> {
        let header = block.get_header();
        let mut receipts = Vec::with_capacity(block.get_transactions().len());
        let mut cumulative: u64 = 0;

        for (index, tx) in block.get_transactions().iter().enumerate() {
            let result = self.engine.execute_transaction(&self.state, tx, header)?;
            cumulative += result.gas_used;

            let mut logs = result.logs;
            for (log_index, log) in logs.iter_mut().enumerate() {
                log.block_number = header.get_number();
                log.block_hash = *block.get_hash();
                log.transaction_hash = *tx.get_hash();
                log.transaction_index = index as u64;
                log.log_index = log_index as u64;
                self.state.add_log(log.clone());
            }

            receipts.push(Receipt {
                transaction_hash: *tx.get_hash(),
                transaction_index: index as u64,
                block_hash: *block.get_hash(),
                block_number: header.get_number(),
                from: *tx.get_from(),
                to: tx.get_to().copied(),
                gas_used: result.gas_used,
                cumulative_gas_used: cumulative,
                contract_address: result.contract_address,
                logs,
                status: result.status,
            });
        }

        let root = self.state.commit()?;
        if root != *header.get_state_root() {
            error!(
                "State root divergence after replay of block {}: expected {}, got {root}",
                block.get_hash(),
                header.get_state_root()
            );
            return Err(NodeError::InvalidBlock(
                "state root divergence after replay".to_string(),
            ));
        }

        let mut batch = self.db.new_batch();
        for receipt in &receipts {
            batch.put(
                &keys::receipt(&receipt.transaction_hash),
                &receipt.serialize()?,
            );
        }
        batch.write()?;

        Ok(receipts)
    }

    /// Spawns the dedicated mining thread; it runs until `shutdown`
    pub fn start_mining(self: &Arc<Node>) {
        let node = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("miner".to_string())
            .spawn(move || {
                info!(
                    "Mining started with difficulty {} bits",
                    node.settings.difficulty
                );
                while !node.shutdown.load(Ordering::Relaxed) {
                    match node.mine_one_block() {
                        Ok(Some(block)) => {
                            info!(
                                "New block mined: #{} {} with {} transaction(s)",
                                block.get_header().get_number(),
                                block.get_hash(),
                                block.get_transactions().len()
                            );
                        }
                        Ok(None) => {
                            // Cancelled mid-search; the loop condition
                            // decides whether to go again
                        }
                        Err(e) => {
                            error!("Mining error: {e}");
                            thread::sleep(Duration::from_millis(200));
                        }
                    }
                }
                info!("Mining stopped");
            })
            .expect("Failed to spawn miner thread - this should never happen");

        *self
            .miner_handle
            .lock()
            .expect("Failed to acquire lock on miner handle - this should never happen") =
            Some(handle);
    }

    /// Signals every loop to stop and joins the miner thread
    pub fn shutdown(&self) {
        info!("Shutting down node...");
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = self
            .miner_handle
            .lock()
            .expect("Failed to acquire lock on miner handle - this should never happen")
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        info!("Node stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    // Chain queries

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Block> {
        self.chain.get_block_by_hash(hash)
    }

    pub fn get_block_by_number(&self, number: u64) -> Result<Block> {
        self.chain.get_block_by_number(number)
    }

    pub fn get_current_block(&self) -> Block {
        self.chain.get_current_block()
    }

    pub fn get_block_number(&self) -> u64 {
        self.chain.get_block_number()
    }

    // State queries

    pub fn get_balance(&self, addr: &Address) -> BigUint {
        self.state.get_balance(addr)
    }

    pub fn get_nonce(&self, addr: &Address) -> u64 {
        self.state.get_nonce(addr)
    }

    pub fn get_code(&self, addr: &Address) -> Option<Vec<u8>> {
        self.state.get_code(addr)
    }

    pub fn get_storage(&self, addr: &Address, slot: &Hash) -> Hash {
        self.state.get_storage(addr, slot)
    }

    pub fn get_receipt(&self, tx_hash: &Hash) -> Result<Receipt> {
        let bytes = self
            .db
            .get(&keys::receipt(tx_hash))
            .map_err(|_| NodeError::NotFound(format!("receipt for {tx_hash}")))?;
        Receipt::deserialize(&bytes)
    }

    // Mempool operations

    pub fn get_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.mempool.get(hash)
    }

    pub fn remove_transaction(&self, hash: &Hash) {
        self.mempool.remove(hash);
    }

    pub fn get_pending(&self) -> Vec<Transaction> {
        self.mempool.pending()
    }

    pub fn get_top_for_mining(&self, max_count: usize) -> Vec<Transaction> {
        self.mempool.top_for_mining(max_count)
    }

    pub fn get_pending_by_sender(&self, sender: &Address) -> Vec<Transaction> {
        self.mempool.by_sender(sender)
    }

    pub fn mempool_size(&self) -> usize {
        self.mempool.size()
    }

    pub fn mempool_stats(&self) -> MempoolStats {
        self.mempool.stats()
    }

    // Execution helpers

    pub fn estimate_gas(&self, tx: &Transaction) -> Result<u64> {
        let head = self.chain.get_current_block();
        self.engine.estimate_gas(&self.state, tx, head.get_header())
    }

    pub fn call(&self, tx: &Transaction) -> Result<Vec<u8>> {
        let head = self.chain.get_current_block();
        self.engine.call(&self.state, tx, head.get_header())
    }

    pub fn chain_id(&self) -> u64 {
        self.settings.chain_id
    }

    pub fn get_settings(&self) -> &Settings {
        &self.settings
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
