use crate::core::{validate_intrinsic, Transaction};
use crate::crypto::{Address, Hash};
use crate::error::{NodeError, Result};
use log::debug;
use num_bigint::BigUint;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::RwLock;

/// Mempool admission configuration
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of pooled transactions
    pub max_size: usize,
    /// Minimum accepted gas price
    pub min_gas_price: BigUint,
    /// Optional cap on the serialized transaction size in bytes
    pub max_tx_size: Option<usize>,
}

impl Default for MempoolConfig {
    fn default() -> MempoolConfig {
        MempoolConfig {
            max_size: 1000,
            min_gas_price: BigUint::from(1u8),
            max_tx_size: None,
        }
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone)]
pub struct MempoolStats {
    pub pending_count: usize,
    pub unique_senders: usize,
    pub max_size: usize,
    pub min_gas_price: BigUint,
    pub avg_gas_price: Option<BigUint>,
}

/// Heap entry: higher gas price wins, insertion order breaks ties
/// (older first)
#[derive(Debug, Clone, PartialEq, Eq)]
struct PriorityEntry {
    gas_price: BigUint,
    seq: u64,
    hash: Hash,
}

impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gas_price
            .cmp(&other.gas_price)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct PoolInner {
    pending: HashMap<Hash, Transaction>,
    seq_of: HashMap<Hash, u64>,
    queue: BinaryHeap<PriorityEntry>,
    by_sender: HashMap<Address, Vec<Transaction>>,
    next_seq: u64,
}

impl PoolInner {
    fn detach(&mut self, hash: &Hash) -> Option<Transaction> {
        let tx = self.pending.remove(hash)?;
        self.seq_of.remove(hash);

        let sender = *tx.get_from();
        if let Some(list) = self.by_sender.get_mut(&sender) {
            list.retain(|pooled| pooled.get_hash() != hash);
            if list.is_empty() {
                self.by_sender.remove(&sender);
            }
        }
        Some(tx)
    }

    // Rebuilding after removal keeps the heap exact; the pool is bounded,
    // so the O(n) pass is acceptable
    fn rebuild_queue(&mut self) {
        self.queue = self
            .pending
            .values()
            .map(|tx| PriorityEntry {
                gas_price: tx.get_gas_price().clone(),
                seq: self.seq_of[tx.get_hash()],
                hash: *tx.get_hash(),
            })
            .collect();
    }

    /// The lowest-priority transaction: minimum gas price, oldest first
    /// on ties
    fn lowest_priority(&self) -> Option<Hash> {
        self.pending
            .values()
            .map(|tx| (tx.get_gas_price(), self.seq_of[tx.get_hash()], tx.get_hash()))
            .min_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, _, hash)| *hash)
    }
}

/// Prioritized pool of validated transactions awaiting inclusion
pub struct Mempool {
    config: MempoolConfig,
    inner: RwLock<PoolInner>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Mempool {
        Mempool {
            config,
            inner: RwLock::new(PoolInner::default()),
        }
    }

    /// Validates and admits a transaction. When the pool is full the
    /// lowest-priority transaction is evicted first, even if the incoming
    /// one carries an equal or lower gas price.
    pub fn add(&self, tx: Transaction) -> Result<()> {
        self.validate(&tx)?;

        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on mempool - this should never happen");

        if inner.pending.contains_key(tx.get_hash()) {
            return Err(NodeError::AlreadyPresent);
        }

        if self.config.max_size == 0 {
            return Err(NodeError::MempoolFull);
        }

        if inner.pending.len() >= self.config.max_size {
            if let Some(lowest) = inner.lowest_priority() {
                debug!("Mempool full, evicting lowest-priority tx {lowest}");
                inner.detach(&lowest);
                inner.rebuild_queue();
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let hash = *tx.get_hash();
        inner.queue.push(PriorityEntry {
            gas_price: tx.get_gas_price().clone(),
            seq,
            hash,
        });
        inner.seq_of.insert(hash, seq);
        inner
            .by_sender
            .entry(*tx.get_from())
            .or_default()
            .push(tx.clone());
        inner.pending.insert(hash, tx);

        debug!("Transaction {hash} added to mempool ({} pending)", inner.pending.len());
        Ok(())
    }

    /// Removes a transaction from every index; a no-op for unknown hashes
    pub fn remove(&self, hash: &Hash) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on mempool - this should never happen");
        if inner.detach(hash).is_some() {
            inner.rebuild_queue();
            debug!("Transaction {hash} removed from mempool ({} pending)", inner.pending.len());
        }
    }

    pub fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.inner
            .read()
            .expect("Failed to acquire read lock on mempool - this should never happen")
            .pending
            .get(hash)
            .cloned()
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.inner
            .read()
            .expect("Failed to acquire read lock on mempool - this should never happen")
            .pending
            .contains_key(hash)
    }

    pub fn size(&self) -> usize {
        self.inner
            .read()
            .expect("Failed to acquire read lock on mempool - this should never happen")
            .pending
            .len()
    }

    /// Every pooled transaction, in no particular order
    pub fn pending(&self) -> Vec<Transaction> {
        self.inner
            .read()
            .expect("Failed to acquire read lock on mempool - this should never happen")
            .pending
            .values()
            .cloned()
            .collect()
    }

    /// Up to `max_count` transactions in strict gas-price-descending
    /// order, without removing them from the pool
    pub fn top_for_mining(&self, max_count: usize) -> Vec<Transaction> {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on mempool - this should never happen");

        let mut queue = inner.queue.clone();
        let mut txs = Vec::with_capacity(max_count.min(inner.pending.len()));
        while txs.len() < max_count {
            match queue.pop() {
                Some(entry) => {
                    if let Some(tx) = inner.pending.get(&entry.hash) {
                        txs.push(tx.clone());
                    }
                }
                None => break,
            }
        }
        txs
    }

    /// Snapshot of a sender's pooled transactions in insertion order
    pub fn by_sender(&self, sender: &Address) -> Vec<Transaction> {
        self.inner
            .read()
            .expect("Failed to acquire read lock on mempool - this should never happen")
            .by_sender
            .get(sender)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stats(&self) -> MempoolStats {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on mempool - this should never happen");

        let avg_gas_price = if inner.pending.is_empty() {
            None
        } else {
            let total: BigUint = inner
                .pending
                .values()
                .map(|tx| tx.get_gas_price().clone())
                .sum();
            Some(total / inner.pending.len() as u64)
        };

        MempoolStats {
            pending_count: inner.pending.len(),
            unique_senders: inner.by_sender.len(),
            max_size: self.config.max_size,
            min_gas_price: self.config.min_gas_price.clone(),
            avg_gas_price,
        }
    }

    /// Admission rules: the shared intrinsic checks plus this pool's
    /// serialized-size cap
    fn validate(&self, tx: &Transaction) -> Result<()> {
        validate_intrinsic(tx, &self.config.min_gas_price)?;

        if let Some(max_tx_size) = self.config.max_tx_size {
            let size = tx.serialize()?.len();
            if size > max_tx_size {
                return Err(NodeError::InvalidTransaction(format!(
                    "transaction too large: {size} bytes"
                )));
            }
        }

        Ok(())
    }
}
