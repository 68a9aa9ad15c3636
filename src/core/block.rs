use crate::core::state::Account;
use crate::core::transaction::{Bloom, Receipt, Transaction};
use crate::crypto::{keccak256, Address, Hash};
use crate::error::Result;
use crate::utils::{be_bytes_trimmed, deserialize, serialize, u64_be_trimmed};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Block header. The canonical hashing preimage is a fixed concatenation:
/// `previous_hash ‖ state_root ‖ transactions_root ‖ number (BE, minimal)
/// ‖ timestamp (u64 BE) ‖ nonce (u64 BE) ‖ difficulty (BE, minimal)`.
/// The same preimage drives both the stored block hash and the
/// proof-of-work search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    previous_hash: Hash,
    state_root: Hash,
    transactions_root: Hash,
    receipts_root: Hash,
    logs_bloom: Bloom,
    number: u64,
    gas_limit: u64,
    gas_used: u64,
    timestamp: u64,
    nonce: u64,
    difficulty: BigUint,
    coinbase: Address,
    extra_data: Vec<u8>,
}

impl BlockHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        previous_hash: Hash,
        number: u64,
        gas_limit: u64,
        timestamp: u64,
        difficulty: BigUint,
        coinbase: Address,
        extra_data: Vec<u8>,
    ) -> BlockHeader {
        BlockHeader {
            previous_hash,
            state_root: Hash::zero(),
            transactions_root: Hash::zero(),
            receipts_root: Hash::zero(),
            logs_bloom: Bloom::default(),
            number,
            gas_limit,
            gas_used: 0,
            timestamp,
            nonce: 0,
            difficulty,
            coinbase,
            extra_data,
        }
    }

    /// The exact byte sequence hashed for the block hash and tested
    /// against the proof-of-work target
    pub fn hash_preimage(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(3 * 32 + 8 + 8 + 8 + 8);
        data.extend_from_slice(self.previous_hash.as_bytes());
        data.extend_from_slice(self.state_root.as_bytes());
        data.extend_from_slice(self.transactions_root.as_bytes());
        data.extend_from_slice(&u64_be_trimmed(self.number));
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&self.nonce.to_be_bytes());
        data.extend_from_slice(&be_bytes_trimmed(&self.difficulty));
        data
    }

    pub fn compute_hash(&self) -> Hash {
        keccak256(self.hash_preimage())
    }

    pub fn get_previous_hash(&self) -> &Hash {
        &self.previous_hash
    }

    pub fn get_state_root(&self) -> &Hash {
        &self.state_root
    }

    pub fn set_state_root(&mut self, root: Hash) {
        self.state_root = root;
    }

    pub fn get_transactions_root(&self) -> &Hash {
        &self.transactions_root
    }

    pub fn set_transactions_root(&mut self, root: Hash) {
        self.transactions_root = root;
    }

    pub fn get_receipts_root(&self) -> &Hash {
        &self.receipts_root
    }

    pub fn set_receipts_root(&mut self, root: Hash) {
        self.receipts_root = root;
    }

    pub fn get_logs_bloom(&self) -> &Bloom {
        &self.logs_bloom
    }

    pub fn set_logs_bloom(&mut self, bloom: Bloom) {
        self.logs_bloom = bloom;
    }

    pub fn get_number(&self) -> u64 {
        self.number
    }

    pub fn get_gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn get_gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn set_gas_used(&mut self, gas_used: u64) {
        self.gas_used = gas_used;
    }

    pub fn get_timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    pub fn get_difficulty(&self) -> &BigUint {
        &self.difficulty
    }

    pub fn get_coinbase(&self) -> &Address {
        &self.coinbase
    }

    pub fn get_extra_data(&self) -> &[u8] {
        &self.extra_data
    }
}

/// A block: header, transaction list, and the header hash.
///
/// The stored hash must always equal the freshly computed hash over the
/// header; `add_block` rejects any block where the two differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<Transaction>,
    hash: Hash,
}

impl Block {
    /// Assembles a block and seals the current header hash into it.
    /// Mining re-seals the hash after the nonce search.
    pub fn new(mut header: BlockHeader, transactions: Vec<Transaction>) -> Block {
        header.set_transactions_root(Block::compute_transactions_root(&transactions));
        let hash = header.compute_hash();
        Block {
            header,
            transactions,
            hash,
        }
    }

    /// Deterministic commitment over the transaction list: the keccak of
    /// the concatenated content hashes, zero for an empty list
    pub fn compute_transactions_root(transactions: &[Transaction]) -> Hash {
        if transactions.is_empty() {
            return Hash::zero();
        }
        let mut data = Vec::with_capacity(transactions.len() * 32);
        for tx in transactions {
            data.extend_from_slice(tx.get_hash().as_bytes());
        }
        keccak256(data)
    }

    /// Deterministic commitment over the execution outcomes: status,
    /// cumulative gas, and transaction hash per receipt, zero when empty
    pub fn compute_receipts_root(receipts: &[Receipt]) -> Hash {
        if receipts.is_empty() {
            return Hash::zero();
        }
        let mut data = Vec::with_capacity(receipts.len() * 41);
        for receipt in receipts {
            data.extend_from_slice(receipt.transaction_hash.as_bytes());
            data.push(receipt.status as u8);
            data.extend_from_slice(&receipt.cumulative_gas_used.to_be_bytes());
        }
        keccak256(data)
    }

    pub fn compute_hash(&self) -> Hash {
        self.header.compute_hash()
    }

    /// Re-seals the stored hash from the current header fields
    pub fn seal(&mut self) {
        self.hash = self.header.compute_hash();
    }

    pub fn get_header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut BlockHeader {
        &mut self.header
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn get_hash(&self) -> &Hash {
        &self.hash
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize(bytes)
    }
}

/// Genesis configuration: produces block number 0 with a zero parent hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genesis {
    pub chain_id: u64,
    pub nonce: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub gas_limit: u64,
    pub difficulty: BigUint,
    pub coinbase: Address,
    pub alloc: BTreeMap<Address, Account>,
}

impl Default for Genesis {
    fn default() -> Genesis {
        Genesis {
            chain_id: 1337,
            nonce: 0,
            timestamp: 0,
            extra_data: b"Genesis Block".to_vec(),
            gas_limit: 8_000_000,
            difficulty: BigUint::from(4u8),
            coinbase: Address::zero(),
            alloc: BTreeMap::new(),
        }
    }
}

impl Genesis {
    /// Builds the genesis block. Link checks never apply to it; its
    /// previous hash is all zeros and its number is 0.
    pub fn build_block(&self) -> Block {
        let mut header = BlockHeader::new(
            Hash::zero(),
            0,
            self.gas_limit,
            self.timestamp,
            self.difficulty.clone(),
            self.coinbase,
            self.extra_data.clone(),
        );
        header.set_nonce(self.nonce);
        Block::new(header, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Wallet;

    fn sample_header(number: u64) -> BlockHeader {
        BlockHeader::new(
            Hash::from_slice(&[0xaa; 32]),
            number,
            8_000_000,
            1_700_000_000,
            BigUint::from(4u8),
            Address::zero(),
            Vec::new(),
        )
    }

    #[test]
    fn stored_hash_matches_computed_hash() {
        let block = Block::new(sample_header(1), Vec::new());
        assert_eq!(*block.get_hash(), block.compute_hash());
    }

    #[test]
    fn preimage_layout_is_stable() {
        let header = sample_header(1);
        let preimage = header.hash_preimage();

        // 3 roots + number (1 byte for 1) + timestamp + nonce + difficulty (1 byte for 4)
        assert_eq!(preimage.len(), 96 + 1 + 8 + 8 + 1);
        assert_eq!(&preimage[..32], header.get_previous_hash().as_bytes());
        assert_eq!(preimage[96], 1);
        assert_eq!(*preimage.last().unwrap(), 4);
    }

    #[test]
    fn nonce_changes_the_hash() {
        let mut header = sample_header(1);
        let before = header.compute_hash();
        header.set_nonce(7);
        assert_ne!(before, header.compute_hash());
    }

    #[test]
    fn transactions_root_commits_to_contents() {
        assert_eq!(Block::compute_transactions_root(&[]), Hash::zero());

        let wallet = Wallet::random();
        let mut tx = Transaction::new(
            0,
            Some(Address::from_slice(&[0x01; 20])),
            BigUint::from(5u8),
            21_000,
            BigUint::from(1u8),
            Vec::new(),
        );
        tx.sign(&wallet).unwrap();

        let root_one = Block::compute_transactions_root(std::slice::from_ref(&tx));
        let root_two = Block::compute_transactions_root(&[tx.clone(), tx]);
        assert_ne!(root_one, Hash::zero());
        assert_ne!(root_one, root_two);
    }

    #[test]
    fn block_serialization_round_trip() {
        let block = Block::new(sample_header(3), Vec::new());
        let bytes = block.serialize().unwrap();
        let restored = Block::deserialize(&bytes).unwrap();
        assert_eq!(block, restored);
        assert_eq!(bytes, restored.serialize().unwrap());
    }

    #[test]
    fn genesis_block_shape() {
        let genesis = Genesis::default();
        let block = genesis.build_block();

        assert_eq!(block.get_header().get_number(), 0);
        assert!(block.get_header().get_previous_hash().is_zero());
        assert!(block.get_transactions().is_empty());
        assert_eq!(*block.get_hash(), block.compute_hash());
    }
}
