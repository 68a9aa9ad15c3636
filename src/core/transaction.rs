use crate::crypto::{keccak256, recover_address, Address, Hash, Wallet, SIGNATURE_LENGTH};
use crate::error::{NodeError, Result};
use crate::utils::{be_bytes_trimmed, deserialize, serialize, u64_be_trimmed};
use num_bigint::BigUint;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Size of the per-block logs bloom filter in bytes
pub const BLOOM_LENGTH: usize = 256;

/// Hard cap on a transaction's gas limit at admission
pub const MAX_TX_GAS_LIMIT: u64 = 8_000_000;
/// Hard cap on a transaction's payload size at admission
pub const MAX_TX_DATA_SIZE: usize = 32 * 1024;

/// An account-model transaction.
///
/// `to = None` denotes contract creation. `from` is authoritative and must
/// match the address recovered from `(hash, v, r, s)`; the execution engine
/// re-checks this on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    nonce: u64,
    gas_price: BigUint,
    gas_limit: u64,
    to: Option<Address>,
    value: BigUint,
    data: Vec<u8>,
    v: u64,
    r: BigUint,
    s: BigUint,
    hash: Hash,
    from: Address,
}

impl Transaction {
    /// Builds an unsigned transaction; `sign` fills in the signature,
    /// sender, and content hash
    pub fn new(
        nonce: u64,
        to: Option<Address>,
        value: BigUint,
        gas_limit: u64,
        gas_price: BigUint,
        data: Vec<u8>,
    ) -> Transaction {
        let mut tx = Transaction {
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            data,
            v: 0,
            r: BigUint::default(),
            s: BigUint::default(),
            hash: Hash::zero(),
            from: Address::zero(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// Content hash over (nonce, gas_price, gas_limit, to, value, data),
    /// every integer big-endian with leading zeros stripped
    pub fn compute_hash(&self) -> Hash {
        let mut data = Vec::new();
        data.extend_from_slice(&u64_be_trimmed(self.nonce));
        data.extend_from_slice(&be_bytes_trimmed(&self.gas_price));
        data.extend_from_slice(&u64_be_trimmed(self.gas_limit));
        if let Some(to) = &self.to {
            data.extend_from_slice(to.as_bytes());
        }
        data.extend_from_slice(&be_bytes_trimmed(&self.value));
        data.extend_from_slice(&self.data);
        keccak256(data)
    }

    /// Signs the content hash and installs (v, r, s) and the sender address
    pub fn sign(&mut self, wallet: &Wallet) -> Result<()> {
        self.hash = self.compute_hash();
        let signature = wallet.sign_hash(&self.hash)?;
        self.r = BigUint::from_bytes_be(&signature[..32]);
        self.s = BigUint::from_bytes_be(&signature[32..64]);
        self.v = signature[64] as u64;
        self.from = wallet.address();
        Ok(())
    }

    /// Reassembles the 65-byte r ‖ s ‖ v signature encoding
    pub fn signature_bytes(&self) -> Result<[u8; SIGNATURE_LENGTH]> {
        let r = self.r.to_bytes_be();
        let s = self.s.to_bytes_be();
        if r.len() > 32 || s.len() > 32 || self.v > u8::MAX as u64 {
            return Err(NodeError::InvalidSignature(
                "signature components out of range".to_string(),
            ));
        }
        let mut encoded = [0u8; SIGNATURE_LENGTH];
        encoded[32 - r.len()..32].copy_from_slice(&r);
        encoded[64 - s.len()..64].copy_from_slice(&s);
        encoded[64] = self.v as u8;
        Ok(encoded)
    }

    /// Recovers the signer address from the stored signature
    pub fn recover_sender(&self) -> Result<Address> {
        recover_address(&self.hash, &self.signature_bytes()?)
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_gas_price(&self) -> &BigUint {
        &self.gas_price
    }

    pub fn get_gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn get_to(&self) -> Option<&Address> {
        self.to.as_ref()
    }

    pub fn get_value(&self) -> &BigUint {
        &self.value
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    pub fn get_v(&self) -> u64 {
        self.v
    }

    pub fn get_r(&self) -> &BigUint {
        &self.r
    }

    pub fn get_s(&self) -> &BigUint {
        &self.s
    }

    pub fn get_hash(&self) -> &Hash {
        &self.hash
    }

    pub fn get_from(&self) -> &Address {
        &self.from
    }
}

/// Stateless admission rules shared by the mempool and block validation:
/// gas price floor, gas limit bounds, signature component ranges, and the
/// payload size cap. Account-nonce ordering is deliberately not checked
/// here; the execution engine enforces it at block build time.
pub fn validate_intrinsic(tx: &Transaction, min_gas_price: &BigUint) -> Result<()> {
    if tx.get_gas_price() < min_gas_price {
        return Err(NodeError::InvalidTransaction(format!(
            "gas price too low: got {}, minimum {min_gas_price}",
            tx.get_gas_price()
        )));
    }

    if tx.get_gas_limit() == 0 {
        return Err(NodeError::InvalidTransaction(
            "gas limit cannot be zero".to_string(),
        ));
    }

    if tx.get_gas_limit() > MAX_TX_GAS_LIMIT {
        return Err(NodeError::InvalidTransaction(format!(
            "gas limit too high: {}",
            tx.get_gas_limit()
        )));
    }

    if !crate::crypto::validate_signature_values(tx.get_v(), tx.get_r(), tx.get_s()) {
        return Err(NodeError::InvalidSignature(
            "signature components out of range".to_string(),
        ));
    }

    if tx.get_data().len() > MAX_TX_DATA_SIZE {
        return Err(NodeError::InvalidTransaction(format!(
            "data too large: {} bytes",
            tx.get_data().len()
        )));
    }

    Ok(())
}

/// An event log emitted during transaction execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub transaction_hash: Hash,
    pub transaction_index: u64,
    pub block_hash: Hash,
    pub log_index: u64,
}

impl Log {
    /// A log as produced by the execution engine, before the block
    /// processor stamps in its position
    pub fn pending(address: Address, topics: Vec<Hash>, data: Vec<u8>) -> Log {
        Log {
            address,
            topics,
            data,
            block_number: 0,
            transaction_hash: Hash::zero(),
            transaction_index: 0,
            block_hash: Hash::zero(),
            log_index: 0,
        }
    }
}

/// The record of a transaction's execution outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: Hash,
    pub transaction_index: u64,
    pub block_hash: Hash,
    pub block_number: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
    /// 1 for success, 0 for failure
    pub status: u64,
}

impl Receipt {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Receipt> {
        deserialize(bytes)
    }
}

/// 2048-bit logs bloom over log addresses and topics.
///
/// Three bit positions per element, each taken from the first six bytes of
/// the element's Keccak-256 digest, low 11 bits each.
#[derive(Clone, PartialEq, Eq)]
pub struct Bloom([u8; BLOOM_LENGTH]);

impl Default for Bloom {
    fn default() -> Self {
        Bloom([0u8; BLOOM_LENGTH])
    }
}

impl std::fmt::Debug for Bloom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bloom({})", data_encoding::HEXLOWER.encode(&self.0))
    }
}

impl Bloom {
    pub fn add(&mut self, element: &[u8]) {
        let digest = keccak256(element);
        let bytes = digest.as_bytes();
        for i in [0usize, 2, 4] {
            let bit = (((bytes[i] as usize) << 8) | bytes[i + 1] as usize) & 0x7ff;
            self.0[BLOOM_LENGTH - 1 - bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        let digest = keccak256(element);
        let bytes = digest.as_bytes();
        for i in [0usize, 2, 4] {
            let bit = (((bytes[i] as usize) << 8) | bytes[i + 1] as usize) & 0x7ff;
            if self.0[BLOOM_LENGTH - 1 - bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }

    /// Folds a log's address and topics into the filter
    pub fn accrue_log(&mut self, log: &Log) {
        self.add(log.address.as_bytes());
        for topic in &log.topics {
            self.add(topic.as_bytes());
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

// Serde has no impls for arrays this long, so the bloom serializes as a
// byte sequence and validates its length on the way back in.
impl Serialize for Bloom {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Bloom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != BLOOM_LENGTH {
            return Err(de::Error::invalid_length(bytes.len(), &"256 bytes"));
        }
        let mut bloom = [0u8; BLOOM_LENGTH];
        bloom.copy_from_slice(&bytes);
        Ok(Bloom(bloom))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_transfer() -> (Wallet, Transaction) {
        let wallet = Wallet::random();
        let to = Address::from_slice(&[0x42; 20]);
        let mut tx = Transaction::new(
            0,
            Some(to),
            BigUint::from(1_000u32),
            21_000,
            BigUint::from(5u8),
            Vec::new(),
        );
        tx.sign(&wallet).unwrap();
        (wallet, tx)
    }

    #[test]
    fn content_hash_covers_payload_fields() {
        let to = Address::from_slice(&[0x42; 20]);
        let a = Transaction::new(
            0,
            Some(to),
            BigUint::from(1u8),
            21_000,
            BigUint::from(5u8),
            Vec::new(),
        );
        let b = Transaction::new(
            1,
            Some(to),
            BigUint::from(1u8),
            21_000,
            BigUint::from(5u8),
            Vec::new(),
        );
        assert_ne!(a.compute_hash(), b.compute_hash());

        let creation = Transaction::new(
            0,
            None,
            BigUint::from(1u8),
            21_000,
            BigUint::from(5u8),
            Vec::new(),
        );
        assert_ne!(a.compute_hash(), creation.compute_hash());
        assert!(creation.is_contract_creation());
    }

    #[test]
    fn sign_then_recover_sender() {
        let (wallet, tx) = signed_transfer();
        assert_eq!(*tx.get_from(), wallet.address());
        assert_eq!(tx.recover_sender().unwrap(), wallet.address());
        assert_eq!(*tx.get_hash(), tx.compute_hash());
    }

    #[test]
    fn serialization_round_trip_is_byte_identical() {
        let (_, tx) = signed_transfer();
        let bytes = tx.serialize().unwrap();
        let restored = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(tx, restored);
        assert_eq!(bytes, restored.serialize().unwrap());
    }

    #[test]
    fn signature_bytes_round_trip() {
        let (_, tx) = signed_transfer();
        let sig = tx.signature_bytes().unwrap();
        assert_eq!(BigUint::from_bytes_be(&sig[..32]), *tx.get_r());
        assert_eq!(BigUint::from_bytes_be(&sig[32..64]), *tx.get_s());
        assert_eq!(sig[64] as u64, tx.get_v());
    }

    #[test]
    fn bloom_membership() {
        let mut bloom = Bloom::default();
        assert!(bloom.is_zero());

        let log = Log::pending(
            Address::from_slice(&[0x01; 20]),
            vec![keccak256(b"Topic")],
            Vec::new(),
        );
        bloom.accrue_log(&log);

        assert!(bloom.contains(log.address.as_bytes()));
        assert!(bloom.contains(log.topics[0].as_bytes()));
        assert!(!bloom.contains(b"absent"));
    }

    #[test]
    fn bloom_serde_round_trip() {
        let mut bloom = Bloom::default();
        bloom.add(b"element");
        let bytes = serialize(&bloom).unwrap();
        let restored: Bloom = deserialize(&bytes).unwrap();
        assert_eq!(bloom, restored);
    }
}
