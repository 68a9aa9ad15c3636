use crate::core::transaction::Log;
use crate::crypto::{keccak256, Address, Hash, KECCAK_EMPTY};
use crate::error::Result;
use crate::storage::{keys, Database};
use crate::utils::{be_bytes_trimmed, deserialize, serialize, u64_be_trimmed};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Per-address tuple of nonce, balance, code hash, and storage root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: BigUint,
    pub code_hash: Hash,
    pub storage_root: Hash,
}

impl Default for Account {
    fn default() -> Account {
        Account {
            nonce: 0,
            balance: BigUint::default(),
            code_hash: KECCAK_EMPTY,
            storage_root: Hash::zero(),
        }
    }
}

impl Account {
    /// True when nonce and balance are zero and no code is attached
    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance == BigUint::default()
            && (self.code_hash == KECCAK_EMPTY || self.code_hash.is_zero())
    }
}

/// World-state store: account and contract-storage caches above the byte
/// store, plus the log buffer of the current execution scope.
///
/// All mutation stays in the caches until `commit`, which flushes them in
/// one atomic batch and installs the new state root. Reads fall back to
/// the byte store and do not populate the caches: the caches hold written
/// state only, so the root is the same on every node that executes the
/// same transactions, regardless of what was read along the way.
pub struct StateDb {
    db: Arc<dyn Database>,
    state_root: RwLock<Hash>,
    accounts: RwLock<BTreeMap<Address, Account>>,
    storage: RwLock<BTreeMap<Address, BTreeMap<Hash, Hash>>>,
    logs: RwLock<Vec<Log>>,
}

impl StateDb {
    pub fn new(db: Arc<dyn Database>, state_root: Hash) -> StateDb {
        StateDb {
            db,
            state_root: RwLock::new(state_root),
            accounts: RwLock::new(BTreeMap::new()),
            storage: RwLock::new(BTreeMap::new()),
            logs: RwLock::new(Vec::new()),
        }
    }

    /// Returns the cached account, else loads it from the byte store,
    /// else a zero account. Loads stay out of the cache; only
    /// `set_account` dirties it.
    pub fn get_account(&self, addr: &Address) -> Account {
        {
            let accounts = self
                .accounts
                .read()
                .expect("Failed to acquire read lock on accounts - this should never happen");
            if let Some(account) = accounts.get(addr) {
                return account.clone();
            }
        }

        if let Ok(bytes) = self.db.get(&keys::account(addr)) {
            if let Ok(account) = deserialize::<Account>(&bytes) {
                return account;
            }
        }

        Account::default()
    }

    /// Cache-only update; not durable until `commit`
    pub fn set_account(&self, addr: &Address, account: Account) {
        let mut accounts = self
            .accounts
            .write()
            .expect("Failed to acquire write lock on accounts - this should never happen");
        accounts.insert(*addr, account);
    }

    pub fn get_balance(&self, addr: &Address) -> BigUint {
        self.get_account(addr).balance
    }

    pub fn set_balance(&self, addr: &Address, balance: BigUint) {
        let mut account = self.get_account(addr);
        account.balance = balance;
        self.set_account(addr, account);
    }

    pub fn get_nonce(&self, addr: &Address) -> u64 {
        self.get_account(addr).nonce
    }

    pub fn set_nonce(&self, addr: &Address, nonce: u64) {
        let mut account = self.get_account(addr);
        account.nonce = nonce;
        self.set_account(addr, account);
    }

    /// Contract code, content-addressed by its Keccak-256 hash
    pub fn get_code(&self, addr: &Address) -> Option<Vec<u8>> {
        let account = self.get_account(addr);
        if account.code_hash.is_zero() || account.code_hash == KECCAK_EMPTY {
            return None;
        }
        self.db.get(&keys::code(&account.code_hash)).ok()
    }

    /// Stores code under `code-<codehash>` and points the account at it
    pub fn set_code(&self, addr: &Address, code: &[u8]) -> Result<()> {
        let code_hash = keccak256(code);
        self.db.put(&keys::code(&code_hash), code)?;

        let mut account = self.get_account(addr);
        account.code_hash = code_hash;
        self.set_account(addr, account);
        Ok(())
    }

    pub fn get_storage(&self, addr: &Address, slot: &Hash) -> Hash {
        {
            let storage = self
                .storage
                .read()
                .expect("Failed to acquire read lock on storage - this should never happen");
            if let Some(cell) = storage.get(addr).and_then(|cells| cells.get(slot)) {
                return *cell;
            }
        }

        match self.db.get(&keys::storage(addr, slot)) {
            Ok(bytes) => Hash::from_slice(&bytes),
            Err(_) => Hash::zero(),
        }
    }

    pub fn set_storage(&self, addr: &Address, slot: Hash, value: Hash) {
        let mut storage = self
            .storage
            .write()
            .expect("Failed to acquire write lock on storage - this should never happen");
        storage.entry(*addr).or_default().insert(slot, value);
    }

    /// Appends to the log buffer of the current execution scope
    pub fn add_log(&self, log: Log) {
        let mut logs = self
            .logs
            .write()
            .expect("Failed to acquire write lock on logs - this should never happen");
        logs.push(log);
    }

    pub fn get_logs(&self) -> Vec<Log> {
        self.logs
            .read()
            .expect("Failed to acquire read lock on logs - this should never happen")
            .clone()
    }

    /// Flushes every cached account and storage cell in one atomic batch,
    /// installs the new state root, clears the caches, and returns the root
    pub fn commit(&self) -> Result<Hash> {
        let mut accounts = self
            .accounts
            .write()
            .expect("Failed to acquire write lock on accounts - this should never happen");
        let mut storage = self
            .storage
            .write()
            .expect("Failed to acquire write lock on storage - this should never happen");

        let mut batch = self.db.new_batch();
        for (addr, account) in accounts.iter() {
            batch.put(&keys::account(addr), &serialize(account)?);
        }
        for (addr, cells) in storage.iter() {
            for (slot, value) in cells {
                batch.put(&keys::storage(addr, slot), value.as_bytes());
            }
        }
        batch.write()?;

        let new_root = Self::root_over(&accounts, &storage);
        *self
            .state_root
            .write()
            .expect("Failed to acquire write lock on state root - this should never happen") =
            new_root;

        accounts.clear();
        storage.clear();
        self.logs
            .write()
            .expect("Failed to acquire write lock on logs - this should never happen")
            .clear();

        Ok(new_root)
    }

    /// The root `commit` would install right now, without writing anything
    pub fn preview_root(&self) -> Hash {
        let accounts = self
            .accounts
            .read()
            .expect("Failed to acquire read lock on accounts - this should never happen");
        let storage = self
            .storage
            .read()
            .expect("Failed to acquire read lock on storage - this should never happen");
        Self::root_over(&accounts, &storage)
    }

    // Deterministic commitment over the dirty state: accounts in address
    // order, then storage cells in (address, slot) order
    fn root_over(
        accounts: &BTreeMap<Address, Account>,
        storage: &BTreeMap<Address, BTreeMap<Hash, Hash>>,
    ) -> Hash {
        let mut data = Vec::new();
        for (addr, account) in accounts {
            data.extend_from_slice(addr.as_bytes());
            data.extend_from_slice(&be_bytes_trimmed(&account.balance));
            data.extend_from_slice(&u64_be_trimmed(account.nonce));
            data.extend_from_slice(account.code_hash.as_bytes());
        }
        for (addr, cells) in storage {
            data.extend_from_slice(addr.as_bytes());
            for (slot, value) in cells {
                data.extend_from_slice(slot.as_bytes());
                data.extend_from_slice(value.as_bytes());
            }
        }

        if data.is_empty() {
            return Hash::zero();
        }
        keccak256(data)
    }

    /// Isolated deep copy of the caches sharing the byte store read path.
    /// Used by gas estimation and call simulation; dropping it discards
    /// every change made through it.
    pub fn copy(&self) -> StateDb {
        let accounts = self
            .accounts
            .read()
            .expect("Failed to acquire read lock on accounts - this should never happen")
            .clone();
        let storage = self
            .storage
            .read()
            .expect("Failed to acquire read lock on storage - this should never happen")
            .clone();
        let logs = self
            .logs
            .read()
            .expect("Failed to acquire read lock on logs - this should never happen")
            .clone();
        let state_root = *self
            .state_root
            .read()
            .expect("Failed to acquire read lock on state root - this should never happen");

        StateDb {
            db: Arc::clone(&self.db),
            state_root: RwLock::new(state_root),
            accounts: RwLock::new(accounts),
            storage: RwLock::new(storage),
            logs: RwLock::new(logs),
        }
    }

    pub fn get_state_root(&self) -> Hash {
        *self
            .state_root
            .read()
            .expect("Failed to acquire read lock on state root - this should never happen")
    }

    /// Re-aims the store at a root recovered from a persisted chain head
    pub fn reset_root(&self, root: Hash) {
        *self
            .state_root
            .write()
            .expect("Failed to acquire write lock on state root - this should never happen") =
            root;
    }

    /// True iff nonce = 0, balance = 0, and no code is attached
    pub fn empty(&self, addr: &Address) -> bool {
        self.get_account(addr).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SledDatabase;
    use tempfile::tempdir;

    fn state() -> (tempfile::TempDir, StateDb) {
        let dir = tempdir().unwrap();
        let db = Arc::new(SledDatabase::open(dir.path().join("db")).unwrap());
        (dir, StateDb::new(db, Hash::zero()))
    }

    fn addr(byte: u8) -> Address {
        Address::from_slice(&[byte; 20])
    }

    #[test]
    fn unknown_account_is_zero_and_uncached() {
        let (_dir, state) = state();
        let account = state.get_account(&addr(1));
        assert!(account.is_empty());
        assert!(state.empty(&addr(1)));

        // A full miss must not dirty the cache
        assert_eq!(state.preview_root(), Hash::zero());
    }

    #[test]
    fn balance_and_nonce_accessors_materialize_accounts() {
        let (_dir, state) = state();
        let a = addr(2);

        state.set_balance(&a, BigUint::from(500u32));
        state.set_nonce(&a, 3);

        assert_eq!(state.get_balance(&a), BigUint::from(500u32));
        assert_eq!(state.get_nonce(&a), 3);
        assert!(!state.empty(&a));
    }

    #[test]
    fn commit_persists_and_reload_reproduces_state() {
        let dir = tempdir().unwrap();
        let db: Arc<dyn Database> =
            Arc::new(SledDatabase::open(dir.path().join("db")).unwrap());

        let state = StateDb::new(Arc::clone(&db), Hash::zero());
        let a = addr(3);
        state.set_balance(&a, BigUint::from(42u8));
        state.set_nonce(&a, 7);
        state.set_storage(&a, Hash::from_slice(&[1]), Hash::from_slice(&[9]));
        let root = state.commit().unwrap();
        assert_ne!(root, Hash::zero());

        // Caches cleared, reads now come from the byte store
        let reloaded = StateDb::new(db, root);
        assert_eq!(reloaded.get_balance(&a), BigUint::from(42u8));
        assert_eq!(reloaded.get_nonce(&a), 7);
        assert_eq!(
            reloaded.get_storage(&a, &Hash::from_slice(&[1])),
            Hash::from_slice(&[9])
        );
    }

    #[test]
    fn reads_do_not_change_the_root() {
        let dir = tempdir().unwrap();
        let db: Arc<dyn Database> =
            Arc::new(SledDatabase::open(dir.path().join("db")).unwrap());

        let state = StateDb::new(Arc::clone(&db), Hash::zero());
        state.set_balance(&addr(8), BigUint::from(55u8));
        state.commit().unwrap();

        // A node that reads persisted accounts must produce the same root
        // as one that never looked
        let reader = StateDb::new(Arc::clone(&db), Hash::zero());
        reader.get_balance(&addr(8));
        reader.get_storage(&addr(8), &Hash::from_slice(&[1]));
        assert_eq!(reader.preview_root(), Hash::zero());

        reader.set_balance(&addr(9), BigUint::from(1u8));
        let fresh = StateDb::new(db, Hash::zero());
        fresh.set_balance(&addr(9), BigUint::from(1u8));
        assert_eq!(reader.preview_root(), fresh.preview_root());
    }

    #[test]
    fn equal_states_produce_equal_roots() {
        let (_dir_a, state_a) = state();
        let (_dir_b, state_b) = state();

        // Insertion order must not matter
        state_a.set_balance(&addr(1), BigUint::from(10u8));
        state_a.set_balance(&addr(2), BigUint::from(20u8));
        state_b.set_balance(&addr(2), BigUint::from(20u8));
        state_b.set_balance(&addr(1), BigUint::from(10u8));

        assert_eq!(state_a.preview_root(), state_b.preview_root());
    }

    #[test]
    fn copy_is_isolated_from_the_original() {
        let (_dir, state) = state();
        let a = addr(4);
        state.set_balance(&a, BigUint::from(100u8));

        let copy = state.copy();
        copy.set_balance(&a, BigUint::from(1u8));
        copy.set_nonce(&a, 9);

        assert_eq!(state.get_balance(&a), BigUint::from(100u8));
        assert_eq!(state.get_nonce(&a), 0);
        assert_eq!(copy.get_balance(&a), BigUint::from(1u8));
    }

    #[test]
    fn code_round_trip() {
        let (_dir, state) = state();
        let a = addr(5);

        assert!(state.get_code(&a).is_none());

        let code = b"pseudo-bytecode".to_vec();
        state.set_code(&a, &code).unwrap();
        assert_eq!(state.get_code(&a).unwrap(), code);
        assert_eq!(state.get_account(&a).code_hash, keccak256(&code));
    }

    #[test]
    fn log_buffer_appends_and_clears_on_commit() {
        let (_dir, state) = state();
        state.add_log(Log::pending(addr(6), Vec::new(), b"payload".to_vec()));
        assert_eq!(state.get_logs().len(), 1);

        state.commit().unwrap();
        assert!(state.get_logs().is_empty());
    }
}
