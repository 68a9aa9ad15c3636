use crate::error::{NodeError, Result};
use data_encoding::HEXLOWER;
use std::path::Path;

/// Ordered byte map with atomic write batches.
///
/// `get` fails with `NotFound` when the key is absent; every other failure
/// surfaces as `Storage`.
pub trait Database: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete(&self, key: &[u8]) -> Result<()>;
    fn has(&self, key: &[u8]) -> Result<bool>;
    fn new_batch(&self) -> Box<dyn Batch>;
}

/// Accumulates writes and deletes and commits them as one atomic unit
pub trait Batch: Send {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    fn write(&mut self) -> Result<()>;
    fn reset(&mut self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ASCII key namespaces for everything the node persists
pub mod keys {
    use crate::crypto::{Address, Hash};

    pub fn block(hash: &Hash) -> Vec<u8> {
        [b"block-".as_slice(), hash.as_bytes()].concat()
    }

    /// Block-number index key; the number is big-endian with leading
    /// zeros stripped, so genesis indexes under the bare prefix
    pub fn block_number(number: u64) -> Vec<u8> {
        let be = number.to_be_bytes();
        let first = be.iter().position(|b| *b != 0).unwrap_or(be.len());
        [b"block-number-".as_slice(), &be[first..]].concat()
    }

    pub fn current_block() -> Vec<u8> {
        b"current-block".to_vec()
    }

    pub fn account(addr: &Address) -> Vec<u8> {
        [b"account-".as_slice(), addr.as_bytes()].concat()
    }

    pub fn code(code_hash: &Hash) -> Vec<u8> {
        [b"code-".as_slice(), code_hash.as_bytes()].concat()
    }

    pub fn storage(addr: &Address, slot: &Hash) -> Vec<u8> {
        [b"storage-".as_slice(), addr.as_bytes(), slot.as_bytes()].concat()
    }

    pub fn receipt(tx_hash: &Hash) -> Vec<u8> {
        [b"receipt-".as_slice(), tx_hash.as_bytes()].concat()
    }
}

/// Sled-backed byte store
pub struct SledDatabase {
    db: sled::Db,
}

impl SledDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<SledDatabase> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            NodeError::Storage(format!(
                "failed to open database at {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(SledDatabase { db })
    }
}

impl Database for SledDatabase {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self.db.get(key)? {
            Some(value) => Ok(value.to_vec()),
            None => Err(NodeError::NotFound(format!(
                "key {}",
                HEXLOWER.encode(key)
            ))),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    fn new_batch(&self) -> Box<dyn Batch> {
        Box::new(SledBatch {
            db: self.db.clone(),
            batch: sled::Batch::default(),
            len: 0,
        })
    }
}

struct SledBatch {
    db: sled::Db,
    batch: sled::Batch,
    len: usize,
}

impl Batch for SledBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.batch.insert(key, value);
        self.len += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.batch.remove(key);
        self.len += 1;
    }

    fn write(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.batch);
        self.len = 0;
        self.db.apply_batch(batch)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.batch = sled::Batch::default();
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Address, Hash};
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, SledDatabase) {
        let dir = tempdir().unwrap();
        let db = SledDatabase::open(dir.path().join("db")).unwrap();
        (dir, db)
    }

    #[test]
    fn get_put_delete_has() {
        let (_dir, db) = open_temp();

        assert!(matches!(db.get(b"missing"), Err(NodeError::NotFound(_))));
        assert!(!db.has(b"missing").unwrap());

        db.put(b"alpha", b"one").unwrap();
        assert_eq!(db.get(b"alpha").unwrap(), b"one");
        assert!(db.has(b"alpha").unwrap());

        db.delete(b"alpha").unwrap();
        assert!(matches!(db.get(b"alpha"), Err(NodeError::NotFound(_))));
    }

    #[test]
    fn batch_commits_atomically() {
        let (_dir, db) = open_temp();
        db.put(b"stale", b"value").unwrap();

        let mut batch = db.new_batch();
        batch.put(b"one", b"1");
        batch.put(b"two", b"2");
        batch.delete(b"stale");
        assert_eq!(batch.len(), 3);

        // Nothing lands before write
        assert!(!db.has(b"one").unwrap());

        batch.write().unwrap();
        assert_eq!(db.get(b"one").unwrap(), b"1");
        assert_eq!(db.get(b"two").unwrap(), b"2");
        assert!(!db.has(b"stale").unwrap());
        assert!(batch.is_empty());
    }

    #[test]
    fn batch_reset_discards_pending_writes() {
        let (_dir, db) = open_temp();

        let mut batch = db.new_batch();
        batch.put(b"ghost", b"1");
        batch.reset();
        batch.write().unwrap();

        assert!(!db.has(b"ghost").unwrap());
    }

    #[test]
    fn namespaced_keys_have_expected_layout() {
        let hash = Hash::from_slice(&[0x11; 32]);
        let addr = Address::from_slice(&[0x22; 20]);

        assert!(keys::block(&hash).starts_with(b"block-"));
        assert_eq!(keys::block(&hash).len(), 6 + 32);
        assert_eq!(keys::block_number(0), b"block-number-");
        assert_eq!(keys::block_number(1), b"block-number-\x01");
        assert_eq!(
            keys::block_number(0x0102),
            [b"block-number-".as_slice(), [0x01, 0x02].as_slice()].concat()
        );
        assert_eq!(keys::account(&addr).len(), 8 + 20);
        assert_eq!(keys::storage(&addr, &hash).len(), 8 + 20 + 32);
    }
}
