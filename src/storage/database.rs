use crate::{LedgerError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

// Database tree names (equivalent to column families)
pub const TREE_BLOCKS: &str = "blocks";
pub const TREE_BLOCK_HASHES: &str = "block_hashes";
pub const TREE_CHAIN_META: &str = "chain_meta";
pub const TREE_UNSPENT_POOL: &str = "unspent_pool";
pub const TREE_UNSPENT_ADDRESS_INDEX: &str = "unspent_address_index";
pub const TREE_UNCONFIRMED_TXNS: &str = "unconfirmed_txns";
pub const TREE_HISTORY_TXNS: &str = "history_txns";
pub const TREE_HISTORY_OUTPUTS: &str = "history_outputs";
pub const TREE_HISTORY_ADDRESS_OUTPUTS: &str = "history_address_outputs";
pub const TREE_HISTORY_ADDRESS_TXNS: &str = "history_address_txns";
pub const TREE_HISTORY_ADDRESS_SEEN: &str = "history_address_seen";
pub const TREE_HISTORY_META: &str = "history_meta";

pub const ALL_TREES: &[&str] = &[
    TREE_BLOCKS,
    TREE_BLOCK_HASHES,
    TREE_CHAIN_META,
    TREE_UNSPENT_POOL,
    TREE_UNSPENT_ADDRESS_INDEX,
    TREE_UNCONFIRMED_TXNS,
    TREE_HISTORY_TXNS,
    TREE_HISTORY_OUTPUTS,
    TREE_HISTORY_ADDRESS_OUTPUTS,
    TREE_HISTORY_ADDRESS_TXNS,
    TREE_HISTORY_ADDRESS_SEEN,
    TREE_HISTORY_META,
];

pub type KvPairs = Vec<(Vec<u8>, Vec<u8>)>;

/// Read access shared by read-only and read-write transactions.
pub trait Tx {
    fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, tree: &str, prefix: &[u8]) -> Result<KvPairs>;

    fn len(&self, tree: &str) -> Result<usize>;

    fn contains_key(&self, tree: &str, key: &[u8]) -> Result<bool> {
        Ok(self.get(tree, key)?.is_some())
    }

    fn is_empty(&self, tree: &str) -> Result<bool> {
        Ok(self.len(tree)? == 0)
    }
}

/// Typed helpers over any [`Tx`], values encoded with bincode.
pub trait TxExt: Tx {
    fn get_value<T: DeserializeOwned>(&self, tree: &str, key: &[u8]) -> Result<Option<T>> {
        match self.get(tree, key)? {
            Some(data) => Ok(Some(decode(tree, &data)?)),
            None => Ok(None),
        }
    }

    fn scan_values<T: DeserializeOwned>(&self, tree: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>> {
        self.scan_prefix(tree, prefix)?
            .into_iter()
            .map(|(key, data)| Ok((key, decode(tree, &data)?)))
            .collect()
    }

    fn all_values<T: DeserializeOwned>(&self, tree: &str) -> Result<Vec<T>> {
        Ok(self.scan_values(tree, &[])?.into_iter().map(|(_, v)| v).collect())
    }
}

impl<X: Tx + ?Sized> TxExt for X {}

pub fn encode<T: Serialize>(tree: &str, value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| LedgerError::Storage(format!("Failed to serialize value for {}: {}", tree, e)))
}

pub fn decode<T: DeserializeOwned>(tree: &str, data: &[u8]) -> Result<T> {
    bincode::deserialize(data)
        .map_err(|e| LedgerError::Storage(format!("Failed to deserialize value from {}: {}", tree, e)))
}

/// Transactional key-value store over sled.
///
/// One writer at a time; a [`WriteTxn`] buffers its mutations and applies
/// them atomically on commit. Readers never observe a partially applied
/// commit because commits take `commit_lock` exclusively.
pub struct Database {
    db: Db,
    trees: HashMap<&'static str, Tree>,
    writer: Mutex<()>,
    commit_lock: RwLock<()>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| LedgerError::Storage(format!("Failed to open database: {}", e)))?;

        let mut trees = HashMap::with_capacity(ALL_TREES.len());
        for name in ALL_TREES {
            let tree = db
                .open_tree(name)
                .map_err(|e| LedgerError::Storage(format!("Failed to open tree {}: {}", name, e)))?;
            trees.insert(*name, tree);
        }

        Ok(Self {
            db,
            trees,
            writer: Mutex::new(()),
            commit_lock: RwLock::new(()),
        })
    }

    fn tree(&self, name: &str) -> Result<&Tree> {
        self.trees
            .get(name)
            .ok_or_else(|| LedgerError::Storage(format!("Unknown tree {}", name)))
    }

    /// Starts a read-only transaction.
    pub fn read(&self) -> Result<ReadTxn<'_>> {
        let guard = self
            .commit_lock
            .read()
            .map_err(|_| LedgerError::Storage("Commit lock poisoned".to_string()))?;
        Ok(ReadTxn { db: self, _guard: guard })
    }

    /// Starts a read-write transaction, blocking while another one is open.
    pub fn write(&self) -> Result<WriteTxn<'_>> {
        let guard = self
            .writer
            .lock()
            .map_err(|_| LedgerError::Storage("Writer lock poisoned".to_string()))?;
        Ok(WriteTxn {
            db: self,
            _writer: guard,
            pending: HashMap::new(),
            committed: false,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn base_get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.tree(tree)?.get(key)?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn base_scan(&self, tree: &str, prefix: &[u8]) -> Result<KvPairs> {
        let mut pairs = Vec::new();
        for item in self.tree(tree)?.scan_prefix(prefix) {
            let (key, value) = item?;
            pairs.push((key.to_vec(), value.to_vec()));
        }
        Ok(pairs)
    }

    fn base_len(&self, tree: &str) -> Result<usize> {
        Ok(self.tree(tree)?.len())
    }
}

pub struct ReadTxn<'a> {
    db: &'a Database,
    _guard: RwLockReadGuard<'a, ()>,
}

impl Tx for ReadTxn<'_> {
    fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.base_get(tree, key)
    }

    fn scan_prefix(&self, tree: &str, prefix: &[u8]) -> Result<KvPairs> {
        self.db.base_scan(tree, prefix)
    }

    fn len(&self, tree: &str) -> Result<usize> {
        self.db.base_len(tree)
    }
}

#[derive(Default)]
struct PendingTree {
    cleared: bool,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

/// Read-write transaction. Dropping it without [`WriteTxn::commit`] discards
/// every buffered mutation.
pub struct WriteTxn<'a> {
    db: &'a Database,
    _writer: MutexGuard<'a, ()>,
    pending: HashMap<String, PendingTree>,
    committed: bool,
}

impl WriteTxn<'_> {
    fn pending_mut(&mut self, tree: &str) -> Result<&mut PendingTree> {
        self.db.tree(tree)?;
        Ok(self.pending.entry(tree.to_string()).or_default())
    }

    pub fn insert(&mut self, tree: &str, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.pending_mut(tree)?.writes.insert(key.to_vec(), Some(value));
        Ok(())
    }

    pub fn remove(&mut self, tree: &str, key: &[u8]) -> Result<()> {
        self.pending_mut(tree)?.writes.insert(key.to_vec(), None);
        Ok(())
    }

    /// Removes every key of `tree`.
    pub fn clear(&mut self, tree: &str) -> Result<()> {
        let pending = self.pending_mut(tree)?;
        pending.cleared = true;
        pending.writes.clear();
        Ok(())
    }

    pub fn put_value<T: Serialize>(&mut self, tree: &str, key: &[u8], value: &T) -> Result<()> {
        let data = encode(tree, value)?;
        self.insert(tree, key, data)
    }

    /// Applies all buffered mutations atomically across trees.
    pub fn commit(mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.committed = true;
        if pending.is_empty() {
            return Ok(());
        }

        let _exclusive = self
            .db
            .commit_lock
            .write()
            .map_err(|_| LedgerError::Storage("Commit lock poisoned".to_string()))?;

        let mut trees = Vec::with_capacity(pending.len());
        let mut batches = Vec::with_capacity(pending.len());
        for (name, changes) in &pending {
            let mut batch = Batch::default();
            if changes.cleared {
                for (key, _) in self.db.base_scan(name, &[])? {
                    if !changes.writes.contains_key(&key) {
                        batch.remove(key);
                    }
                }
            }
            for (key, value) in &changes.writes {
                match value {
                    Some(v) => batch.insert(key.as_slice(), v.as_slice()),
                    None => batch.remove(key.as_slice()),
                }
            }
            trees.push(self.db.tree(name)?.clone());
            batches.push(batch);
        }

        let result: std::result::Result<(), TransactionError<()>> =
            trees.as_slice().transaction(|views| {
                for (view, batch) in views.iter().zip(batches.iter()) {
                    view.apply_batch(batch)?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            });

        match result {
            Ok(()) => {}
            Err(TransactionError::Storage(e)) => return Err(e.into()),
            Err(TransactionError::Abort(())) => {
                return Err(LedgerError::Storage("Commit transaction aborted".to_string()))
            }
        }

        log::debug!("💾 Committed changes to {} trees", pending.len());
        Ok(())
    }
}

impl Tx for WriteTxn<'_> {
    fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(tree) {
            if let Some(value) = pending.writes.get(key) {
                return Ok(value.clone());
            }
            if pending.cleared {
                return Ok(None);
            }
        }
        self.db.base_get(tree, key)
    }

    fn scan_prefix(&self, tree: &str, prefix: &[u8]) -> Result<KvPairs> {
        let pending = match self.pending.get(tree) {
            Some(p) => p,
            None => return self.db.base_scan(tree, prefix),
        };

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = if pending.cleared {
            BTreeMap::new()
        } else {
            self.db.base_scan(tree, prefix)?.into_iter().collect()
        };

        let range = pending
            .writes
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));
        for (key, value) in range {
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    fn len(&self, tree: &str) -> Result<usize> {
        let pending = match self.pending.get(tree) {
            Some(p) => p,
            None => return self.db.base_len(tree),
        };

        if pending.cleared {
            return Ok(pending.writes.values().filter(|v| v.is_some()).count());
        }

        let mut count = self.db.base_len(tree)?;
        for (key, value) in &pending.writes {
            let in_base = self.db.base_get(tree, key)?.is_some();
            match (in_base, value.is_some()) {
                (false, true) => count += 1,
                (true, false) => count -= 1,
                _ => {}
            }
        }
        Ok(count)
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.pending.is_empty() {
            log::debug!("↩️ Rolled back uncommitted changes to {} trees", self.pending.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> Result<(TempDir, Database)> {
        let temp_dir = TempDir::new()?;
        let db = Database::new(temp_dir.path().join("test.db"))?;
        Ok((temp_dir, db))
    }

    #[test]
    fn test_commit_applies_all_trees() -> Result<()> {
        let (_dir, db) = open()?;

        let mut tx = db.write()?;
        tx.insert(TREE_BLOCKS, b"a", b"1".to_vec())?;
        tx.put_value(TREE_CHAIN_META, b"head", &7u64)?;
        assert_eq!(tx.get(TREE_BLOCKS, b"a")?, Some(b"1".to_vec()));
        tx.commit()?;

        let read = db.read()?;
        assert_eq!(read.get(TREE_BLOCKS, b"a")?, Some(b"1".to_vec()));
        assert_eq!(read.get_value::<u64>(TREE_CHAIN_META, b"head")?, Some(7));
        Ok(())
    }

    #[test]
    fn test_sled_errors_surface_as_database_errors() -> Result<()> {
        let (_dir, db) = open()?;
        db.flush()?;

        let fail = || -> Result<()> {
            Err(sled::Error::Unsupported("stale format".to_string()))?;
            Ok(())
        };
        let err = fail().unwrap_err();
        assert!(matches!(err, LedgerError::Database(_)));
        assert!(!err.is_constraint_violation());
        Ok(())
    }

    #[test]
    fn test_drop_rolls_back() -> Result<()> {
        let (_dir, db) = open()?;

        {
            let mut tx = db.write()?;
            tx.insert(TREE_BLOCKS, b"a", b"1".to_vec())?;
        }

        assert_eq!(db.read()?.get(TREE_BLOCKS, b"a")?, None);
        assert!(db.read()?.is_empty(TREE_BLOCKS)?);
        Ok(())
    }

    #[test]
    fn test_early_error_rolls_back() -> Result<()> {
        let (_dir, db) = open()?;

        fn apply(db: &Database, fail: bool) -> Result<()> {
            let mut tx = db.write()?;
            tx.insert(TREE_BLOCKS, b"a", b"1".to_vec())?;
            tx.remove(TREE_BLOCKS, b"missing")?;
            if fail {
                return Err(LedgerError::Blockchain("boom".to_string()));
            }
            tx.commit()
        }

        assert!(apply(&db, true).is_err());
        assert_eq!(db.read()?.get(TREE_BLOCKS, b"a")?, None);

        apply(&db, false)?;
        assert_eq!(db.read()?.get(TREE_BLOCKS, b"a")?, Some(b"1".to_vec()));
        Ok(())
    }

    #[test]
    fn test_scan_merges_pending_writes() -> Result<()> {
        let (_dir, db) = open()?;

        let mut tx = db.write()?;
        tx.insert(TREE_UNSPENT_ADDRESS_INDEX, b"aa1", vec![])?;
        tx.insert(TREE_UNSPENT_ADDRESS_INDEX, b"aa2", vec![])?;
        tx.insert(TREE_UNSPENT_ADDRESS_INDEX, b"ab1", vec![])?;
        tx.commit()?;

        let mut tx = db.write()?;
        tx.remove(TREE_UNSPENT_ADDRESS_INDEX, b"aa1")?;
        tx.insert(TREE_UNSPENT_ADDRESS_INDEX, b"aa3", vec![])?;
        tx.insert(TREE_UNSPENT_ADDRESS_INDEX, b"b", vec![])?;

        let keys: Vec<Vec<u8>> = tx
            .scan_prefix(TREE_UNSPENT_ADDRESS_INDEX, b"aa")?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"aa2".to_vec(), b"aa3".to_vec()]);
        assert_eq!(tx.len(TREE_UNSPENT_ADDRESS_INDEX)?, 4);

        // Still unchanged for readers until commit
        drop(tx);
        assert_eq!(db.read()?.len(TREE_UNSPENT_ADDRESS_INDEX)?, 3);
        Ok(())
    }

    #[test]
    fn test_clear_then_write() -> Result<()> {
        let (_dir, db) = open()?;

        let mut tx = db.write()?;
        tx.insert(TREE_HISTORY_TXNS, b"x", vec![1])?;
        tx.insert(TREE_HISTORY_TXNS, b"y", vec![2])?;
        tx.commit()?;

        let mut tx = db.write()?;
        tx.clear(TREE_HISTORY_TXNS)?;
        assert_eq!(tx.get(TREE_HISTORY_TXNS, b"x")?, None);
        tx.insert(TREE_HISTORY_TXNS, b"z", vec![3])?;
        assert_eq!(tx.len(TREE_HISTORY_TXNS)?, 1);
        tx.commit()?;

        let read = db.read()?;
        assert_eq!(read.scan_prefix(TREE_HISTORY_TXNS, &[])?, vec![(b"z".to_vec(), vec![3])]);
        Ok(())
    }

    #[test]
    fn test_unknown_tree_is_an_error() -> Result<()> {
        let (_dir, db) = open()?;
        let mut tx = db.write()?;
        assert!(tx.insert("nope", b"k", vec![]).is_err());
        assert!(db.read()?.get("nope", b"k").is_err());
        Ok(())
    }
}
