//! Database persistence layer for ledgerline
//!
//! Chains are stored in an ordered key-value namespace. Each account has one
//! aggregate record under its public key and one record per block under
//! `pk_<timestamp>_<sequence>`, so a prefix scan replays the chain in append
//! order. The sentinel block is never stored; it is synthesized on load.

use crate::blockchain::{AccountRecord, Block, Chain};
use crate::error::{ChainError, Result};
use parking_lot::RwLock;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const DEFAULT_NAMESPACE: &str = "ledgerline";

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered key-value storage shared by the whole process.
pub trait KvStore: Send + Sync {
    fn put(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<()>;
    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Every entry whose key starts with `prefix`, in ascending key order.
    fn scan(&self, ns: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    fn delete(&self, ns: &str, key: &[u8]) -> Result<()>;
    /// Applies every operation or none of them.
    fn write_batch(&self, ns: &str, ops: Vec<BatchOp>) -> Result<()>;

    fn put_batch(&self, ns: &str, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        let ops = entries
            .into_iter()
            .map(|(key, value)| BatchOp::Put(key, value))
            .collect();
        self.write_batch(ns, ops)
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::StorageFailure(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ChainError::StorageFailure(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                ns TEXT NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (ns, key)
            )",
            [],
        )
        .map_err(|e| ChainError::StorageFailure(format!("Failed to create kv table: {}", e)))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChainError::StorageFailure("Mutex poisoned".to_string()))
    }
}

impl KvStore for Database {
    fn put(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (ns, key, value) VALUES (?1, ?2, ?3)",
            params![ns, key, value],
        )?;
        Ok(())
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE ns = ?1 AND key = ?2")?;
        let mut rows = stmt.query(params![ns, key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, ns: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv
             WHERE ns = ?1 AND substr(key, 1, length(?2)) = ?2
             ORDER BY key ASC",
        )?;
        let rows = stmt.query_map(params![ns, prefix], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn delete(&self, ns: &str, key: &[u8]) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE ns = ?1 AND key = ?2", params![ns, key])?;
        Ok(())
    }

    fn write_batch(&self, ns: &str, ops: Vec<BatchOp>) -> Result<()> {
        let conn_guard = self.lock()?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::StorageFailure(format!("Failed to start transaction: {}", e))
        })?;

        for op in &ops {
            match op {
                BatchOp::Put(key, value) => tx.execute(
                    "INSERT OR REPLACE INTO kv (ns, key, value) VALUES (?1, ?2, ?3)",
                    params![ns, key, value],
                )?,
                BatchOp::Delete(key) => {
                    tx.execute("DELETE FROM kv WHERE ns = ?1 AND key = ?2", params![ns, key])?
                }
            };
        }

        tx.commit().map_err(|e| {
            ChainError::StorageFailure(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(())
    }
}

/// Ordered in-memory store for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<BTreeMap<(String, Vec<u8>), Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryStore {
    fn put(&self, ns: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert((ns.to_string(), key.to_vec()), value.to_vec());
        Ok(())
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .read()
            .get(&(ns.to_string(), key.to_vec()))
            .cloned())
    }

    fn scan(&self, ns: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read();
        Ok(entries
            .range((ns.to_string(), prefix.to_vec())..)
            .take_while(|((entry_ns, key), _)| entry_ns == ns && key.starts_with(prefix))
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn delete(&self, ns: &str, key: &[u8]) -> Result<()> {
        self.entries.write().remove(&(ns.to_string(), key.to_vec()));
        Ok(())
    }

    fn write_batch(&self, ns: &str, ops: Vec<BatchOp>) -> Result<()> {
        let mut entries = self.entries.write();
        for op in ops {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert((ns.to_string(), key), value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&(ns.to_string(), key));
                }
            }
        }
        Ok(())
    }
}

fn block_prefix(pk: &[u8]) -> Vec<u8> {
    let mut key = pk.to_vec();
    key.push(b'_');
    key
}

/// `pk_<timestamp>_<sequence>`, both zero-padded so byte order is numeric order.
pub fn block_key(pk: &[u8], timestamp: u32, sequence: usize) -> Vec<u8> {
    let mut key = block_prefix(pk);
    key.extend_from_slice(format!("{:010}_{:010}", timestamp, sequence).as_bytes());
    key
}

/// Maps per-account chains onto a [`KvStore`] namespace.
#[derive(Clone)]
pub struct ChainStore {
    store: Arc<dyn KvStore>,
    namespace: String,
}

impl ChainStore {
    pub fn new(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn load_record(&self, pk: &[u8]) -> Result<Option<AccountRecord>> {
        self.store
            .get(&self.namespace, pk)?
            .map(|bytes| AccountRecord::decode(&bytes))
            .transpose()
    }

    /// Rebuilds the account's chain from its block log. Balance and head are
    /// derived from the blocks; nothing is written.
    pub fn load_chain(&self, pk: &[u8]) -> Result<Chain> {
        let mut blocks = Vec::new();
        for (key, value) in self.store.scan(&self.namespace, &block_prefix(pk))? {
            let block = Block::decode(&value).map_err(|e| {
                ChainError::StorageFailure(format!(
                    "stored block {} is corrupt: {}",
                    String::from_utf8_lossy(&key),
                    e
                ))
            })?;
            blocks.push(block);
        }

        Chain::from_blocks(pk.to_vec(), blocks)
    }

    /// Whether the aggregate record of `chain.owner` differs from the values
    /// derived from `chain`.
    pub fn record_is_stale(&self, chain: &Chain) -> Result<bool> {
        Ok(match self.load_record(&chain.owner)? {
            Some(record) => record != AccountRecord::from_chain(chain),
            None => chain.len() > 1,
        })
    }

    /// Rewrites a stale aggregate record from `chain`. The caller must hold
    /// the account's lock and `chain` must have been loaded under it.
    pub fn repair_record(&self, chain: &Chain) -> Result<bool> {
        if !self.record_is_stale(chain)? {
            return Ok(false);
        }
        let derived = AccountRecord::from_chain(chain);
        tracing::warn!(
            account = %String::from_utf8_lossy(&chain.owner),
            derived_balance = derived.balance,
            "aggregate record disagrees with block log, rewriting"
        );
        self.store.put(&self.namespace, &chain.owner, &derived.encode()?)?;
        Ok(true)
    }

    /// Persists `block` and the updated aggregate record in one batch, then
    /// appends it to `chain`. On a storage error `chain` is left untouched.
    pub fn commit(&self, chain: &mut Chain, block: Block) -> Result<()> {
        let balance = chain.balance.checked_add(block.delta()?).ok_or_else(|| {
            ChainError::MalformedInput("block would overflow the account balance".to_string())
        })?;
        let record = AccountRecord {
            balance,
            latest_hash: block.hash()?,
        };

        let key = block_key(&chain.owner, block.header.timestamp, chain.len());
        self.store.put_batch(
            &self.namespace,
            vec![
                (key, block.encode()?),
                (chain.owner.clone(), record.encode()?),
            ],
        )?;

        chain.append(block)?;
        tracing::debug!(
            account = %String::from_utf8_lossy(&chain.owner),
            length = chain.len(),
            balance = chain.balance,
            "block committed"
        );
        Ok(())
    }

    /// Substitutes the stored chain of `chain.owner` with `chain`.
    pub fn replace_chain(&self, chain: &Chain) -> Result<()> {
        let mut ops: Vec<BatchOp> = self
            .store
            .scan(&self.namespace, &block_prefix(&chain.owner))?
            .into_iter()
            .map(|(key, _)| BatchOp::Delete(key))
            .collect();

        for (sequence, block) in chain.blocks.iter().enumerate().skip(1) {
            ops.push(BatchOp::Put(
                block_key(&chain.owner, block.header.timestamp, sequence),
                block.encode()?,
            ));
        }
        ops.push(BatchOp::Put(
            chain.owner.clone(),
            AccountRecord::from_chain(chain).encode()?,
        ));

        self.store.write_batch(&self.namespace, ops)?;
        tracing::info!(
            account = %String::from_utf8_lossy(&chain.owner),
            length = chain.len(),
            "chain replaced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;

    fn block_with(amount: i64, timestamp: u32, prev: [u8; 32]) -> Block {
        let mut block = Block::new(b"origin".to_vec(), prev, timestamp);
        block.add_transaction(Transaction::new(b"a".to_vec(), b"b".to_vec(), amount, Vec::new()).unwrap());
        block
    }

    fn stores() -> Vec<Arc<dyn KvStore>> {
        vec![
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(InMemoryStore::new()),
        ]
    }

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
    }

    #[test]
    fn test_scan_is_ordered_and_namespaced() {
        for store in stores() {
            store.put("ns", b"k_2", b"two").unwrap();
            store.put("ns", b"k_1", b"one").unwrap();
            store.put("ns", b"k", b"aggregate").unwrap();
            store.put("ns", b"l_0", b"other").unwrap();
            store.put("other", b"k_0", b"hidden").unwrap();

            let keys: Vec<Vec<u8>> = store.scan("ns", b"k_").unwrap().into_iter().map(|(k, _)| k).collect();
            assert_eq!(keys, vec![b"k_1".to_vec(), b"k_2".to_vec()]);
            assert_eq!(store.get("ns", b"k").unwrap(), Some(b"aggregate".to_vec()));
            assert_eq!(store.get("ns", b"missing").unwrap(), None);

            store.delete("ns", b"k_1").unwrap();
            assert_eq!(store.scan("ns", b"k_").unwrap().len(), 1);
        }
    }

    #[test]
    fn test_write_batch_mixes_puts_and_deletes() {
        for store in stores() {
            store.put("ns", b"old", b"x").unwrap();
            store
                .write_batch(
                    "ns",
                    vec![
                        BatchOp::Delete(b"old".to_vec()),
                        BatchOp::Put(b"new".to_vec(), b"y".to_vec()),
                    ],
                )
                .unwrap();
            assert_eq!(store.get("ns", b"old").unwrap(), None);
            assert_eq!(store.get("ns", b"new").unwrap(), Some(b"y".to_vec()));
        }
    }

    #[test]
    fn test_block_keys_sort_numerically() {
        assert!(block_key(b"pk", 9, 1) < block_key(b"pk", 10, 2));
        assert!(block_key(b"pk", 10, 2) < block_key(b"pk", 10, 3));
        assert_eq!(block_key(b"pk", 7, 1), b"pk_0000000007_0000000001".to_vec());
    }

    #[test]
    fn test_empty_account_loads_sentinel_only() {
        for store in stores() {
            let chains = ChainStore::new(store, DEFAULT_NAMESPACE);
            let chain = chains.load_chain(b"nobody").unwrap();
            assert_eq!(chain.len(), 1);
            assert_eq!(chain.balance, 0);
            assert!(chains.load_record(b"nobody").unwrap().is_none());
        }
    }

    #[test]
    fn test_commits_replay_in_order_with_summed_balance() {
        for store in stores() {
            let chains = ChainStore::new(store, DEFAULT_NAMESPACE);
            let mut chain = chains.load_chain(b"acct").unwrap();
            // Two blocks share a timestamp.
            for (amount, ts) in [(5, 100), (-2, 100), (10, 101)] {
                let block = block_with(amount, ts, chain.latest_hash);
                chains.commit(&mut chain, block).unwrap();
            }

            let loaded = chains.load_chain(b"acct").unwrap();
            assert_eq!(loaded, chain);
            assert_eq!(loaded.len(), 4);
            assert_eq!(loaded.balance, 13);
            let stamps: Vec<u32> = loaded.blocks.iter().map(|b| b.header.timestamp).collect();
            assert_eq!(stamps, vec![0, 100, 100, 101]);

            let record = chains.load_record(b"acct").unwrap().unwrap();
            assert_eq!(record.balance, 13);
            assert_eq!(record.latest_hash, loaded.latest_hash);
        }
    }

    #[test]
    fn test_stale_aggregate_is_repaired_only_on_request() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let chains = ChainStore::new(store.clone(), "test");
        let mut chain = chains.load_chain(b"acct").unwrap();
        let block = block_with(4, 1, chain.latest_hash);
        chains.commit(&mut chain, block).unwrap();

        let bogus = AccountRecord {
            balance: 999,
            latest_hash: [0u8; 32],
        };
        store.put("test", b"acct", &bogus.encode().unwrap()).unwrap();

        let loaded = chains.load_chain(b"acct").unwrap();
        assert_eq!(loaded.balance, 4);
        assert_eq!(chains.load_record(b"acct").unwrap(), Some(bogus));
        assert!(chains.record_is_stale(&loaded).unwrap());

        assert!(chains.repair_record(&loaded).unwrap());
        assert_eq!(chains.load_record(b"acct").unwrap().unwrap().balance, 4);
        assert!(!chains.repair_record(&loaded).unwrap());
    }

    #[test]
    fn test_load_after_a_concurrent_commit_keeps_the_newer_record() {
        let chains = ChainStore::new(Arc::new(InMemoryStore::new()), "test");
        let mut writer = chains.load_chain(b"acct").unwrap();
        let block = block_with(2, 1, writer.latest_hash);
        chains.commit(&mut writer, block).unwrap();

        // A reader's block scan lands before the writer's next commit.
        let snapshot = chains.load_chain(b"acct").unwrap();
        let block = block_with(3, 2, writer.latest_hash);
        chains.commit(&mut writer, block).unwrap();
        let reread = chains.load_chain(b"acct").unwrap();

        assert_eq!(snapshot.balance, 2);
        assert_eq!(reread.balance, 5);
        let record = chains.load_record(b"acct").unwrap().unwrap();
        assert_eq!(record.balance, 5);
        assert_eq!(record.latest_hash, writer.latest_hash);
    }

    #[test]
    fn test_corrupt_block_is_storage_failure() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        store.put("test", &block_key(b"acct", 1, 1), b"junk").unwrap();
        let chains = ChainStore::new(store, "test");
        assert!(matches!(
            chains.load_chain(b"acct"),
            Err(ChainError::StorageFailure(_))
        ));
    }

    #[test]
    fn test_replace_chain_substitutes_blocks() {
        for store in stores() {
            let chains = ChainStore::new(store, DEFAULT_NAMESPACE);
            let mut chain = chains.load_chain(b"acct").unwrap();
            for ts in 1..=3 {
                let block = block_with(1, ts, chain.latest_hash);
                chains.commit(&mut chain, block).unwrap();
            }

            let replacement = Chain::from_blocks(
                b"acct".to_vec(),
                vec![block_with(50, 7, [0u8; 32]), block_with(-8, 9, [1u8; 32])],
            )
            .unwrap();
            chains.replace_chain(&replacement).unwrap();

            let loaded = chains.load_chain(b"acct").unwrap();
            assert_eq!(loaded, replacement);
            assert_eq!(loaded.len(), 3);
            assert_eq!(loaded.balance, 42);
        }
    }

    #[test]
    fn test_accounts_do_not_leak_into_each_other() {
        let chains = ChainStore::new(Arc::new(InMemoryStore::new()), DEFAULT_NAMESPACE);
        let mut a = chains.load_chain(b"a").unwrap();
        let block = block_with(3, 1, a.latest_hash);
        chains.commit(&mut a, block).unwrap();
        let b = chains.load_chain(b"b").unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(chains.load_chain(b"a").unwrap().len(), 2);
    }
}
