use crate::ledger::LedgerState;
use anyhow::Result;
use rocksdb::{IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};

/// Ledger storage layer using RocksDB
pub struct LedgerStorage {
    db: DB,
}

impl LedgerStorage {
    /// Create a new storage instance
    pub fn new(path: &str) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    /// Store a full ledger checkpoint at a block height
    pub fn store_checkpoint(&self, block: u64, state: &LedgerState) -> Result<()> {
        let key = format!("checkpoint:{:020}", block);
        let value = serde_json::to_vec(state)?;
        self.db.put(key.as_bytes(), value)?;

        let metadata = CheckpointMetadata {
            block,
            market_count: state.markets.len(),
        };
        let meta_key = format!("checkpoint_meta:{:020}", block);
        self.db.put(meta_key.as_bytes(), serde_json::to_vec(&metadata)?)?;
        Ok(())
    }

    /// Load the checkpoint at a specific block height
    pub fn load_checkpoint(&self, block: u64) -> Result<Option<LedgerState>> {
        let key = format!("checkpoint:{:020}", block);
        match self.db.get(key.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Load the checkpoint with the highest block height
    pub fn load_latest_checkpoint(&self) -> Result<Option<(u64, LedgerState)>> {
        let mut latest: Option<(u64, LedgerState)> = None;

        let iter = self.db.iterator(IteratorMode::Start);
        for item in iter {
            let (key, value) = item?;
            let key_str = String::from_utf8_lossy(&key);

            if let Some(block_str) = key_str.strip_prefix("checkpoint:") {
                let block: u64 = block_str.parse()?;
                if latest.as_ref().map_or(true, |(b, _)| block > *b) {
                    let state: LedgerState = serde_json::from_slice(&value)?;
                    latest = Some((block, state));
                }
            }
        }

        Ok(latest)
    }

    /// List metadata for all stored checkpoints, ascending by height
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointMetadata>> {
        let mut checkpoints = Vec::new();

        let iter = self.db.iterator(IteratorMode::Start);
        for item in iter {
            let (key, value) = item?;
            let key_str = String::from_utf8_lossy(&key);

            if key_str.starts_with("checkpoint_meta:") {
                let metadata: CheckpointMetadata = serde_json::from_slice(&value)?;
                checkpoints.push(metadata);
            }
        }

        checkpoints.sort_by_key(|m| m.block);
        Ok(checkpoints)
    }

    /// Delete a checkpoint (pruning)
    pub fn delete_checkpoint(&self, block: u64) -> Result<()> {
        let key = format!("checkpoint:{:020}", block);
        self.db.delete(key.as_bytes())?;
        let meta_key = format!("checkpoint_meta:{:020}", block);
        self.db.delete(meta_key.as_bytes())?;
        Ok(())
    }

    /// Get reference to the underlying DB (for advanced operations)
    pub fn db(&self) -> &DB {
        &self.db
    }
}

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub block: u64,
    pub market_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerConfig, PositionLedger};
    use crate::pool::InMemoryPool;
    use crate::types::{MarketId, Side};
    use alloy_primitives::{Address, U256};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db_path() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
        format!("/tmp/peermatch_test_storage_{}_{}", timestamp, counter)
    }

    fn populated_state() -> LedgerState {
        let mut ledger = PositionLedger::new(LedgerConfig::default());
        ledger.list_market(Address::ZERO, MarketId(1), 0).unwrap();

        let mut pool = InMemoryPool::new();
        pool.add_market(MarketId(1));
        ledger
            .supply(Address::from([1u8; 20]), MarketId(1), U256::from(100), &mut pool, 1)
            .unwrap();

        ledger.snapshot()
    }

    #[test]
    fn test_create_storage() {
        let path = temp_db_path();
        let storage = LedgerStorage::new(&path);
        assert!(storage.is_ok());

        // Cleanup
        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let path = temp_db_path();
        let storage = LedgerStorage::new(&path).unwrap();
        let state = populated_state();

        storage.store_checkpoint(100, &state).unwrap();
        let loaded = storage.load_checkpoint(100).unwrap().unwrap();

        // Restore into a fresh ledger and check positions survived
        let mut ledger = PositionLedger::new(LedgerConfig::default());
        ledger.restore(loaded);
        let pos = ledger
            .position_of(&Address::from([1u8; 20]), MarketId(1), Side::Supply)
            .unwrap();
        assert_eq!(pos.on_pool, U256::from(100));

        // Cleanup
        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn test_load_missing_checkpoint() {
        let path = temp_db_path();
        let storage = LedgerStorage::new(&path).unwrap();

        assert!(storage.load_checkpoint(42).unwrap().is_none());
        assert!(storage.load_latest_checkpoint().unwrap().is_none());

        // Cleanup
        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn test_load_latest_checkpoint() {
        let path = temp_db_path();
        let storage = LedgerStorage::new(&path).unwrap();
        let state = populated_state();

        for block in [100, 200, 150] {
            storage.store_checkpoint(block, &state).unwrap();
        }

        let (block, _) = storage.load_latest_checkpoint().unwrap().unwrap();
        assert_eq!(block, 200);

        // Cleanup
        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn test_list_and_delete_checkpoints() {
        let path = temp_db_path();
        let storage = LedgerStorage::new(&path).unwrap();
        let state = populated_state();

        storage.store_checkpoint(10, &state).unwrap();
        storage.store_checkpoint(20, &state).unwrap();

        let listed = storage.list_checkpoints().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].block, 10);
        assert_eq!(listed[1].block, 20);
        assert_eq!(listed[0].market_count, 1);

        storage.delete_checkpoint(10).unwrap();
        let listed = storage.list_checkpoints().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].block, 20);

        // Cleanup
        let _ = std::fs::remove_dir_all(path);
    }
}
