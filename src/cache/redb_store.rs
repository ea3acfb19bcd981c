//! Single-file local cache backend using redb

use super::traits::{CacheBackend, CachedEntry};
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const ENTRIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Persistent cache stored in one redb file
pub struct RedbCache {
    db: Database,
}

impl RedbCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {:?}", parent))?;
        }
        let db = Database::create(path).context("Failed to open redb database")?;
        debug!("Opened result cache at {:?}", path);
        Ok(Self { db })
    }

    fn read_entry(&self, key: &str) -> Result<Option<CachedEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(ENTRIES_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(raw) = table.get(key)? else {
            return Ok(None);
        };
        let entry: CachedEntry =
            bitcode::deserialize(raw.value()).context("Corrupted cache entry")?;
        Ok(Some(entry))
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            let mut expired = Vec::new();
            for item in table.iter()? {
                let (key, value) = item?;
                let stale = bitcode::deserialize::<CachedEntry>(value.value())
                    .map(|entry| entry.is_expired())
                    .unwrap_or(true);
                if stale {
                    expired.push(key.value().to_string());
                }
            }
            for key in &expired {
                table.remove(key.as_str())?;
            }
            expired.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

impl CacheBackend for RedbCache {
    fn name(&self) -> &str {
        "redb"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.read_entry(key)? {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.payload)),
            Some(_) => {
                self.delete(key)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let encoded = bitcode::serialize(&CachedEntry::new(value.to_vec(), ttl))?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            table.insert(key, encoded.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            let removed = table.remove(key)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_persists_across_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("cache.redb");
        {
            let cache = RedbCache::open(&path)?;
            assert_eq!(cache.get("missing")?, None);
            cache.set("k", b"payload", None)?;
        }
        let cache = RedbCache::open(&path)?;
        assert_eq!(cache.get("k")?, Some(b"payload".to_vec()));
        assert!(cache.delete("k")?);
        assert!(!cache.exists("k")?);
        Ok(())
    }

    #[test]
    fn test_expired_entries_are_purged() -> Result<()> {
        let dir = tempdir()?;
        let cache = RedbCache::open(&dir.path().join("cache.redb"))?;
        cache.set("old", b"x", Some(Duration::ZERO))?;
        cache.set("new", b"y", Some(Duration::from_secs(3600)))?;
        assert_eq!(cache.purge_expired()?, 1);
        assert_eq!(cache.get("new")?, Some(b"y".to_vec()));
        Ok(())
    }
}
