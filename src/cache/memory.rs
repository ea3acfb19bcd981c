//! Process-local cache backend

use super::traits::{CacheBackend, CachedEntry};
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Thread-safe in-memory cache
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CachedEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheBackend for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.payload.clone())),
            Some(_) => true,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.entries
            .insert(key.to_string(), CachedEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_set_get_delete() -> Result<()> {
        let cache = MemoryCache::new();
        cache.set("k", b"value", None)?;
        assert_eq!(cache.get("k")?, Some(b"value".to_vec()));
        assert!(cache.exists("k")?);
        assert!(cache.delete("k")?);
        assert!(!cache.delete("k")?);
        assert_eq!(cache.get("k")?, None);
        Ok(())
    }

    #[test]
    fn test_zero_ttl_expires_immediately() -> Result<()> {
        let cache = MemoryCache::new();
        cache.set("k", b"value", Some(Duration::ZERO))?;
        assert_eq!(cache.get("k")?, None);
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_streaming_roundtrip() -> Result<()> {
        let cache = MemoryCache::new();
        let mut source: &[u8] = b"streamed payload";
        cache.set_reader("s", &mut source, Some(Duration::from_secs(60)))?;

        let mut out = String::new();
        cache
            .get_reader("s")?
            .expect("entry should exist")
            .read_to_string(&mut out)?;
        assert_eq!(out, "streamed payload");
        Ok(())
    }
}
