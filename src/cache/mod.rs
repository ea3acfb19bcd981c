//! Result cache
//!
//! Finished reports are stored behind the [`CacheBackend`] interface so that a
//! repeated run over an unchanged head is answered without walking history.
//!
//! - `memory` - process-local, backed by `DashMap`
//! - `redb`   - single local file, survives across processes

pub mod memory;
pub mod paths;
pub mod redb_store;
pub mod traits;

pub use memory::MemoryCache;
pub use paths::{default_redb_path, get_cache_dir};
pub use redb_store::RedbCache;
pub use traits::{CacheBackend, CachedEntry};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Configured backend kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    None,
    Memory,
    #[default]
    Redb,
}

/// Open the configured backend; `None` when caching is disabled
pub fn open_backend(kind: CacheKind, path: &Path) -> Result<Option<Box<dyn CacheBackend>>> {
    let backend: Box<dyn CacheBackend> = match kind {
        CacheKind::None => return Ok(None),
        CacheKind::Memory => Box::new(MemoryCache::new()),
        CacheKind::Redb => Box::new(RedbCache::open(path)?),
    };
    Ok(Some(backend))
}

/// Digest identifying one run configuration
#[derive(Default)]
pub struct CacheKey {
    hasher: Sha256,
}

impl CacheKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named component; order matters
    pub fn part(mut self, name: &str, value: &str) -> Self {
        self.hasher.update(name.as_bytes());
        self.hasher.update([0u8]);
        self.hasher.update(value.as_bytes());
        self.hasher.update([0xffu8]);
        self
    }

    pub fn finish(self) -> String {
        self.hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_depends_on_every_part() {
        let a = CacheKey::new().part("head", "abc").part("leaves", "Devs").finish();
        let b = CacheKey::new().part("head", "abc").part("leaves", "Devs").finish();
        let c = CacheKey::new().part("head", "abc").part("leaves", "Couples").finish();
        let d = CacheKey::new().part("head", "ab").part("cleaves", "Devs").finish();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_open_backend_kinds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c.redb");
        assert!(open_backend(CacheKind::None, &path)?.is_none());
        assert_eq!(open_backend(CacheKind::Memory, &path)?.unwrap().name(), "memory");
        assert_eq!(open_backend(CacheKind::Redb, &path)?.unwrap().name(), "redb");
        Ok(())
    }
}
