//! Cache backend interface
//!
//! Backends store opaque byte payloads under string keys with an optional
//! time-to-live. Streaming variants exist for payloads too large to build in
//! memory twice; backends without native streaming fall back to buffering.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::time::Duration;

/// Stored value plus its expiry (unix seconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub expires_at: Option<i64>,
    pub payload: Vec<u8>,
}

impl CachedEntry {
    pub fn new(payload: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| now() + ttl.as_secs() as i64);
        Self {
            expires_at,
            payload,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= now())
    }
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Common interface for result cache backends
pub trait CacheBackend: Send + Sync {
    /// Name of this backend (for logging)
    fn name(&self) -> &str;

    /// Payload stored under `key`, `None` when absent or expired
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value`; `ttl == None` keeps it until deleted
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Remove `key`. Returns whether something was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get_reader(&self, key: &str) -> Result<Option<Box<dyn Read + Send>>> {
        Ok(self
            .get(key)?
            .map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>))
    }

    fn set_reader(&self, key: &str, reader: &mut dyn Read, ttl: Option<Duration>) -> Result<()> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        self.set(key, &buffer, ttl)
    }
}
