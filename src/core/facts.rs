//! Per-commit fact store
//!
//! A `FactStore` is created for every commit pass, seeded with the commit
//! record, its index and its merge flag, and then extended by each component's
//! outputs in execution order. Nothing in it survives the pass; state that must
//! persist across commits lives in the components themselves.

use crate::core::commit::Commit;
use crate::error::{EngineError, EngineResult};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Always-present key: the commit being processed (`Fact::Commit`)
pub const DEPENDENCY_COMMIT: &str = "commit";
/// Always-present key: 0-based index of the commit in the run (`Fact::Int`)
pub const DEPENDENCY_INDEX: &str = "index";
/// Always-present key: whether the commit has several parents (`Fact::Bool`)
pub const DEPENDENCY_IS_MERGE: &str = "is_merge";

/// Keys the executor seeds before any component runs
pub const SEED_KEYS: [&str; 3] = [DEPENDENCY_COMMIT, DEPENDENCY_INDEX, DEPENDENCY_IS_MERGE];

/// A single fact value
#[derive(Clone)]
pub enum Fact {
    Bool(bool),
    Int(i64),
    Text(String),
    Duration(Duration),
    Commit(Arc<Commit>),
    /// Typed payload shared between a producer and its consumers
    Handle(Arc<dyn Any + Send + Sync>),
}

impl Fact {
    /// Wrap an arbitrary payload
    pub fn handle<T: Any + Send + Sync>(value: T) -> Self {
        Fact::Handle(Arc::new(value))
    }

    fn kind(&self) -> &'static str {
        match self {
            Fact::Bool(_) => "bool",
            Fact::Int(_) => "int",
            Fact::Text(_) => "text",
            Fact::Duration(_) => "duration",
            Fact::Commit(_) => "commit",
            Fact::Handle(_) => "handle",
        }
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::Bool(v) => write!(f, "Bool({})", v),
            Fact::Int(v) => write!(f, "Int({})", v),
            Fact::Text(v) => write!(f, "Text({:?})", v),
            Fact::Duration(v) => write!(f, "Duration({:?})", v),
            Fact::Commit(c) => write!(f, "Commit({})", c.id.short()),
            Fact::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

/// Outputs returned by a component's consume step, keyed by provided name
pub type Outputs = HashMap<String, Fact>;

/// Key/value bag threaded through the component chain for one commit
#[derive(Clone, Default, Debug)]
pub struct FactStore {
    facts: HashMap<String, Fact>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the always-present facts of `commit`
    pub fn seeded(commit: Arc<Commit>, index: usize) -> Self {
        let mut store = Self::new();
        store.insert(DEPENDENCY_IS_MERGE, Fact::Bool(commit.is_merge()));
        store.insert(DEPENDENCY_INDEX, Fact::Int(index as i64));
        store.insert(DEPENDENCY_COMMIT, Fact::Commit(commit));
        store
    }

    pub fn insert(&mut self, key: impl Into<String>, fact: Fact) {
        self.facts.insert(key.into(), fact);
    }

    pub fn extend(&mut self, outputs: Outputs) {
        self.facts.extend(outputs);
    }

    pub fn get(&self, key: &str) -> Option<&Fact> {
        self.facts.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.facts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    fn require(&self, key: &str) -> EngineResult<&Fact> {
        self.facts
            .get(key)
            .ok_or_else(|| EngineError::FactNotFound(key.to_string()))
    }

    fn mismatch(key: &str, expected: &'static str) -> EngineError {
        EngineError::FactType {
            key: key.to_string(),
            expected,
        }
    }

    pub fn bool(&self, key: &str) -> EngineResult<bool> {
        match self.require(key)? {
            Fact::Bool(v) => Ok(*v),
            _ => Err(Self::mismatch(key, "bool")),
        }
    }

    pub fn int(&self, key: &str) -> EngineResult<i64> {
        match self.require(key)? {
            Fact::Int(v) => Ok(*v),
            _ => Err(Self::mismatch(key, "int")),
        }
    }

    pub fn text(&self, key: &str) -> EngineResult<&str> {
        match self.require(key)? {
            Fact::Text(v) => Ok(v),
            _ => Err(Self::mismatch(key, "text")),
        }
    }

    pub fn duration(&self, key: &str) -> EngineResult<Duration> {
        match self.require(key)? {
            Fact::Duration(v) => Ok(*v),
            _ => Err(Self::mismatch(key, "duration")),
        }
    }

    /// Typed payload stored with `Fact::handle`
    pub fn handle<T: Any + Send + Sync>(&self, key: &str) -> EngineResult<&T> {
        match self.require(key)? {
            Fact::Handle(payload) => payload
                .downcast_ref::<T>()
                .ok_or_else(|| Self::mismatch(key, std::any::type_name::<T>())),
            other => {
                tracing::debug!("fact {} holds a {} value", key, other.kind());
                Err(Self::mismatch(key, std::any::type_name::<T>()))
            }
        }
    }

    /// Same as `handle`, but keeps a shared reference to the payload
    pub fn shared<T: Any + Send + Sync>(&self, key: &str) -> EngineResult<Arc<T>> {
        match self.require(key)? {
            Fact::Handle(payload) => Arc::clone(payload)
                .downcast::<T>()
                .map_err(|_| Self::mismatch(key, std::any::type_name::<T>())),
            _ => Err(Self::mismatch(key, std::any::type_name::<T>())),
        }
    }

    pub fn commit(&self) -> EngineResult<&Commit> {
        match self.require(DEPENDENCY_COMMIT)? {
            Fact::Commit(c) => Ok(c),
            _ => Err(Self::mismatch(DEPENDENCY_COMMIT, "commit")),
        }
    }

    pub fn index(&self) -> EngineResult<usize> {
        Ok(self.int(DEPENDENCY_INDEX)?.max(0) as usize)
    }

    pub fn is_merge(&self) -> EngineResult<bool> {
        self.bool(DEPENDENCY_IS_MERGE)
    }
}
