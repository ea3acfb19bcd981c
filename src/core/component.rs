//! Component contract
//!
//! Every analysis unit, intermediate ("plumbing") or terminal ("leaf"),
//! implements [`Component`]. The engine only talks to components through this
//! trait:
//!
//! ```text
//! configure(options) ─► initialize(run context) ─► consume(facts) × commits
//!                                                    │   ▲
//!                                   fork(n) ◄────────┘   └──────── merge(siblings)
//!                                                    │
//!                                                    ▼
//!                                     finalize() ─► serialize(result)   (leaves)
//! ```
//!
//! Leaves expose their extra capabilities through [`Component::as_leaf`], and
//! leaves whose results can be combined offline through
//! [`Leaf::as_result_merger`]. Capabilities are queried, never inferred from
//! concrete types.

use crate::core::commit::{Commit, CommitId};
use crate::core::facts::{FactStore, Outputs};
use crate::core::summary::RunSummary;
use crate::error::{EngineError, EngineResult};
use crate::git::RepositoryHandle;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Write;

/// Opaque result produced by a leaf's `finalize`
pub type AnalysisResult = Box<dyn Any + Send>;

/// Conversion helpers every component gets for free
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Per-run information handed to `initialize`
pub struct RunContext<'a> {
    pub repository: &'a RepositoryHandle,
    /// Every commit requested for the run, in execution order
    pub commits: &'a [Commit],
}

/// A pluggable analysis unit.
///
/// Implementations must be cheap to construct: the registry keeps one
/// prototype per component and creates fresh instances for every pipeline.
pub trait Component: AsAny {
    /// Stable identifier, used for registry lookups and result keys
    fn name(&self) -> &'static str;

    /// Keys this component adds to the fact store
    fn provides(&self) -> Vec<&'static str>;

    /// Keys that must be present before `consume` runs
    fn requires(&self) -> Vec<&'static str>;

    /// Feature tags gating automatic deployment
    fn features(&self) -> Vec<&'static str> {
        vec![]
    }

    /// Options accepted by `configure`
    fn configuration_options(&self) -> Vec<ConfigurationOption> {
        vec![]
    }

    /// Apply user options. Options not declared by this component are ignored.
    fn configure(&mut self, _options: &Options) -> anyhow::Result<()> {
        Ok(())
    }

    /// Reset per-run state. Called once before the first `consume`.
    fn initialize(&mut self, ctx: &RunContext<'_>) -> anyhow::Result<()>;

    /// Process one commit. Returned keys must be a subset of `provides`.
    fn consume(&mut self, facts: &FactStore) -> anyhow::Result<Outputs>;

    /// Create `n` independent copies to continue on diverging lines of history.
    ///
    /// The caller keeps `self` on one line and hands the copies to the others.
    /// A copy must not carry contributions that `merge` would count twice.
    fn fork(&self, n: usize) -> Vec<Box<dyn Component>>;

    /// Fold sibling copies back into `self` when lines of history reconverge.
    /// Siblings are instances of the same concrete type produced by `fork`.
    fn merge(&mut self, _siblings: Vec<Box<dyn Component>>) -> anyhow::Result<()> {
        Ok(())
    }

    fn as_leaf(&self) -> Option<&dyn Leaf> {
        None
    }

    fn as_leaf_mut(&mut self) -> Option<&mut dyn Leaf> {
        None
    }

    fn is_leaf(&self) -> bool {
        self.as_leaf().is_some()
    }
}

/// A terminal, user-facing analysis
pub trait Leaf {
    /// Command-line switch which activates the analysis
    fn flag(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Produce the result from accumulated state. No `consume` follows.
    fn finalize(&self) -> anyhow::Result<AnalysisResult>;

    /// Write `result` as text (`binary == false`) or in the compact binary form
    fn serialize(
        &self,
        result: &AnalysisResult,
        binary: bool,
        sink: &mut dyn Write,
    ) -> anyhow::Result<()>;

    /// Inverse of the binary `serialize`
    fn deserialize(&self, bytes: &[u8]) -> anyhow::Result<AnalysisResult>;

    fn as_result_merger(&self) -> Option<&dyn ResultMerger> {
        None
    }
}

/// Offline combination of two results of the same leaf
pub trait ResultMerger {
    fn merge_results(
        &self,
        left: &AnalysisResult,
        right: &AnalysisResult,
        left_summary: &RunSummary,
        right_summary: &RunSummary,
    ) -> anyhow::Result<AnalysisResult>;
}

/// Fork by cloning. Suitable for components without accumulators, or whose
/// `merge` does not add sibling state.
pub fn fork_copies<T>(item: &T, n: usize) -> Vec<Box<dyn Component>>
where
    T: Component + Clone,
{
    (0..n)
        .map(|_| Box::new(item.clone()) as Box<dyn Component>)
        .collect()
}

/// Recover the concrete type of sibling branch states
pub fn downcast_siblings<T: Component>(
    siblings: Vec<Box<dyn Component>>,
) -> anyhow::Result<Vec<Box<T>>> {
    siblings
        .into_iter()
        .map(|sibling| {
            let name = sibling.name();
            sibling.into_any().downcast::<T>().map_err(|_| {
                anyhow::anyhow!(
                    "cannot merge {} into {}",
                    name,
                    std::any::type_name::<T>()
                )
            })
        })
        .collect()
}

/// Borrow the concrete result type of a leaf
pub fn downcast_result<'a, T: Any>(
    component: &str,
    result: &'a AnalysisResult,
) -> anyhow::Result<&'a T> {
    result.downcast_ref::<T>().ok_or_else(|| {
        anyhow::anyhow!(
            "{} received a result that is not a {}",
            component,
            std::any::type_name::<T>()
        )
    })
}

/// Bookkeeping for the "process a merge commit once" contract.
///
/// Converging lines of history may reach the same merge commit more than
/// once; components that accumulate per-commit side effects ask the guard
/// before applying them.
#[derive(Debug, Clone, Default)]
pub struct OneShotMergeGuard {
    seen: HashSet<CommitId>,
}

impl OneShotMergeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when this merge commit was already consumed by the owner
    pub fn should_consume(&mut self, facts: &FactStore) -> EngineResult<bool> {
        if !facts.is_merge()? {
            return Ok(true);
        }
        let commit = facts.commit()?;
        Ok(self.seen.insert(commit.id.clone()))
    }

    /// Union with a sibling's bookkeeping
    pub fn absorb(&mut self, other: &OneShotMergeGuard) {
        self.seen.extend(other.seen.iter().cloned());
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

/// Type of a configuration option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    Float,
    Text,
    TextList,
}

impl OptionKind {
    /// Parse a command-line value
    pub fn parse(&self, raw: &str) -> Result<OptionValue, String> {
        match self {
            OptionKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(OptionValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(OptionValue::Bool(false)),
                other => Err(format!("'{}' is not a boolean", other)),
            },
            OptionKind::Int => raw
                .trim()
                .parse::<i64>()
                .map(OptionValue::Int)
                .map_err(|_| format!("'{}' is not an integer", raw)),
            OptionKind::Float => raw
                .trim()
                .parse::<f64>()
                .map(OptionValue::Float)
                .map_err(|_| format!("'{}' is not a number", raw)),
            OptionKind::Text => Ok(OptionValue::Text(raw.to_string())),
            OptionKind::TextList => Ok(OptionValue::TextList(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionKind::Bool => "bool",
            OptionKind::Int => "int",
            OptionKind::Float => "float",
            OptionKind::Text => "string",
            OptionKind::TextList => "list",
        };
        f.write_str(name)
    }
}

/// Value of a configuration option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    TextList(Vec<String>),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{}", v),
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Float(v) => write!(f, "{}", v),
            OptionValue::Text(v) => write!(f, "{}", v),
            OptionValue::TextList(v) => write!(f, "{}", v.join(",")),
        }
    }
}

/// Declaration of a changeable component property
#[derive(Debug, Clone)]
pub struct ConfigurationOption {
    /// Public name, e.g. "TicksSinceStart.TickSize"
    pub name: &'static str,
    pub description: &'static str,
    /// Command-line spelling, e.g. "tick-size"
    pub flag: &'static str,
    pub kind: OptionKind,
    pub default: OptionValue,
}

/// Named option bag passed to `configure`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(BTreeMap<String, OptionValue>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: OptionValue) {
        self.0.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: OptionValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` on top of `self`
    pub fn merge_from(&mut self, other: &Options) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }

    fn invalid(name: &str, expected: &str, value: &OptionValue) -> EngineError {
        EngineError::InvalidOption {
            option: name.to_string(),
            reason: format!("expected {}, got '{}'", expected, value),
        }
    }

    pub fn bool(&self, name: &str) -> EngineResult<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(OptionValue::Bool(v)) => Ok(Some(*v)),
            Some(other) => Err(Self::invalid(name, "a boolean", other)),
        }
    }

    pub fn int(&self, name: &str) -> EngineResult<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(OptionValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(Self::invalid(name, "an integer", other)),
        }
    }

    pub fn float(&self, name: &str) -> EngineResult<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(OptionValue::Float(v)) => Ok(Some(*v)),
            Some(OptionValue::Int(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(Self::invalid(name, "a number", other)),
        }
    }

    pub fn text(&self, name: &str) -> EngineResult<Option<&str>> {
        match self.get(name) {
            None => Ok(None),
            Some(OptionValue::Text(v)) => Ok(Some(v)),
            Some(other) => Err(Self::invalid(name, "a string", other)),
        }
    }

    pub fn text_list(&self, name: &str) -> EngineResult<Option<Vec<String>>> {
        match self.get(name) {
            None => Ok(None),
            Some(OptionValue::TextList(v)) => Ok(Some(v.clone())),
            Some(OptionValue::Text(v)) => Ok(Some(vec![v.clone()])),
            Some(other) => Err(Self::invalid(name, "a list of strings", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::facts::Fact;
    use std::sync::Arc;

    #[test]
    fn test_option_kind_parse() {
        assert_eq!(OptionKind::Bool.parse("on"), Ok(OptionValue::Bool(true)));
        assert_eq!(OptionKind::Int.parse(" 42"), Ok(OptionValue::Int(42)));
        assert!(OptionKind::Int.parse("4x").is_err());
        assert_eq!(
            OptionKind::TextList.parse("vendor/, ,dist/"),
            Ok(OptionValue::TextList(vec![
                "vendor/".to_string(),
                "dist/".to_string()
            ]))
        );
    }

    #[test]
    fn test_typed_option_access() {
        let options = Options::new()
            .with("A.Size", OptionValue::Int(3))
            .with("A.Name", OptionValue::Text("x".to_string()));
        assert_eq!(options.int("A.Size").unwrap(), Some(3));
        assert_eq!(options.float("A.Size").unwrap(), Some(3.0));
        assert_eq!(options.int("A.Missing").unwrap(), None);
        assert!(matches!(
            options.int("A.Name"),
            Err(EngineError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_options_deserialize_from_toml() {
        let options: Options = toml::from_str(
            r#"
"TicksSinceStart.TickSize" = 12
"TreeDiff.BlacklistedPrefixes" = ["vendor/"]
"Devs.ConsiderEmptyCommits" = true
"#,
        )
        .unwrap();
        assert_eq!(options.int("TicksSinceStart.TickSize").unwrap(), Some(12));
        assert_eq!(options.bool("Devs.ConsiderEmptyCommits").unwrap(), Some(true));
        assert_eq!(
            options.text_list("TreeDiff.BlacklistedPrefixes").unwrap(),
            Some(vec!["vendor/".to_string()])
        );
    }

    #[test]
    fn test_one_shot_guard() -> anyhow::Result<()> {
        let mut guard = OneShotMergeGuard::new();
        let merge = FactStore::seeded(Arc::new(Commit::new("m", &["a", "b"])), 2);
        let plain = FactStore::seeded(Arc::new(Commit::new("a", &[])), 0);

        assert!(guard.should_consume(&plain)?);
        assert!(guard.should_consume(&plain)?);
        assert!(guard.should_consume(&merge)?);
        assert!(!guard.should_consume(&merge)?);

        let mut other = OneShotMergeGuard::new();
        other.absorb(&guard);
        assert!(!other.should_consume(&merge)?);

        let mut store = FactStore::new();
        store.insert("is_merge", Fact::Bool(true));
        assert!(guard.should_consume(&store).is_err());
        Ok(())
    }
}
