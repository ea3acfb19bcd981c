//! Engine error taxonomy
//!
//! Errors fall into four groups:
//! - configuration errors, raised while a pipeline is resolved and configured,
//!   before any commit is touched
//! - run-fatal errors, which abort the whole run with no partial output
//! - fact access errors, returned by the typed `FactStore` getters
//! - merge-protocol errors, reported per component during offline combination
//!
//! Component bodies return `anyhow::Result`; the engine wraps their failures
//! into this taxonomy with the component name and the commit attached.

use thiserror::Error;

/// Errors produced by the analysis engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown analysis or component: {0}")]
    UnknownComponent(String),

    #[error("{required_by} requires \"{key}\" but no component provides it{}", disabled_hint(.disabled_feature))]
    MissingDependency {
        key: String,
        required_by: String,
        disabled_feature: Option<String>,
    },

    #[error("{required_by} requires \"{key}\" which is provided by several components: {}", .candidates.join(", "))]
    AmbiguousDependency {
        key: String,
        required_by: String,
        candidates: Vec<String>,
    },

    #[error("dependency cycle between components: {}", .components.join(" -> "))]
    DependencyCycle { components: Vec<String> },

    #[error("invalid value for option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("failed to configure {component}: {source:#}")]
    ConfigureFailed {
        component: String,
        source: anyhow::Error,
    },

    #[error("failed to initialize {component}: {source:#}")]
    InitializeFailed {
        component: String,
        source: anyhow::Error,
    },

    #[error("pipeline is not initialized")]
    NotInitialized,

    #[error("{component} failed on commit {commit}: {source:#}")]
    ConsumeFailed {
        component: String,
        commit: String,
        source: anyhow::Error,
    },

    #[error("{component} requires \"{key}\" which is absent on commit {commit}")]
    MissingRequirement {
        component: String,
        key: String,
        commit: String,
    },

    #[error("{component} produced undeclared output \"{key}\" on commit {commit}")]
    UndeclaredOutput {
        component: String,
        key: String,
        commit: String,
    },

    #[error("{component} returned {actual} forks, {expected} were requested")]
    ForkFailed {
        component: String,
        expected: usize,
        actual: usize,
    },

    #[error("failed to merge branch states of {component}: {source:#}")]
    MergeFailed {
        component: String,
        source: anyhow::Error,
    },

    #[error("failed to finalize {component}: {source:#}")]
    FinalizeFailed {
        component: String,
        source: anyhow::Error,
    },

    #[error("inconsistent commit history: {0}")]
    BrokenHistory(String),

    #[error("fact \"{0}\" is not present")]
    FactNotFound(String),

    #[error("fact \"{key}\" is not a {expected}")]
    FactType { key: String, expected: &'static str },

    #[error("cannot merge {component} results: {reason}")]
    IncompatibleResults { component: String, reason: String },
}

fn disabled_hint(feature: &Option<String>) -> String {
    match feature {
        Some(feature) => format!(" (a provider exists behind the disabled feature \"{}\")", feature),
        None => String::new(),
    }
}

impl EngineError {
    /// Whether this error was raised before any commit was processed
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownComponent(_)
                | EngineError::MissingDependency { .. }
                | EngineError::AmbiguousDependency { .. }
                | EngineError::DependencyCycle { .. }
                | EngineError::InvalidOption { .. }
                | EngineError::ConfigureFailed { .. }
                | EngineError::InitializeFailed { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
