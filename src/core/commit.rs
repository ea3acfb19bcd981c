//! Commit records fed through the pipeline
//!
//! The engine never walks git objects directly. History loaders (see
//! `crate::git::history`) turn repository commits into these owned records,
//! which keeps the executor testable on synthetic histories.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a commit (full hex hash for git commits)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in log lines
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CommitId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<git2::Oid> for CommitId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

/// Author of a commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A commit of the analysed history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    /// All parents as recorded in the repository, first parent first.
    /// Parents outside the requested commit set are kept here but ignored by
    /// the planner.
    pub parents: Vec<CommitId>,
    pub author: Signature,
    /// Commit time, unix seconds
    pub time: i64,
    /// First line of the message
    pub summary: String,
}

impl Commit {
    pub fn new(id: impl Into<CommitId>, parents: &[&str]) -> Self {
        Self {
            id: id.into(),
            parents: parents.iter().map(|p| CommitId::from(*p)).collect(),
            author: Signature::default(),
            time: 0,
            summary: String::new(),
        }
    }

    pub fn with_author(mut self, name: &str, email: &str) -> Self {
        self.author = Signature::new(name, email);
        self
    }

    pub fn with_time(mut self, time: i64) -> Self {
        self.time = time;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Whether the repository records more than one parent
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Git object id, when the identifier is a valid hex hash
    pub fn oid(&self) -> Result<git2::Oid, git2::Error> {
        git2::Oid::from_str(self.id.as_str())
    }
}
