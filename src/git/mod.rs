//! Git access
//!
//! The engine itself works on owned [`Commit`](crate::core::Commit) records.
//! This module opens repositories, walks their history into such records and
//! hands components a [`RepositoryHandle`] for tree and blob access.

pub mod history;

pub use history::{load_commits, resolve_head, HistoryOptions};

use anyhow::{Context, Result};
use git2::Repository;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

/// Repository being analysed.
///
/// A detached handle carries only an identifier; it is used for synthetic
/// histories where no component touches git.
#[derive(Clone)]
pub struct RepositoryHandle {
    uri: String,
    repo: Option<Rc<Repository>>,
}

impl RepositoryHandle {
    /// Open the repository containing `path`
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path)
            .with_context(|| format!("Failed to open git repository at {:?}", path))?;
        debug!("Opened git repository at {:?}", repo.path());
        let root = repo.workdir().unwrap_or_else(|| repo.path());
        let uri = root
            .canonicalize()
            .unwrap_or_else(|_| root.to_path_buf())
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            uri,
            repo: Some(Rc::new(repo)),
        })
    }

    pub fn detached(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            repo: None,
        }
    }

    /// Whether `path` is inside a git repository
    pub fn is_git_repo(path: &Path) -> bool {
        Repository::discover(path).is_ok()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_detached(&self) -> bool {
        self.repo.is_none()
    }

    /// Underlying git repository, or an error for detached handles
    pub fn git(&self) -> Result<&Repository> {
        self.repo
            .as_deref()
            .with_context(|| format!("{} is not backed by a git repository", self.uri))
    }
}

impl fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("uri", &self.uri)
            .field("detached", &self.is_detached())
            .finish()
    }
}
