//! Contents of the blobs touched by a commit
//!
//! The map handed downstream only covers the current commit. Blobs that were
//! already loaded for the previous commit on the same line of history are
//! reused instead of read again.

use super::tree_diff::{Change, FileEntry};
use super::{DEPENDENCY_BLOB_CACHE, DEPENDENCY_TREE_CHANGES};
use crate::core::{
    fork_copies, Component, ConfigurationOption, Fact, FactStore, OptionKind, OptionValue,
    Options, Outputs, RunContext,
};
use crate::git::RepositoryHandle;
use anyhow::{bail, Context, Result};
use git2::Oid;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::warn;

pub const CONFIG_FAIL_ON_MISSING_SUBMODULES: &str = "BlobCache.FailOnMissingSubmodules";

/// Bytes inspected when sniffing binary content
const BINARY_SNIFF_LEN: usize = 8000;

/// Blob id → contents
pub type BlobMap = FxHashMap<Oid, Arc<CachedBlob>>;

/// Loaded blob contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub data: Vec<u8>,
}

impl CachedBlob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Same heuristic as git: a NUL byte near the start means binary
    pub fn is_binary(&self) -> bool {
        let head = &self.data[..self.data.len().min(BINARY_SNIFF_LEN)];
        memchr::memchr(0, head).is_some()
    }

    /// Number of lines, counting an unterminated last line
    pub fn count_lines(&self) -> usize {
        let newlines = memchr::memchr_iter(b'\n', &self.data).count();
        match self.data.last() {
            None => 0,
            Some(b'\n') => newlines,
            Some(_) => newlines + 1,
        }
    }
}

#[derive(Clone, Default)]
pub struct BlobCache {
    fail_on_missing_submodules: bool,
    previous: BlobMap,
    repository: Option<RepositoryHandle>,
}

impl BlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(
        &self,
        repo: &git2::Repository,
        entry: &FileEntry,
        cache: &mut BlobMap,
        commit: &str,
    ) -> Result<()> {
        if cache.contains_key(&entry.blob) {
            return Ok(());
        }
        if let Some(blob) = self.previous.get(&entry.blob) {
            cache.insert(entry.blob, Arc::clone(blob));
            return Ok(());
        }
        match repo.find_blob(entry.blob) {
            Ok(blob) => {
                cache.insert(entry.blob, Arc::new(CachedBlob::new(blob.content().to_vec())));
                Ok(())
            }
            Err(e) if entry.submodule && !self.fail_on_missing_submodules => {
                warn!(
                    "BlobCache: skipped submodule {} in {}: {}",
                    entry.path, commit, e
                );
                Ok(())
            }
            Err(e) if entry.submodule => {
                bail!("submodule {} has no blob in this repository: {}", entry.path, e)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read blob of {}", entry.path)),
        }
    }
}

impl Component for BlobCache {
    fn name(&self) -> &'static str {
        "BlobCache"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_BLOB_CACHE]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_TREE_CHANGES]
    }

    fn configuration_options(&self) -> Vec<ConfigurationOption> {
        vec![ConfigurationOption {
            name: CONFIG_FAIL_ON_MISSING_SUBMODULES,
            description: "Fail when a changed submodule cannot be read instead of skipping it.",
            flag: "fail-on-missing-submodules",
            kind: OptionKind::Bool,
            default: OptionValue::Bool(false),
        }]
    }

    fn configure(&mut self, options: &Options) -> Result<()> {
        if let Some(fail) = options.bool(CONFIG_FAIL_ON_MISSING_SUBMODULES)? {
            self.fail_on_missing_submodules = fail;
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &RunContext<'_>) -> Result<()> {
        ctx.repository.git()?;
        self.repository = Some(ctx.repository.clone());
        self.previous.clear();
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        let repo = self
            .repository
            .as_ref()
            .context("BlobCache used before initialize")?
            .git()?;
        let commit = facts.commit()?.id.short().to_string();
        let changes = facts.handle::<Vec<Change>>(DEPENDENCY_TREE_CHANGES)?;

        let mut cache = BlobMap::default();
        for change in changes {
            for entry in change.from.iter().chain(change.to.iter()) {
                self.load(repo, entry, &mut cache, &commit)?;
            }
        }

        self.previous = cache.clone();
        Ok(Outputs::from([(
            DEPENDENCY_BLOB_CACHE.to_string(),
            Fact::handle(cache),
        )]))
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        fork_copies(self, n)
    }
}
