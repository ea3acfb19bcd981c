//! File-level changes between a commit and its first parent

use super::DEPENDENCY_TREE_CHANGES;
use crate::core::{
    fork_copies, Component, ConfigurationOption, Fact, FactStore, OptionKind, OptionValue,
    Options, Outputs, RunContext,
};
use crate::git::RepositoryHandle;
use anyhow::{Context, Result};
use git2::{Delta, DiffFile, FileMode, Oid};
use regex::Regex;
use tracing::debug;

pub const CONFIG_ENABLE_BLACKLIST: &str = "TreeDiff.EnableBlacklist";
pub const CONFIG_BLACKLISTED_PREFIXES: &str = "TreeDiff.BlacklistedPrefixes";
pub const CONFIG_FILTER_REGEXP: &str = "TreeDiff.FilterRegexp";

/// Paths skipped when the blacklist is enabled and no prefixes are given
pub const DEFAULT_BLACKLISTED_PREFIXES: [&str; 4] =
    ["vendor/", "vendors/", "package-lock.json", "Gopkg.lock"];

/// One side of a change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub blob: Oid,
    /// Gitlink entry; its blob does not exist in this repository
    pub submodule: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Insert,
    Delete,
    Modify,
}

/// A changed file. `from` is absent for insertions, `to` for deletions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub from: Option<FileEntry>,
    pub to: Option<FileEntry>,
}

impl Change {
    pub fn action(&self) -> ChangeAction {
        match (&self.from, &self.to) {
            (None, _) => ChangeAction::Insert,
            (_, None) => ChangeAction::Delete,
            _ => ChangeAction::Modify,
        }
    }

    /// Current path of the file, or its last path when deleted
    pub fn path(&self) -> &str {
        self.to
            .as_ref()
            .or(self.from.as_ref())
            .map_or("", |entry| entry.path.as_str())
    }
}

/// Provides `changes`: the diff of the commit tree against its first parent.
/// Root commits and commits whose parent is missing diff against the empty tree.
#[derive(Clone, Default)]
pub struct TreeDiff {
    blacklist: bool,
    prefixes: Vec<String>,
    filter: Option<Regex>,
    repository: Option<RepositoryHandle>,
}

impl TreeDiff {
    pub fn new() -> Self {
        Self::default()
    }

    fn accepts(&self, path: &str) -> bool {
        if self.blacklist && self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return false;
        }
        self.filter.as_ref().map_or(true, |filter| filter.is_match(path))
    }

    fn parent_tree<'r>(
        repo: &'r git2::Repository,
        commit: &crate::core::Commit,
    ) -> Result<Option<git2::Tree<'r>>> {
        let Some(parent) = commit.parents.first() else {
            return Ok(None);
        };
        match repo.find_commit(Oid::from_str(parent.as_str())?) {
            Ok(parent) => Ok(Some(parent.tree()?)),
            Err(e) => {
                debug!("parent {} of {} is unavailable: {}", parent.short(), commit.id.short(), e);
                Ok(None)
            }
        }
    }
}

fn entry(file: DiffFile<'_>) -> Option<FileEntry> {
    let path = file.path()?.to_string_lossy().into_owned();
    Some(FileEntry {
        path,
        blob: file.id(),
        submodule: file.mode() == FileMode::Commit,
    })
}

impl Component for TreeDiff {
    fn name(&self) -> &'static str {
        "TreeDiff"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_TREE_CHANGES]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![]
    }

    fn configuration_options(&self) -> Vec<ConfigurationOption> {
        vec![
            ConfigurationOption {
                name: CONFIG_ENABLE_BLACKLIST,
                description: "Skip files under the blacklisted path prefixes.",
                flag: "skip-blacklist",
                kind: OptionKind::Bool,
                default: OptionValue::Bool(false),
            },
            ConfigurationOption {
                name: CONFIG_BLACKLISTED_PREFIXES,
                description: "Path prefixes skipped when the blacklist is enabled.",
                flag: "blacklisted-prefixes",
                kind: OptionKind::TextList,
                default: OptionValue::TextList(
                    DEFAULT_BLACKLISTED_PREFIXES.iter().map(|p| p.to_string()).collect(),
                ),
            },
            ConfigurationOption {
                name: CONFIG_FILTER_REGEXP,
                description: "Only keep files whose path matches this regular expression.",
                flag: "filter",
                kind: OptionKind::Text,
                default: OptionValue::Text(String::new()),
            },
        ]
    }

    fn configure(&mut self, options: &Options) -> Result<()> {
        if let Some(enabled) = options.bool(CONFIG_ENABLE_BLACKLIST)? {
            self.blacklist = enabled;
        }
        self.prefixes = match options.text_list(CONFIG_BLACKLISTED_PREFIXES)? {
            Some(prefixes) => prefixes,
            None => DEFAULT_BLACKLISTED_PREFIXES.iter().map(|p| p.to_string()).collect(),
        };
        if let Some(pattern) = options.text(CONFIG_FILTER_REGEXP)? {
            self.filter = if pattern.is_empty() {
                None
            } else {
                Some(
                    Regex::new(pattern)
                        .with_context(|| format!("Invalid {}: {}", CONFIG_FILTER_REGEXP, pattern))?,
                )
            };
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &RunContext<'_>) -> Result<()> {
        ctx.repository.git()?;
        self.repository = Some(ctx.repository.clone());
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        let repo = self
            .repository
            .as_ref()
            .context("TreeDiff used before initialize")?
            .git()?;
        let commit = facts.commit()?;
        let tree = repo
            .find_commit(commit.oid()?)
            .and_then(|c| c.tree())
            .with_context(|| format!("Failed to read the tree of {}", commit.id.short()))?;
        let parent = Self::parent_tree(repo, commit)?;
        let diff = repo.diff_tree_to_tree(parent.as_ref(), Some(&tree), None)?;

        let mut changes = Vec::with_capacity(diff.deltas().len());
        for delta in diff.deltas() {
            let change = match delta.status() {
                Delta::Added => Change {
                    from: None,
                    to: entry(delta.new_file()),
                },
                Delta::Deleted => Change {
                    from: entry(delta.old_file()),
                    to: None,
                },
                Delta::Modified | Delta::Renamed | Delta::Copied | Delta::Typechange => Change {
                    from: entry(delta.old_file()),
                    to: entry(delta.new_file()),
                },
                _ => continue,
            };
            if change.from.is_none() && change.to.is_none() {
                continue;
            }
            if self.accepts(change.path()) {
                changes.push(change);
            }
        }

        Ok(Outputs::from([(
            DEPENDENCY_TREE_CHANGES.to_string(),
            Fact::handle(changes),
        )]))
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        fork_copies(self, n)
    }
}
