//! Built-in plumbing components
//!
//! Intermediate analyses whose outputs feed the leaves:
//!
//! | component          | requires                 | provides             |
//! |--------------------|--------------------------|----------------------|
//! | `TreeDiff`         |                          | `changes`            |
//! | `BlobCache`        | `changes`                | `blob_cache`         |
//! | `IdentityDetector` |                          | `author`, `people`   |
//! | `TicksSinceStart`  |                          | `tick`               |
//! | `LinesStats`       | `changes`, `blob_cache`  | `line_stats`         |
//! | `Imports`          | `changes`, `blob_cache`  | `imports`            |
//!
//! `Imports` sits behind the `code-structure` feature.

pub mod blob_cache;
pub mod identity;
pub mod imports;
pub mod line_stats;
pub mod ticks;
pub mod tree_diff;

pub use blob_cache::{BlobCache, BlobMap, CachedBlob};
pub use identity::{IdentityDetector, People};
pub use imports::{FileImports, ImportMap, Imports};
pub use line_stats::{LineStats, LineStatsMap, LinesStats};
pub use ticks::{TicksSinceStart, DEFAULT_TICK_HOURS};
pub use tree_diff::{Change, ChangeAction, FileEntry, TreeDiff};

/// File-level changes of the commit (`Vec<Change>`)
pub const DEPENDENCY_TREE_CHANGES: &str = "changes";
/// Blob contents touched by the commit (`BlobMap`)
pub const DEPENDENCY_BLOB_CACHE: &str = "blob_cache";
/// Developer index of the commit author (`Fact::Int`)
pub const DEPENDENCY_AUTHOR: &str = "author";
/// Developer index to identity string (`People`)
pub const DEPENDENCY_PEOPLE: &str = "people";
/// Tick of the commit (`Fact::Int`)
pub const DEPENDENCY_TICK: &str = "tick";
/// Per-file added and removed lines (`LineStatsMap`)
pub const DEPENDENCY_LINE_STATS: &str = "line_stats";
/// Per-file import lists (`ImportMap`)
pub const DEPENDENCY_IMPORTS: &str = "imports";

/// Feature gating structural analyses
pub const FEATURE_CODE_STRUCTURE: &str = "code-structure";

#[cfg(test)]
pub(crate) mod testing {
    use crate::core::{Commit, FactStore};
    use crate::git::history::tests::create_test_repo;
    use crate::git::{load_commits, HistoryOptions, RepositoryHandle};
    use anyhow::{Context, Result};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Repository with a branch and a merge, plus its commits parents first
    pub(crate) fn open_fixture() -> Result<(TempDir, RepositoryHandle, Vec<Commit>)> {
        let (dir, _repo, _oids) = create_test_repo()?;
        let handle = RepositoryHandle::open(dir.path())?;
        let commits = load_commits(&handle, &HistoryOptions::default())?;
        Ok((dir, handle, commits))
    }

    /// Seeded facts of the commit with the given message summary
    pub(crate) fn facts_for(commits: &[Commit], summary: &str) -> Result<FactStore> {
        let index = commits
            .iter()
            .position(|c| c.summary == summary)
            .with_context(|| format!("no commit named {}", summary))?;
        Ok(FactStore::seeded(Arc::new(commits[index].clone()), index))
    }
}
