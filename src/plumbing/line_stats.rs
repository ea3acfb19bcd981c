//! Added and removed lines per changed file

use super::blob_cache::{BlobMap, CachedBlob};
use super::tree_diff::{Change, ChangeAction, FileEntry};
use super::{DEPENDENCY_BLOB_CACHE, DEPENDENCY_LINE_STATS, DEPENDENCY_TREE_CHANGES};
use crate::core::{fork_copies, Component, Fact, FactStore, Outputs, RunContext};
use anyhow::Result;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineStats {
    pub added: u64,
    pub removed: u64,
}

impl AddAssign for LineStats {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.removed += other.removed;
    }
}

/// Path → line statistics of the commit
pub type LineStatsMap = FxHashMap<String, LineStats>;

/// Line counts of a modification, through a text diff of both blobs
fn diff_stats(old: &CachedBlob, new: &CachedBlob, path: &str) -> Result<LineStats> {
    let patch = git2::Patch::from_buffers(
        &old.data,
        Some(Path::new(path)),
        &new.data,
        Some(Path::new(path)),
        None,
    )?;
    let (_, added, removed) = patch.line_stats()?;
    Ok(LineStats {
        added: added as u64,
        removed: removed as u64,
    })
}

fn blob_of<'c>(side: &Option<FileEntry>, cache: &'c BlobMap) -> Option<&'c Arc<CachedBlob>> {
    side.as_ref().and_then(|entry| cache.get(&entry.blob))
}

#[derive(Clone, Default)]
pub struct LinesStats;

impl LinesStats {
    pub fn new() -> Self {
        Self
    }

    fn stats_of(change: &Change, cache: &BlobMap) -> Result<Option<LineStats>> {
        let (old, new) = (blob_of(&change.from, cache), blob_of(&change.to, cache));
        if old.is_some_and(|b| b.is_binary()) || new.is_some_and(|b| b.is_binary()) {
            return Ok(None);
        }
        let stats = match change.action() {
            ChangeAction::Insert => new.map(|b| LineStats {
                added: b.count_lines() as u64,
                removed: 0,
            }),
            ChangeAction::Delete => old.map(|b| LineStats {
                added: 0,
                removed: b.count_lines() as u64,
            }),
            ChangeAction::Modify => match (old, new) {
                (Some(old), Some(new)) => Some(diff_stats(old, new, change.path())?),
                _ => None,
            },
        };
        Ok(stats)
    }
}

impl Component for LinesStats {
    fn name(&self) -> &'static str {
        "LinesStats"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_LINE_STATS]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_TREE_CHANGES, DEPENDENCY_BLOB_CACHE]
    }

    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        let changes = facts.handle::<Vec<Change>>(DEPENDENCY_TREE_CHANGES)?;
        let cache = facts.handle::<BlobMap>(DEPENDENCY_BLOB_CACHE)?;

        let mut stats = LineStatsMap::default();
        for change in changes {
            match Self::stats_of(change, cache) {
                Ok(Some(file_stats)) => {
                    *stats.entry(change.path().to_string()).or_default() += file_stats;
                }
                Ok(None) => debug!("LinesStats: skipped {}", change.path()),
                Err(e) => warn!(
                    "LinesStats: failed to diff {} in {}: {:#}",
                    change.path(),
                    facts.commit()?.id.short(),
                    e
                ),
            }
        }
        Ok(Outputs::from([(
            DEPENDENCY_LINE_STATS.to_string(),
            Fact::handle(stats),
        )]))
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        fork_copies(self, n)
    }
}
