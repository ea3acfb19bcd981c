//! Structural hotness: functions changed together
//!
//! A finer-grained `Couples`. Both sides of every changed file are parsed; a
//! function is touched when a removed line falls in its old span or an added
//! line in its new span, and every function of an inserted file is touched.
//! Functions are identified by (kind, name, file).
//!
//! Deleting a file drops its functions and renaming it moves them. Branches
//! replay each other's deletions and renames on merge, so functions of a file
//! deleted on one side of a merge disappear from the joined state too.

use crate::core::{
    downcast_result, downcast_siblings, AnalysisResult, Component, FactStore, Leaf, Outputs,
    ResultMerger, RunContext, RunSummary,
};
use crate::error::EngineError;
use crate::parsers::{FunctionSpan, Language, SourceFile};
use crate::plumbing::imports::DEFAULT_MAX_FILE_SIZE;
use crate::plumbing::{
    BlobMap, CachedBlob, Change, FileEntry, DEPENDENCY_BLOB_CACHE, DEPENDENCY_TREE_CHANGES,
    FEATURE_CODE_STRUCTURE,
};
use anyhow::{Context, Result};
use git2::{DiffOptions, Patch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Identity of an analysed function
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeSummary {
    pub kind: String,
    pub name: String,
    pub file: String,
}

impl fmt::Display for NodeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.kind, self.name, self.file)
    }
}

/// `counters[i][i]` is how many commits touched `nodes[i]`; `counters[i][j]`
/// how many touched both `nodes[i]` and `nodes[j]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotnessResult {
    pub nodes: Vec<NodeSummary>,
    pub counters: Vec<BTreeMap<usize, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NodeCounts {
    count: u64,
    couples: BTreeMap<NodeSummary, u64>,
}

type NodeMap = BTreeMap<NodeSummary, NodeCounts>;

impl ShotnessResult {
    fn from_nodes(nodes: &NodeMap) -> Self {
        let index: BTreeMap<&NodeSummary, usize> =
            nodes.keys().enumerate().map(|(i, node)| (node, i)).collect();
        let mut result = Self::default();
        for (i, (node, counts)) in nodes.iter().enumerate() {
            let mut counter = BTreeMap::from([(i, counts.count)]);
            for (other, count) in &counts.couples {
                if let Some(&j) = index.get(other) {
                    counter.insert(j, *count);
                }
            }
            result.nodes.push(node.clone());
            result.counters.push(counter);
        }
        result
    }

    fn to_nodes(&self, component: &str) -> Result<NodeMap> {
        let incompatible = |reason: String| EngineError::IncompatibleResults {
            component: component.to_string(),
            reason,
        };
        if self.nodes.len() != self.counters.len() {
            return Err(incompatible(format!(
                "{} nodes but {} counter rows",
                self.nodes.len(),
                self.counters.len()
            ))
            .into());
        }
        let mut nodes = NodeMap::new();
        for (i, (node, counter)) in self.nodes.iter().zip(&self.counters).enumerate() {
            let counts = nodes.entry(node.clone()).or_default();
            for (&j, &count) in counter {
                if j == i {
                    counts.count += count;
                    continue;
                }
                let other = self
                    .nodes
                    .get(j)
                    .ok_or_else(|| incompatible(format!("counter refers to missing node {}", j)))?;
                *counts.couples.entry(other.clone()).or_default() += count;
            }
        }
        Ok(nodes)
    }
}

fn absorb(into: &mut NodeMap, from: &NodeMap) {
    for (node, counts) in from {
        let target = into.entry(node.clone()).or_default();
        target.count += counts.count;
        for (other, count) in &counts.couples {
            *target.couples.entry(other.clone()).or_default() += count;
        }
    }
}

/// File-level history that must reach the branch a state is merged into
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileEvent {
    Deleted(String),
    Renamed { from: String, to: String },
}

impl FileEvent {
    fn path(&self) -> &str {
        match self {
            FileEvent::Deleted(path) => path,
            FileEvent::Renamed { from, .. } => from,
        }
    }

    /// Where `node` lives after the event; `None` once deleted
    fn relocate(&self, node: &NodeSummary) -> Option<NodeSummary> {
        if node.file != self.path() {
            return Some(node.clone());
        }
        match self {
            FileEvent::Deleted(_) => None,
            FileEvent::Renamed { to, .. } => Some(NodeSummary {
                file: to.clone(),
                ..node.clone()
            }),
        }
    }

    fn apply(&self, nodes: &mut NodeMap) {
        if !nodes.keys().any(|node| node.file == self.path()) {
            return;
        }
        for (node, counts) in std::mem::take(nodes) {
            let Some(node) = self.relocate(&node) else {
                continue;
            };
            let target = nodes.entry(node).or_default();
            target.count += counts.count;
            for (other, count) in counts.couples {
                if let Some(other) = self.relocate(&other) {
                    *target.couples.entry(other).or_default() += count;
                }
            }
        }
    }
}

/// Function spans of one side of a change; `None` when it cannot be analysed
fn spans_of(entry: &FileEntry, cache: &BlobMap) -> Result<Option<Vec<FunctionSpan>>> {
    let Some(language) = Language::detect(&entry.path) else {
        return Ok(None);
    };
    let Some(blob) = cache.get(&entry.blob) else {
        return Ok(None);
    };
    if blob.is_binary() || blob.size() > DEFAULT_MAX_FILE_SIZE as usize {
        return Ok(None);
    }
    let source = std::str::from_utf8(&blob.data).context("not valid UTF-8")?;
    Ok(Some(SourceFile::parse(language, source)?.functions()))
}

/// Removed lines of the old blob and added lines of the new one, 1-based
fn changed_lines(old: &CachedBlob, new: &CachedBlob, path: &str) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut options = DiffOptions::new();
    options.context_lines(0);
    let patch = Patch::from_buffers(
        &old.data,
        Some(Path::new(path)),
        &new.data,
        Some(Path::new(path)),
        Some(&mut options),
    )?;
    let (mut removed, mut added) = (Vec::new(), Vec::new());
    for hunk in 0..patch.num_hunks() {
        for index in 0..patch.num_lines_in_hunk(hunk)? {
            let line = patch.line_in_hunk(hunk, index)?;
            match line.origin() {
                '-' => removed.extend(line.old_lineno().map(|n| n as usize)),
                '+' => added.extend(line.new_lineno().map(|n| n as usize)),
                _ => {}
            }
        }
    }
    Ok((removed, added))
}

/// Functions touched by an insertion (`from` is `None`) or a modification,
/// named after the new path
fn touched_in(from: Option<&FileEntry>, to: &FileEntry, cache: &BlobMap) -> Result<Vec<NodeSummary>> {
    let summary = |span: &FunctionSpan| NodeSummary {
        kind: span.kind.to_string(),
        name: span.name.clone(),
        file: to.path.clone(),
    };
    let Some(after) = spans_of(to, cache)? else {
        return Ok(Vec::new());
    };
    let Some(from) = from else {
        return Ok(after.iter().map(summary).collect());
    };
    let (Some(old), Some(new)) = (cache.get(&from.blob), cache.get(&to.blob)) else {
        return Ok(Vec::new());
    };
    let before = spans_of(from, cache)?.unwrap_or_default();
    let (removed, added) = changed_lines(old, new, &to.path)?;

    let mut touched = Vec::new();
    for (spans, lines) in [(&before, &removed), (&after, &added)] {
        touched.extend(
            spans
                .iter()
                .filter(|span| lines.iter().any(|&line| span.contains(line)))
                .map(summary),
        );
    }
    Ok(touched)
}

#[derive(Clone, Default)]
pub struct Shotness {
    nodes: NodeMap,
    /// Deletions and renames since this state was forked
    events: Vec<FileEvent>,
}

impl Shotness {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, event: FileEvent) {
        event.apply(&mut self.nodes);
        self.events.push(event);
    }
}

impl Component for Shotness {
    fn name(&self) -> &'static str {
        "Shotness"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_TREE_CHANGES, DEPENDENCY_BLOB_CACHE]
    }

    fn features(&self) -> Vec<&'static str> {
        vec![FEATURE_CODE_STRUCTURE]
    }

    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        self.nodes.clear();
        self.events.clear();
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        // The merged branch was already analysed on its own line
        if facts.is_merge()? {
            return Ok(Outputs::new());
        }
        let commit = facts.commit()?.id.short().to_string();
        let changes = facts.handle::<Vec<Change>>(DEPENDENCY_TREE_CHANGES)?;
        let cache = facts.handle::<BlobMap>(DEPENDENCY_BLOB_CACHE)?;

        let mut touched: BTreeSet<NodeSummary> = BTreeSet::new();
        for change in changes {
            let Some(to) = &change.to else {
                if let Some(from) = &change.from {
                    self.record(FileEvent::Deleted(from.path.clone()));
                }
                continue;
            };
            if let Some(from) = change.from.as_ref().filter(|from| from.path != to.path) {
                self.record(FileEvent::Renamed {
                    from: from.path.clone(),
                    to: to.path.clone(),
                });
            }
            match touched_in(change.from.as_ref(), to, cache) {
                Ok(nodes) => touched.extend(nodes),
                Err(e) => warn!("Shotness: skipped {} in {}: {:#}", to.path, commit, e),
            }
        }

        for node in &touched {
            let counts = self.nodes.entry(node.clone()).or_default();
            counts.count += 1;
            for other in touched.iter().filter(|other| *other != node) {
                *counts.couples.entry(other.clone()).or_default() += 1;
            }
        }
        Ok(Outputs::new())
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        (0..n)
            .map(|_| Box::new(Shotness::default()) as Box<dyn Component>)
            .collect()
    }

    fn merge(&mut self, siblings: Vec<Box<dyn Component>>) -> Result<()> {
        for sibling in downcast_siblings::<Shotness>(siblings)? {
            for event in &sibling.events {
                event.apply(&mut self.nodes);
                self.events.push(event.clone());
            }
            absorb(&mut self.nodes, &sibling.nodes);
        }
        Ok(())
    }

    fn as_leaf(&self) -> Option<&dyn Leaf> {
        Some(self)
    }

    fn as_leaf_mut(&mut self) -> Option<&mut dyn Leaf> {
        Some(self)
    }
}

impl Leaf for Shotness {
    fn flag(&self) -> &'static str {
        "shotness"
    }

    fn description(&self) -> &'static str {
        "Structural hotness - a fine-grained alternative to --couples. Counts how often each \
         function changed and how often every pair of functions changed in the same commit."
    }

    fn finalize(&self) -> Result<AnalysisResult> {
        Ok(Box::new(ShotnessResult::from_nodes(&self.nodes)))
    }

    fn serialize(&self, result: &AnalysisResult, binary: bool, sink: &mut dyn Write) -> Result<()> {
        let result = downcast_result::<ShotnessResult>(self.name(), result)?;
        if binary {
            let bytes = bitcode::serialize(result).context("Failed to encode Shotness")?;
            sink.write_all(&bytes)?;
            return Ok(());
        }
        for (node, counter) in result.nodes.iter().zip(&result.counters) {
            writeln!(sink, "  - name: {}", node.name)?;
            writeln!(sink, "    file: {}", node.file)?;
            writeln!(sink, "    kind: {}", node.kind)?;
            let counters: Vec<String> = counter
                .iter()
                .map(|(index, count)| format!("\"{}\":{}", index, count))
                .collect();
            writeln!(sink, "    counters: {{{}}}", counters.join(","))?;
        }
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<AnalysisResult> {
        let result: ShotnessResult =
            bitcode::deserialize(bytes).context("Failed to decode Shotness")?;
        Ok(Box::new(result))
    }

    fn as_result_merger(&self) -> Option<&dyn ResultMerger> {
        Some(self)
    }
}

impl ResultMerger for Shotness {
    fn merge_results(
        &self,
        left: &AnalysisResult,
        right: &AnalysisResult,
        _left_summary: &RunSummary,
        _right_summary: &RunSummary,
    ) -> Result<AnalysisResult> {
        let left = downcast_result::<ShotnessResult>(self.name(), left)?;
        let right = downcast_result::<ShotnessResult>(self.name(), right)?;
        let mut nodes = left.to_nodes(self.name())?;
        absorb(&mut nodes, &right.to_nodes(self.name())?);
        Ok(Box::new(ShotnessResult::from_nodes(&nodes)))
    }
}
