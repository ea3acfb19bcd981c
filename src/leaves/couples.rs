//! Files changed together and files touched by each developer

use super::{remap, write_people, IdentityUnion};
use crate::core::{
    downcast_result, downcast_siblings, AnalysisResult, Component, FactStore, Leaf, Outputs,
    ResultMerger, RunContext, RunSummary,
};
use crate::plumbing::{
    Change, People, DEPENDENCY_AUTHOR, DEPENDENCY_PEOPLE, DEPENDENCY_TREE_CHANGES,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Commits touching more files than this only count towards developers
pub const MAX_MEANINGFUL_CONTEXT: usize = 1000;

/// file → file → number of commits changing both
pub type FileMatrix = BTreeMap<String, BTreeMap<String, u64>>;
/// developer → file → number of commits
pub type PeopleMatrix = BTreeMap<usize, BTreeMap<String, u64>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouplesResult {
    pub files: FileMatrix,
    pub people_files: PeopleMatrix,
    pub people: Vec<String>,
}

fn add_matrix<K: Ord + Clone>(
    into: &mut BTreeMap<K, BTreeMap<String, u64>>,
    key: K,
    row: &BTreeMap<String, u64>,
) {
    let target = into.entry(key).or_default();
    for (file, count) in row {
        *target.entry(file.clone()).or_default() += count;
    }
}

#[derive(Clone, Default)]
pub struct Couples {
    files: FileMatrix,
    people_files: PeopleMatrix,
    people: Arc<People>,
}

impl Couples {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for Couples {
    fn name(&self) -> &'static str {
        "Couples"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_TREE_CHANGES, DEPENDENCY_AUTHOR, DEPENDENCY_PEOPLE]
    }

    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        self.files.clear();
        self.people_files.clear();
        self.people = Arc::default();
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        self.people = facts.shared::<People>(DEPENDENCY_PEOPLE)?;
        if facts.is_merge()? {
            return Ok(Outputs::new());
        }
        let author = facts.int(DEPENDENCY_AUTHOR)? as usize;
        let paths: BTreeSet<&str> = facts
            .handle::<Vec<Change>>(DEPENDENCY_TREE_CHANGES)?
            .iter()
            .map(Change::path)
            .collect();

        let touched = self.people_files.entry(author).or_default();
        for path in &paths {
            *touched.entry(path.to_string()).or_default() += 1;
        }

        if paths.len() > MAX_MEANINGFUL_CONTEXT {
            debug!(
                "Couples: {} changes {} files, skipping file coupling",
                facts.commit()?.id.short(),
                paths.len()
            );
            return Ok(Outputs::new());
        }
        for a in &paths {
            let row = self.files.entry(a.to_string()).or_default();
            for b in &paths {
                *row.entry(b.to_string()).or_default() += 1;
            }
        }
        Ok(Outputs::new())
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        (0..n)
            .map(|_| {
                Box::new(Couples {
                    people: Arc::clone(&self.people),
                    ..Default::default()
                }) as Box<dyn Component>
            })
            .collect()
    }

    fn merge(&mut self, siblings: Vec<Box<dyn Component>>) -> Result<()> {
        for sibling in downcast_siblings::<Couples>(siblings)? {
            for (file, row) in &sibling.files {
                add_matrix(&mut self.files, file.clone(), row);
            }
            for (dev, row) in &sibling.people_files {
                add_matrix(&mut self.people_files, *dev, row);
            }
            if sibling.people.len() > self.people.len() {
                self.people = Arc::clone(&sibling.people);
            }
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

impl Leaf for Couples {
    fn flag(&self) -> &'static str {
        "couples"
    }

    fn description(&self) -> &'static str {
        "Gathers information about files changed together and files touched by each developer."
    }

    fn finalize(&self) -> Result<AnalysisResult> {
        Ok(Box::new(CouplesResult {
            files: self.files.clone(),
            people_files: self.people_files.clone(),
            people: self.people.as_ref().clone(),
        }))
    }

    fn serialize(&self, result: &AnalysisResult, binary: bool, sink: &mut dyn Write) -> Result<()> {
        let result = downcast_result::<CouplesResult>(self.name(), result)?;
        if binary {
            let bytes = bitcode::serialize(result).context("Failed to encode Couples")?;
            sink.write_all(&bytes)?;
            return Ok(());
        }
        writeln!(sink, "files:")?;
        for (file, row) in &result.files {
            writeln!(sink, "  {:?}:", file)?;
            for (other, count) in row {
                writeln!(sink, "    {:?}: {}", other, count)?;
            }
        }
        writeln!(sink, "people_files:")?;
        for (dev, row) in &result.people_files {
            writeln!(sink, "  {}:", dev)?;
            for (file, count) in row {
                writeln!(sink, "    {:?}: {}", file, count)?;
            }
        }
        write_people(sink, &result.people)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<AnalysisResult> {
        let result: CouplesResult =
            bitcode::deserialize(bytes).context("Failed to decode Couples")?;
        Ok(Box::new(result))
    }

    fn as_result_merger(&self) -> Option<&dyn ResultMerger> {
        Some(self)
    }
}

impl ResultMerger for Couples {
    fn merge_results(
        &self,
        left: &AnalysisResult,
        right: &AnalysisResult,
        _left_summary: &RunSummary,
        _right_summary: &RunSummary,
    ) -> Result<AnalysisResult> {
        let left = downcast_result::<CouplesResult>(self.name(), left)?;
        let right = downcast_result::<CouplesResult>(self.name(), right)?;
        let union = IdentityUnion::new(&left.people, &right.people);

        let mut merged = CouplesResult {
            people: union.people.clone(),
            ..Default::default()
        };
        for (side, mapping) in [(left, &union.left), (right, &union.right)] {
            for (file, row) in &side.files {
                add_matrix(&mut merged.files, file.clone(), row);
            }
            for (dev, row) in &side.people_files {
                add_matrix(&mut merged.people_files, remap(self.name(), mapping, *dev)?, row);
            }
        }
        Ok(Box::new(merged))
    }
}
