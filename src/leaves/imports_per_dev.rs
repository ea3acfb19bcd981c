//! Imports used by each developer over time

use super::{remap, write_people, IdentityUnion, TickAlignment};
use crate::core::{
    downcast_result, downcast_siblings, AnalysisResult, Component, FactStore, Leaf, Options,
    Outputs, ResultMerger, RunContext, RunSummary,
};
use crate::plumbing::ticks::tick_seconds;
use crate::plumbing::{
    ImportMap, People, DEPENDENCY_AUTHOR, DEPENDENCY_IMPORTS, DEPENDENCY_PEOPLE, DEPENDENCY_TICK,
    FEATURE_CODE_STRUCTURE,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

/// developer → language → import → tick → files
pub type ImportsHistory = BTreeMap<usize, BTreeMap<String, BTreeMap<String, BTreeMap<i64, u64>>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportsPerDeveloperResult {
    pub imports: ImportsHistory,
    pub people: Vec<String>,
    /// Tick size in seconds
    pub tick_size: i64,
}

/// Add `from` to `into`, moving developers through `developer` and ticks by `offset`
fn add_history(
    into: &mut ImportsHistory,
    from: &ImportsHistory,
    offset: i64,
    mut developer: impl FnMut(usize) -> Result<usize>,
) -> Result<()> {
    for (dev, languages) in from {
        let target = into.entry(developer(*dev)?).or_default();
        for (language, imports) in languages {
            let target = target.entry(language.clone()).or_default();
            for (import, ticks) in imports {
                let target = target.entry(import.clone()).or_default();
                for (tick, count) in ticks {
                    *target.entry(tick + offset).or_default() += count;
                }
            }
        }
    }
    Ok(())
}

#[derive(Clone, Default)]
pub struct ImportsPerDeveloper {
    tick_size: i64,
    imports: ImportsHistory,
    people: Arc<People>,
}

impl ImportsPerDeveloper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Component for ImportsPerDeveloper {
    fn name(&self) -> &'static str {
        "ImportsPerDeveloper"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![
            DEPENDENCY_IMPORTS,
            DEPENDENCY_AUTHOR,
            DEPENDENCY_PEOPLE,
            DEPENDENCY_TICK,
        ]
    }

    fn features(&self) -> Vec<&'static str> {
        vec![FEATURE_CODE_STRUCTURE]
    }

    fn configure(&mut self, options: &Options) -> Result<()> {
        self.tick_size = tick_seconds(options)?;
        Ok(())
    }

    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        if self.tick_size <= 0 {
            self.tick_size = tick_seconds(&Options::new())?;
        }
        self.imports.clear();
        self.people = Arc::default();
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        self.people = facts.shared::<People>(DEPENDENCY_PEOPLE)?;
        // A merge diffs against its first parent only; its files were
        // already accounted on the merged line
        if facts.is_merge()? {
            return Ok(Outputs::new());
        }
        let author = facts.int(DEPENDENCY_AUTHOR)? as usize;
        let tick = facts.int(DEPENDENCY_TICK)?;
        let files = facts.handle::<ImportMap>(DEPENDENCY_IMPORTS)?;

        let languages = self.imports.entry(author).or_default();
        for file in files.values() {
            let imports = languages.entry(file.language.clone()).or_default();
            for import in &file.imports {
                *imports
                    .entry(import.clone())
                    .or_default()
                    .entry(tick)
                    .or_default() += 1;
            }
        }
        Ok(Outputs::new())
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        (0..n)
            .map(|_| {
                Box::new(ImportsPerDeveloper {
                    tick_size: self.tick_size,
                    imports: ImportsHistory::new(),
                    people: Arc::clone(&self.people),
                }) as Box<dyn Component>
            })
            .collect()
    }

    fn merge(&mut self, siblings: Vec<Box<dyn Component>>) -> Result<()> {
        for sibling in downcast_siblings::<ImportsPerDeveloper>(siblings)? {
            add_history(&mut self.imports, &sibling.imports, 0, Ok)?;
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

impl Leaf for ImportsPerDeveloper {
    fn flag(&self) -> &'static str {
        "imports-per-dev"
    }

    fn description(&self) -> &'static str {
        "Who used which imports in which programming languages through time."
    }

    fn finalize(&self) -> Result<AnalysisResult> {
        Ok(Box::new(ImportsPerDeveloperResult {
            imports: self.imports.clone(),
            people: self.people.as_ref().clone(),
            tick_size: self.tick_size,
        }))
    }

    fn serialize(&self, result: &AnalysisResult, binary: bool, sink: &mut dyn Write) -> Result<()> {
        let result = downcast_result::<ImportsPerDeveloperResult>(self.name(), result)?;
        if binary {
            let bytes =
                bitcode::serialize(result).context("Failed to encode ImportsPerDeveloper")?;
            sink.write_all(&bytes)?;
            return Ok(());
        }
        writeln!(sink, "imports:")?;
        for (dev, languages) in &result.imports {
            writeln!(sink, "  {}:", dev)?;
            for (language, imports) in languages {
                writeln!(sink, "    {:?}:", language)?;
                for (import, ticks) in imports {
                    let ticks: Vec<String> = ticks
                        .iter()
                        .map(|(tick, count)| format!("{}: {}", tick, count))
                        .collect();
                    writeln!(sink, "      {:?}: {{{}}}", import, ticks.join(", "))?;
                }
            }
        }
        write_people(sink, &result.people)?;
        writeln!(sink, "tick_size: {}", result.tick_size)?;
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<AnalysisResult> {
        let result: ImportsPerDeveloperResult =
            bitcode::deserialize(bytes).context("Failed to decode ImportsPerDeveloper")?;
        Ok(Box::new(result))
    }

    fn as_result_merger(&self) -> Option<&dyn ResultMerger> {
        Some(self)
    }
}

impl ResultMerger for ImportsPerDeveloper {
    fn merge_results(
        &self,
        left: &AnalysisResult,
        right: &AnalysisResult,
        left_summary: &RunSummary,
        right_summary: &RunSummary,
    ) -> Result<AnalysisResult> {
        let left = downcast_result::<ImportsPerDeveloperResult>(self.name(), left)?;
        let right = downcast_result::<ImportsPerDeveloperResult>(self.name(), right)?;
        let shift = TickAlignment::new(
            self.name(),
            left.tick_size,
            right.tick_size,
            left_summary,
            right_summary,
        )?;
        let union = IdentityUnion::new(&left.people, &right.people);

        let mut merged = ImportsPerDeveloperResult {
            imports: ImportsHistory::new(),
            people: union.people.clone(),
            tick_size: left.tick_size,
        };
        add_history(&mut merged.imports, &left.imports, shift.left, |dev| {
            remap(self.name(), &union.left, dev)
        })?;
        add_history(&mut merged.imports, &right.imports, shift.right, |dev| {
            remap(self.name(), &union.right, dev)
        })?;
        Ok(Box::new(merged))
    }
}
