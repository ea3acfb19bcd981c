//! Developer activity per tick

use super::{remap, write_people, IdentityUnion, TickAlignment};
use crate::core::{
    downcast_result, downcast_siblings, AnalysisResult, Component, ConfigurationOption,
    FactStore, Leaf, OneShotMergeGuard, OptionKind, OptionValue, Options, Outputs, ResultMerger,
    RunContext, RunSummary,
};
use crate::plumbing::ticks::tick_seconds;
use crate::plumbing::{
    LineStats, LineStatsMap, People, DEPENDENCY_AUTHOR, DEPENDENCY_LINE_STATS, DEPENDENCY_PEOPLE,
    DEPENDENCY_TICK,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::ops::AddAssign;
use std::sync::Arc;

pub const CONFIG_CONSIDER_EMPTY_COMMITS: &str = "Devs.ConsiderEmptyCommits";

/// Activity of one developer during one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevStats {
    pub commits: u64,
    pub added: u64,
    pub removed: u64,
}

impl AddAssign for DevStats {
    fn add_assign(&mut self, other: Self) {
        self.commits += other.commits;
        self.added += other.added;
        self.removed += other.removed;
    }
}

/// tick → developer → activity
pub type DevTicks = BTreeMap<i64, BTreeMap<usize, DevStats>>;

fn add_ticks(into: &mut DevTicks, from: &DevTicks) {
    for (tick, devs) in from {
        let target = into.entry(*tick).or_default();
        for (dev, stats) in devs {
            *target.entry(*dev).or_default() += *stats;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevsResult {
    pub ticks: DevTicks,
    /// Developer index → identity
    pub people: Vec<String>,
    /// Tick size in seconds
    pub tick_size: i64,
}

#[derive(Clone, Default)]
pub struct Devs {
    consider_empty_commits: bool,
    tick_size: i64,
    ticks: DevTicks,
    people: Arc<People>,
    merges: OneShotMergeGuard,
}

impl Devs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the configuration with nothing accumulated
    fn empty_copy(&self) -> Self {
        Self {
            consider_empty_commits: self.consider_empty_commits,
            tick_size: self.tick_size,
            ticks: DevTicks::new(),
            people: Arc::clone(&self.people),
            merges: self.merges.clone(),
        }
    }
}

impl Component for Devs {
    fn name(&self) -> &'static str {
        "Devs"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![
            DEPENDENCY_AUTHOR,
            DEPENDENCY_PEOPLE,
            DEPENDENCY_TICK,
            DEPENDENCY_LINE_STATS,
        ]
    }

    fn configuration_options(&self) -> Vec<ConfigurationOption> {
        vec![ConfigurationOption {
            name: CONFIG_CONSIDER_EMPTY_COMMITS,
            description: "Count commits which change no lines.",
            flag: "empty-commits",
            kind: OptionKind::Bool,
            default: OptionValue::Bool(false),
        }]
    }

    fn configure(&mut self, options: &Options) -> Result<()> {
        if let Some(consider) = options.bool(CONFIG_CONSIDER_EMPTY_COMMITS)? {
            self.consider_empty_commits = consider;
        }
        self.tick_size = tick_seconds(options)?;
        Ok(())
    }

    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        if self.tick_size <= 0 {
            self.tick_size = tick_seconds(&Options::new())?;
        }
        self.ticks.clear();
        self.people = Arc::default();
        self.merges.reset();
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        if !self.merges.should_consume(facts)? {
            return Ok(Outputs::new());
        }
        self.people = facts.shared::<People>(DEPENDENCY_PEOPLE)?;
        let author = facts.int(DEPENDENCY_AUTHOR)? as usize;
        let tick = facts.int(DEPENDENCY_TICK)?;

        let mut stats = DevStats {
            commits: 1,
            ..Default::default()
        };
        if !facts.is_merge()? {
            let mut lines = LineStats::default();
            for file in facts.handle::<LineStatsMap>(DEPENDENCY_LINE_STATS)?.values() {
                lines += *file;
            }
            if lines == LineStats::default() && !self.consider_empty_commits {
                return Ok(Outputs::new());
            }
            stats.added = lines.added;
            stats.removed = lines.removed;
        }

        *self.ticks.entry(tick).or_default().entry(author).or_default() += stats;
        Ok(Outputs::new())
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        (0..n)
            .map(|_| Box::new(self.empty_copy()) as Box<dyn Component>)
            .collect()
    }

    fn merge(&mut self, siblings: Vec<Box<dyn Component>>) -> Result<()> {
        for sibling in downcast_siblings::<Devs>(siblings)? {
            add_ticks(&mut self.ticks, &sibling.ticks);
            self.merges.absorb(&sibling.merges);
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

impl Leaf for Devs {
    fn flag(&self) -> &'static str {
        "devs"
    }

    fn description(&self) -> &'static str {
        "Calculates the number of commits, added and removed lines per developer through time."
    }

    fn finalize(&self) -> Result<AnalysisResult> {
        Ok(Box::new(DevsResult {
            ticks: self.ticks.clone(),
            people: self.people.as_ref().clone(),
            tick_size: self.tick_size,
        }))
    }

    fn serialize(&self, result: &AnalysisResult, binary: bool, sink: &mut dyn Write) -> Result<()> {
        let result = downcast_result::<DevsResult>(self.name(), result)?;
        if binary {
            let bytes = bitcode::serialize(result).context("Failed to encode Devs")?;
            sink.write_all(&bytes)?;
            return Ok(());
        }
        writeln!(sink, "ticks:")?;
        for (tick, devs) in &result.ticks {
            writeln!(sink, "  {}:", tick)?;
            for (dev, stats) in devs {
                writeln!(
                    sink,
                    "    {}: [{}, {}, {}]",
                    dev, stats.commits, stats.added, stats.removed
                )?;
            }
        }
        write_people(sink, &result.people)?;
        writeln!(sink, "tick_size: {}", result.tick_size)?;
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<AnalysisResult> {
        let result: DevsResult = bitcode::deserialize(bytes).context("Failed to decode Devs")?;
        Ok(Box::new(result))
    }

    fn as_result_merger(&self) -> Option<&dyn ResultMerger> {
        Some(self)
    }
}

impl ResultMerger for Devs {
    fn merge_results(
        &self,
        left: &AnalysisResult,
        right: &AnalysisResult,
        left_summary: &RunSummary,
        right_summary: &RunSummary,
    ) -> Result<AnalysisResult> {
        let left = downcast_result::<DevsResult>(self.name(), left)?;
        let right = downcast_result::<DevsResult>(self.name(), right)?;
        let shift = TickAlignment::new(
            self.name(),
            left.tick_size,
            right.tick_size,
            left_summary,
            right_summary,
        )?;
        let union = IdentityUnion::new(&left.people, &right.people);

        let mut merged = DevsResult {
            ticks: DevTicks::new(),
            people: union.people.clone(),
            tick_size: left.tick_size,
        };
        for (side, offset, mapping) in [
            (left, shift.left, &union.left),
            (right, shift.right, &union.right),
        ] {
            for (tick, devs) in &side.ticks {
                let target = merged.ticks.entry(tick + offset).or_default();
                for (dev, stats) in devs {
                    *target.entry(remap(self.name(), mapping, *dev)?).or_default() += *stats;
                }
            }
        }
        Ok(Box::new(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Commit, Fact};
    use crate::plumbing::ticks::CONFIG_TICK_SIZE;

    fn facts(commit: Commit, author: i64, tick: i64, lines: &[(&str, u64, u64)]) -> FactStore {
        let mut store = FactStore::seeded(Arc::new(commit), 0);
        let people: People = vec!["alice|a@x".to_string(), "bob|b@x".to_string()];
        store.insert(DEPENDENCY_PEOPLE, Fact::handle(people));
        store.insert(DEPENDENCY_AUTHOR, Fact::Int(author));
        store.insert(DEPENDENCY_TICK, Fact::Int(tick));
        let stats: LineStatsMap = lines
            .iter()
            .map(|(path, added, removed)| {
                (
                    path.to_string(),
                    LineStats {
                        added: *added,
                        removed: *removed,
                    },
                )
            })
            .collect();
        store.insert(DEPENDENCY_LINE_STATS, Fact::handle(stats));
        store
    }

    fn devs() -> Result<Devs> {
        let mut devs = Devs::new();
        devs.configure(&Options::new())?;
        Ok(devs)
    }

    fn result_of(devs: &Devs) -> Result<DevsResult> {
        let result = devs.finalize()?;
        Ok(downcast_result::<DevsResult>("Devs", &result)?.clone())
    }

    #[test]
    fn test_counts_lines_and_merges() -> Result<()> {
        let mut devs = devs()?;
        devs.consume(&facts(Commit::new("1", &[]), 0, 0, &[("a", 3, 1), ("b", 2, 0)]))?;
        devs.consume(&facts(Commit::new("2", &["1"]), 1, 1, &[("a", 0, 4)]))?;
        devs.consume(&facts(Commit::new("3", &["1", "2"]), 0, 1, &[("a", 9, 9)]))?;
        devs.consume(&facts(Commit::new("4", &["3"]), 0, 2, &[]))?;

        let result = result_of(&devs)?;
        assert_eq!(result.ticks[&0][&0], DevStats { commits: 1, added: 5, removed: 1 });
        assert_eq!(result.ticks[&1][&1], DevStats { commits: 1, added: 0, removed: 4 });
        // The merge commit counts but brings no lines; the empty commit is ignored
        assert_eq!(result.ticks[&1][&0], DevStats { commits: 1, added: 0, removed: 0 });
        assert!(!result.ticks.contains_key(&2));
        assert_eq!(result.tick_size, 86_400);
        assert_eq!(result.people.len(), 2);
        Ok(())
    }

    #[test]
    fn test_empty_commits_option() -> Result<()> {
        let mut devs = Devs::new();
        devs.configure(
            &Options::new()
                .with(CONFIG_CONSIDER_EMPTY_COMMITS, OptionValue::Bool(true))
                .with(CONFIG_TICK_SIZE, OptionValue::Int(1)),
        )?;
        devs.consume(&facts(Commit::new("1", &[]), 1, 0, &[]))?;
        let result = result_of(&devs)?;
        assert_eq!(result.ticks[&0][&1].commits, 1);
        assert_eq!(result.tick_size, 3600);
        Ok(())
    }

    #[test]
    fn test_fork_starts_empty_and_merge_sums() -> Result<()> {
        let mut devs = devs()?;
        devs.consume(&facts(Commit::new("1", &[]), 0, 0, &[("a", 1, 0)]))?;
        let mut forks = devs.fork(1);
        forks[0].consume(&facts(Commit::new("2", &["1"]), 1, 0, &[("b", 2, 0)]))?;
        devs.consume(&facts(Commit::new("3", &["1"]), 0, 0, &[("a", 1, 0)]))?;
        devs.merge(forks)?;

        let result = result_of(&devs)?;
        assert_eq!(result.ticks[&0][&0], DevStats { commits: 2, added: 2, removed: 0 });
        assert_eq!(result.ticks[&0][&1], DevStats { commits: 1, added: 2, removed: 0 });
        Ok(())
    }

    #[test]
    fn test_binary_roundtrip() -> Result<()> {
        let mut devs = devs()?;
        devs.consume(&facts(Commit::new("1", &[]), 1, 4, &[("a", 7, 2)]))?;
        let result = devs.finalize()?;

        let mut bytes = Vec::new();
        devs.serialize(&result, true, &mut bytes)?;
        let decoded = devs.deserialize(&bytes)?;
        assert_eq!(
            downcast_result::<DevsResult>("Devs", &decoded)?,
            downcast_result::<DevsResult>("Devs", &result)?
        );

        let mut text = Vec::new();
        devs.serialize(&result, false, &mut text)?;
        let text = String::from_utf8(text)?;
        assert!(text.contains("  4:\n    1: [1, 7, 2]\n"));
        assert!(text.contains("  1: \"bob|b@x\""));
        Ok(())
    }

    #[test]
    fn test_merge_results_remaps_and_realigns() -> Result<()> {
        let day = 86_400;
        let left: AnalysisResult = Box::new(DevsResult {
            ticks: BTreeMap::from([(0, BTreeMap::from([(0, DevStats { commits: 1, added: 1, removed: 0 })]))]),
            people: vec!["alice".to_string()],
            tick_size: day,
        });
        let right: AnalysisResult = Box::new(DevsResult {
            ticks: BTreeMap::from([(0, BTreeMap::from([
                (0, DevStats { commits: 2, added: 0, removed: 3 }),
                (1, DevStats { commits: 1, added: 1, removed: 1 }),
            ]))]),
            people: vec!["bob".to_string(), "alice".to_string()],
            tick_size: day,
        });
        let mut early = RunSummary::new();
        early.record_commit(10 * day);
        let mut late = RunSummary::new();
        late.record_commit(12 * day + 5);

        let merged = Devs::new().merge_results(&left, &right, &early, &late)?;
        let merged = downcast_result::<DevsResult>("Devs", &merged)?;
        assert_eq!(merged.people, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(merged.ticks[&0][&0], DevStats { commits: 1, added: 1, removed: 0 });
        assert_eq!(merged.ticks[&2][&1], DevStats { commits: 2, added: 0, removed: 3 });
        assert_eq!(merged.ticks[&2][&0], DevStats { commits: 1, added: 1, removed: 1 });

        let hourly: AnalysisResult = Box::new(DevsResult {
            tick_size: 3600,
            ..Default::default()
        });
        assert!(Devs::new().merge_results(&left, &hourly, &early, &late).is_err());
        Ok(())
    }
}
