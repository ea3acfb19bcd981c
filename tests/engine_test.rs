//! Engine tests on synthetic histories
//!
//! These tests drive the public pipeline API with small hand-written
//! components and detached repositories, so no git is involved:
//! - dependency resolution and its configuration errors
//! - fork / merge at branch points
//! - run summaries and offline result merging

use anyhow::Result;
use lineage::core::{
    combine_reports, downcast_result, downcast_siblings, AnalysisResult, Commit, Component, Fact,
    FactStore, Leaf, OneShotMergeGuard, Outputs, Pipeline, Registry, ResultMerger, RunContext,
    RunSummary,
};
use lineage::git::RepositoryHandle;
use lineage::leaves::{Couples, CouplesResult, DevStats, Devs, DevsResult};
use lineage::reporters::{AnalysisReport, Metadata};
use lineage::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

/// Provides "x": the commit time
#[derive(Clone, Default)]
struct Source;

impl Component for Source {
    fn name(&self) -> &'static str {
        "Source"
    }
    fn provides(&self) -> Vec<&'static str> {
        vec!["x"]
    }
    fn requires(&self) -> Vec<&'static str> {
        vec![]
    }
    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }
    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        Ok(Outputs::from([("x".to_string(), Fact::Int(facts.commit()?.time))]))
    }
    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        lineage::core::fork_copies(self, n)
    }
}

/// Requires "x", provides "y" = 2x
#[derive(Clone, Default)]
struct Doubler;

impl Component for Doubler {
    fn name(&self) -> &'static str {
        "Doubler"
    }
    fn provides(&self) -> Vec<&'static str> {
        vec!["y"]
    }
    fn requires(&self) -> Vec<&'static str> {
        vec!["x"]
    }
    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }
    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        let x = facts.int("x")?;
        Ok(Outputs::from([("y".to_string(), Fact::Int(2 * x))]))
    }
    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        lineage::core::fork_copies(self, n)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CollectorResult {
    sum: i64,
    seen: BTreeMap<String, u32>,
    merges: usize,
}

/// Leaf summing "y" and recording every commit it consumed
#[derive(Clone, Default)]
struct Collector {
    state: CollectorResult,
    guard: OneShotMergeGuard,
}

impl Component for Collector {
    fn name(&self) -> &'static str {
        "Collector"
    }
    fn provides(&self) -> Vec<&'static str> {
        vec![]
    }
    fn requires(&self) -> Vec<&'static str> {
        vec!["y"]
    }
    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        self.state = CollectorResult::default();
        self.guard.reset();
        Ok(())
    }
    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        if !self.guard.should_consume(facts)? {
            return Ok(Outputs::new());
        }
        self.state.sum += facts.int("y")?;
        *self
            .state
            .seen
            .entry(facts.commit()?.id.as_str().to_string())
            .or_default() += 1;
        Ok(Outputs::new())
    }
    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        (0..n)
            .map(|_| {
                Box::new(Collector {
                    state: CollectorResult::default(),
                    guard: self.guard.clone(),
                }) as Box<dyn Component>
            })
            .collect()
    }
    fn merge(&mut self, siblings: Vec<Box<dyn Component>>) -> Result<()> {
        for sibling in downcast_siblings::<Collector>(siblings)? {
            self.state.sum += sibling.state.sum;
            for (id, count) in &sibling.state.seen {
                *self.state.seen.entry(id.clone()).or_default() += count;
            }
            self.state.merges += sibling.state.merges;
            self.guard.absorb(&sibling.guard);
        }
        self.state.merges += 1;
        Ok(())
    }
    fn as_leaf(&self) -> Option<&dyn Leaf> {
        Some(self)
    }
    fn as_leaf_mut(&mut self) -> Option<&mut dyn Leaf> {
        Some(self)
    }
}

impl Leaf for Collector {
    fn flag(&self) -> &'static str {
        "collect"
    }
    fn description(&self) -> &'static str {
        "Sums doubled commit times."
    }
    fn finalize(&self) -> Result<AnalysisResult> {
        Ok(Box::new(self.state.clone()))
    }
    fn serialize(&self, result: &AnalysisResult, binary: bool, sink: &mut dyn Write) -> Result<()> {
        let result = downcast_result::<CollectorResult>(self.name(), result)?;
        if binary {
            sink.write_all(&bitcode::serialize(result)?)?;
        } else {
            writeln!(sink, "sum: {}", result.sum)?;
        }
        Ok(())
    }
    fn deserialize(&self, bytes: &[u8]) -> Result<AnalysisResult> {
        Ok(Box::new(bitcode::deserialize::<CollectorResult>(bytes)?))
    }
}

/// Requires what it provides through a partner
#[derive(Clone)]
struct Loop {
    name: &'static str,
    provides: &'static str,
    requires: &'static str,
}

impl Component for Loop {
    fn name(&self) -> &'static str {
        self.name
    }
    fn provides(&self) -> Vec<&'static str> {
        vec![self.provides]
    }
    fn requires(&self) -> Vec<&'static str> {
        vec![self.requires]
    }
    fn initialize(&mut self, _ctx: &RunContext<'_>) -> Result<()> {
        Ok(())
    }
    fn consume(&mut self, _facts: &FactStore) -> Result<Outputs> {
        Ok(Outputs::new())
    }
    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        lineage::core::fork_copies(self, n)
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_default::<Source>();
    registry.register_default::<Doubler>();
    registry.register_default::<Collector>();
    registry
}

/// A - B - D
///  \     /
///   - C -
fn diamond() -> Vec<Commit> {
    vec![
        Commit::new("a", &[]).with_time(1),
        Commit::new("b", &["a"]).with_time(10),
        Commit::new("c", &["a"]).with_time(100),
        Commit::new("d", &["b", "c"]).with_time(1000),
    ]
}

fn collect(registry: &Registry, commits: &[Commit]) -> Result<(CollectorResult, RunSummary)> {
    let mut pipeline = Pipeline::new(registry, RepositoryHandle::detached("synthetic"));
    pipeline.deploy_leaf("collect")?;
    pipeline.initialize(commits)?;
    let mut results = pipeline.run(commits)?;
    let result = results
        .results
        .remove("Collector")
        .ok_or_else(|| anyhow::anyhow!("no Collector result"))?;
    let result = downcast_result::<CollectorResult>("Collector", &result)?.clone();
    Ok((result, results.summary))
}

#[test]
fn test_requirements_are_deployed_first() -> Result<()> {
    let registry = registry();
    let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("synthetic"));
    pipeline.deploy_by_name("Collector")?;
    pipeline.initialize(&diamond())?;
    assert_eq!(pipeline.component_names(), vec!["Source", "Doubler", "Collector"]);
    Ok(())
}

#[test]
fn test_missing_provider_names_the_key() {
    let mut registry = registry();
    assert_eq!(registry.remove("Source"), 1);

    let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("synthetic"));
    pipeline.deploy_by_name("Collector").unwrap();
    let err = pipeline.initialize(&diamond()).unwrap_err();
    match &err {
        EngineError::MissingDependency {
            key, required_by, ..
        } => {
            assert_eq!(key, "x");
            assert_eq!(required_by, "Doubler");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().contains("\"x\""));
}

#[test]
fn test_cycle_is_rejected_before_any_commit() {
    let mut registry = Registry::new();
    registry.register(|| {
        Box::new(Loop {
            name: "Ping",
            provides: "ping",
            requires: "pong",
        })
    });
    registry.register(|| {
        Box::new(Loop {
            name: "Pong",
            provides: "pong",
            requires: "ping",
        })
    });

    let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("synthetic"));
    pipeline.deploy_by_name("Ping").unwrap();
    let err = pipeline.initialize(&diamond()).unwrap_err();
    assert!(matches!(err, EngineError::DependencyCycle { .. }));
    assert!(err.is_configuration());
}

#[test]
fn test_branches_match_linear_history() -> Result<()> {
    let registry = registry();
    let (branched, _) = collect(&registry, &diamond())?;

    let linear = vec![
        Commit::new("a", &[]).with_time(1),
        Commit::new("b", &["a"]).with_time(10),
        Commit::new("c", &["b"]).with_time(100),
        Commit::new("d", &["c"]).with_time(1000),
    ];
    let (straight, _) = collect(&registry, &linear)?;

    assert_eq!(branched.sum, straight.sum);
    assert_eq!(branched.seen, straight.seen);
    assert_eq!(branched.sum, 2 * 1111);
    Ok(())
}

#[test]
fn test_merge_commit_is_consumed_once_after_one_merge() -> Result<()> {
    let (result, summary) = collect(&registry(), &diamond())?;
    assert_eq!(result.merges, 1);
    assert!(result.seen.values().all(|&count| count == 1));
    assert_eq!(result.seen.len(), 4);
    assert_eq!(summary.commits, 4);
    Ok(())
}

/// A - B
///  \   \
///   --- M
#[test]
fn test_merge_of_parent_and_child_is_consumed_once() -> Result<()> {
    let commits = vec![
        Commit::new("a", &[]).with_time(1),
        Commit::new("b", &["a"]).with_time(10),
        Commit::new("m", &["a", "b"]).with_time(100),
    ];
    let (result, summary) = collect(&registry(), &commits)?;
    assert_eq!(result.merges, 1);
    assert!(result.seen.values().all(|&count| count == 1));
    assert_eq!(result.seen.len(), 3);
    assert_eq!(result.sum, 2 * 111);
    assert_eq!(summary.commits, 3);
    Ok(())
}

#[test]
fn test_summary_of_split_runs_matches_whole_run() -> Result<()> {
    let registry = registry();
    let commits = diamond();
    let (_, whole) = collect(&registry, &commits)?;
    let (_, first) = collect(&registry, &commits[..2])?;
    let (_, second) = collect(&registry, &[Commit::new("c", &[]).with_time(100), commits[3].clone()])?;

    let combined = first.clone().merged(&second);
    assert_eq!(combined.commits, whole.commits);
    assert_eq!(combined.begin_time, whole.begin_time);
    assert_eq!(combined.end_time, whole.end_time);
    assert_eq!(first.clone().merged(&RunSummary::new()), first);
    Ok(())
}

#[test]
fn test_leaf_binary_roundtrip() -> Result<()> {
    let registry = registry();
    let (result, _) = collect(&registry, &diamond())?;
    let collector = Collector::default();
    let boxed: AnalysisResult = Box::new(result.clone());

    let mut bytes = Vec::new();
    collector.serialize(&boxed, true, &mut bytes)?;
    let decoded = collector.deserialize(&bytes)?;
    assert_eq!(downcast_result::<CollectorResult>("Collector", &decoded)?, &result);
    Ok(())
}

fn devs_result(people: &[&str], ticks: &[(i64, usize, u64)]) -> AnalysisResult {
    let mut result = DevsResult {
        people: people.iter().map(|p| p.to_string()).collect(),
        tick_size: 86_400,
        ..Default::default()
    };
    for &(tick, dev, commits) in ticks {
        result.ticks.entry(tick).or_default().insert(
            dev,
            DevStats {
                commits,
                added: commits * 10,
                removed: commits,
            },
        );
    }
    Box::new(result)
}

fn summary_at(day: i64) -> RunSummary {
    let mut summary = RunSummary::new();
    summary.record_commit(day * 86_400 + 3600);
    summary
}

#[test]
fn test_devs_result_merge_is_associative() -> Result<()> {
    let devs = Devs::default();
    let a = devs_result(&["alice|a@x"], &[(0, 0, 1), (2, 0, 1)]);
    let b = devs_result(&["bob|b@x", "alice|a@x"], &[(0, 0, 2), (1, 1, 1)]);
    let c = devs_result(&["carol|c@x", "bob|b@x"], &[(0, 0, 1), (0, 1, 4)]);
    let (sa, sb, sc) = (summary_at(100), summary_at(101), summary_at(99));

    let ab = devs.merge_results(&a, &b, &sa, &sb)?;
    let left = devs.merge_results(&ab, &c, &sa.clone().merged(&sb), &sc)?;
    let bc = devs.merge_results(&b, &c, &sb, &sc)?;
    let right = devs.merge_results(&a, &bc, &sa, &sb.clone().merged(&sc))?;

    let left = downcast_result::<DevsResult>("Devs", &left)?;
    let right = downcast_result::<DevsResult>("Devs", &right)?;
    assert_eq!(left, right);
    assert_eq!(left.people, vec!["alice|a@x", "bob|b@x", "carol|c@x"]);
    // carol's run starts on day 99, which becomes tick 0
    assert_eq!(left.ticks[&0][&2].commits, 1);
    assert_eq!(left.ticks[&1][&0].commits, 1);
    assert_eq!(left.ticks[&0][&1].commits, 4);
    assert_eq!(left.ticks[&3][&0].commits, 2);
    Ok(())
}

#[test]
fn test_devs_results_with_different_ticks_are_incompatible() {
    let devs = Devs::default();
    let daily = devs_result(&["alice"], &[(0, 0, 1)]);
    let mut hourly = DevsResult {
        people: vec!["alice".to_string()],
        tick_size: 3600,
        ..Default::default()
    };
    hourly.ticks.entry(0).or_default().insert(0, DevStats::default());
    let hourly: AnalysisResult = Box::new(hourly);

    let err = devs
        .merge_results(&daily, &hourly, &summary_at(1), &summary_at(1))
        .unwrap_err();
    assert!(err.to_string().contains("tick sizes differ"));
}

fn report(
    name: &str,
    leaf: &dyn Leaf,
    result: &AnalysisResult,
    summary: &RunSummary,
) -> Result<(String, AnalysisReport)> {
    let mut report = AnalysisReport::new(Metadata::from_summary(name, summary));
    let mut blob = Vec::new();
    leaf.serialize(result, true, &mut blob)?;
    report.contents.insert("Couples".to_string(), blob);
    report.seal();
    Ok((format!("{}.bin", name), report))
}

#[test]
fn test_combine_collects_failures_and_merges_the_rest() -> Result<()> {
    let mut registry = Registry::new();
    registry.register_default::<Couples>();
    registry.register_default::<Collector>();
    let couples = Couples::default();

    let mut first = CouplesResult {
        people: vec!["alice".to_string()],
        ..Default::default()
    };
    first.files.entry("a".to_string()).or_default().insert("a".to_string(), 1);
    let mut second = CouplesResult {
        people: vec!["bob".to_string()],
        ..Default::default()
    };
    second.files.entry("a".to_string()).or_default().insert("a".to_string(), 2);

    let mut reports = vec![
        report("one", &couples, &(Box::new(first) as AnalysisResult), &summary_at(1))?,
        report("two", &couples, &(Box::new(second) as AnalysisResult), &summary_at(2))?,
    ];
    // Collector has no result merger
    let collector = Collector::default();
    let collected: AnalysisResult = Box::new(CollectorResult::default());
    for (_, report) in reports.iter_mut() {
        let mut blob = Vec::new();
        collector.serialize(&collected, true, &mut blob)?;
        report.contents.insert("Collector".to_string(), blob);
        report.seal();
    }

    let combined = combine_reports(&registry, &reports, None);
    assert_eq!(combined.failures.len(), 1);
    assert_eq!(combined.failures[0].subject, "Collector");
    assert_eq!(combined.report.header.repository, "one & two");
    assert_eq!(combined.report.header.commits, 2);
    assert!(combined.report.verify());

    let merged = couples.deserialize(&combined.report.contents["Couples"])?;
    let merged = downcast_result::<CouplesResult>("Couples", &merged)?;
    assert_eq!(merged.files["a"]["a"], 3);
    assert_eq!(merged.people, vec!["alice", "bob"]);
    Ok(())
}
