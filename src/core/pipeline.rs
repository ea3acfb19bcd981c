//! Pipeline: deployment, configuration and the commit-DAG executor
//!
//! ```text
//!  deploy / deploy_by_name ─► initialize(commits) ─► run(commits)
//!                               │                     │
//!                               ├ resolve order       ├ plan (fork / merge / commit)
//!                               ├ configure           ├ execute over branch arena
//!                               └ initialize          └ finalize leaves
//! ```
//!
//! Branch states live in an arena of slots indexed by [`BranchId`]. Slot 0
//! starts with the resolved component chain; forks fill fresh slots and merges
//! empty them. The traversal is single threaded and every planned commit is
//! consumed exactly once, on exactly one branch.

use crate::core::commit::Commit;
use crate::core::component::{
    AnalysisResult, Component, Leaf, OptionKind, OptionValue, Options, RunContext,
};
use crate::core::facts::{Fact, FactStore, SEED_KEYS};
use crate::core::plan::{plan, Action, BranchId};
use crate::core::registry::Registry;
use crate::core::resolve::{resolve, Deployed};
use crate::core::summary::RunSummary;
use crate::error::{EngineError, EngineResult};
use crate::git::RepositoryHandle;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Called after each commit with (commits done, total)
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Output of a successful run
pub struct RunResults {
    /// Finalized leaf results, keyed by leaf name
    pub results: BTreeMap<String, AnalysisResult>,
    pub summary: RunSummary,
}

type BranchState = Vec<Box<dyn Component>>;

/// A concrete, ordered set of component instances for one run
pub struct Pipeline<'r> {
    registry: &'r Registry,
    repository: RepositoryHandle,
    deployed: Vec<Deployed>,
    components: Vec<Box<dyn Component>>,
    /// Scheduling ordinals, parallel to `components`
    ordinals: Vec<usize>,
    features: HashSet<String>,
    options: Options,
    initial_facts: Vec<(String, Fact)>,
    first_parent: bool,
    progress: Option<ProgressCallback>,
    initialized: bool,
    adhoc: usize,
}

impl<'r> Pipeline<'r> {
    pub fn new(registry: &'r Registry, repository: RepositoryHandle) -> Self {
        Self {
            registry,
            repository,
            deployed: Vec::new(),
            components: Vec::new(),
            ordinals: Vec::new(),
            features: HashSet::new(),
            options: Options::new(),
            initial_facts: Vec::new(),
            first_parent: false,
            progress: None,
            initialized: false,
            adhoc: 0,
        }
    }

    pub fn repository(&self) -> &RepositoryHandle {
        &self.repository
    }

    /// Enable a feature tag for automatic deployment
    pub fn set_feature(&mut self, feature: impl Into<String>) {
        self.features.insert(feature.into());
    }

    pub fn features(&self) -> &HashSet<String> {
        &self.features
    }

    pub fn set_option(&mut self, name: impl Into<String>, value: OptionValue) {
        self.options.set(name, value);
    }

    pub fn set_options(&mut self, options: &Options) {
        self.options.merge_from(options);
    }

    /// Add a fact seeded into every commit pass
    pub fn set_fact(&mut self, key: impl Into<String>, fact: Fact) {
        let key = key.into();
        self.initial_facts.retain(|(k, _)| *k != key);
        self.initial_facts.push((key, fact));
    }

    pub fn set_first_parent(&mut self, first_parent: bool) {
        self.first_parent = first_parent;
    }

    pub fn set_progress(&mut self, callback: ProgressCallback) {
        self.progress = Some(callback);
    }

    fn is_deployed(&self, name: &str) -> bool {
        self.deployed.iter().any(|d| d.component.name() == name)
            || self.components.iter().any(|c| c.name() == name)
    }

    /// Deploy an instance that may not be in the registry.
    /// Ad-hoc components are scheduled after registered ones on ties.
    pub fn deploy(&mut self, component: Box<dyn Component>) {
        let ordinal = self.registry.len() + self.adhoc;
        self.adhoc += 1;
        debug!("deploying {}", component.name());
        self.deployed.push(Deployed { component, ordinal });
        self.initialized = false;
    }

    /// Deploy the first registered component named `name`. Deploying the same
    /// name twice is a no-op.
    pub fn deploy_by_name(&mut self, name: &str) -> EngineResult<()> {
        if self.is_deployed(name) {
            return Ok(());
        }
        let registration = self
            .registry
            .lookup(name)
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::UnknownComponent(name.to_string()))?;
        debug!("deploying {}", name);
        self.deployed.push(Deployed {
            component: registration.instantiate(),
            ordinal: registration.ordinal,
        });
        self.initialized = false;
        Ok(())
    }

    /// Deploy the leaf activated by a command-line flag
    pub fn deploy_leaf(&mut self, flag: &str) -> EngineResult<()> {
        let name = self
            .registry
            .leaf_by_flag(flag)
            .map(|r| r.name())
            .ok_or_else(|| EngineError::UnknownComponent(flag.to_string()))?;
        self.deploy_by_name(name)
    }

    /// Names of the resolved components, in execution order
    pub fn component_names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub fn component(&self, name: &str) -> Option<&dyn Component> {
        self.components
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Leaves of the resolved chain, in execution order
    pub fn leaves(&self) -> impl Iterator<Item = (&'static str, &dyn Leaf)> + '_ {
        self.components
            .iter()
            .filter_map(|c| c.as_leaf().map(|leaf| (c.name(), leaf)))
    }

    pub fn leaf(&self, name: &str) -> Option<&dyn Leaf> {
        self.leaves()
            .find(|(leaf_name, _)| *leaf_name == name)
            .map(|(_, leaf)| leaf)
    }

    /// Resolve, configure and initialize the deployed components.
    ///
    /// All configuration errors surface here, before any commit is touched.
    pub fn initialize(&mut self, commits: &[Commit]) -> EngineResult<()> {
        let mut satisfied: HashSet<String> = SEED_KEYS.iter().map(|k| k.to_string()).collect();
        satisfied.extend(self.initial_facts.iter().map(|(k, _)| k.clone()));

        // Already resolved components take part in a re-resolve
        let mut deployed: Vec<Deployed> = std::mem::take(&mut self.components)
            .into_iter()
            .zip(std::mem::take(&mut self.ordinals))
            .map(|(component, ordinal)| Deployed { component, ordinal })
            .collect();
        deployed.append(&mut self.deployed);
        let (mut chain, ordinals): (Vec<Box<dyn Component>>, Vec<usize>) =
            resolve(self.registry, deployed, &satisfied, &self.features)?
                .into_iter()
                .map(|d| (d.component, d.ordinal))
                .unzip();

        for component in chain.iter_mut() {
            check_option_kinds(component.as_ref(), &self.options)?;
            component
                .configure(&self.options)
                .map_err(|source| configure_error(component.name(), source))?;
        }

        let ctx = RunContext {
            repository: &self.repository,
            commits,
        };
        for component in chain.iter_mut() {
            component
                .initialize(&ctx)
                .map_err(|source| EngineError::InitializeFailed {
                    component: component.name().to_string(),
                    source,
                })?;
        }

        info!(
            "pipeline ready: {}",
            chain.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
        );
        self.components = chain;
        self.ordinals = ordinals;
        self.initialized = true;
        Ok(())
    }

    /// Drive `commits` through the pipeline and finalize every leaf.
    ///
    /// Any failure aborts the run. The branch states are lost with it, so the
    /// chain is redeployed from fresh copies and the pipeline must be
    /// initialized again before it can be reused.
    pub fn run(&mut self, commits: &[Commit]) -> EngineResult<RunResults> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        self.initialized = false;

        let spare = self.spare_chain()?;
        match self.traverse(commits) {
            Ok(results) => {
                self.initialized = true;
                Ok(results)
            }
            Err(err) => {
                warn!(
                    "run aborted, {} components redeployed for the next initialize",
                    spare.len()
                );
                self.components.clear();
                self.ordinals.clear();
                self.deployed = spare;
                Err(err)
            }
        }
    }

    /// Fresh instances of the resolved chain with their scheduling ordinals
    fn spare_chain(&self) -> EngineResult<Vec<Deployed>> {
        let mut spare = Vec::with_capacity(self.components.len());
        for (component, &ordinal) in self.components.iter().zip(&self.ordinals) {
            let copies = component.fork(1);
            let actual = copies.len();
            let Ok([copy]) = <[Box<dyn Component>; 1]>::try_from(copies) else {
                return Err(EngineError::ForkFailed {
                    component: component.name().to_string(),
                    expected: 1,
                    actual,
                });
            };
            spare.push(Deployed {
                component: copy,
                ordinal,
            });
        }
        Ok(spare)
    }

    fn traverse(&mut self, commits: &[Commit]) -> EngineResult<RunResults> {
        let plan = plan(commits, self.first_parent)?;
        info!(
            "processing {} commits ({} forks, {} merges)",
            commits.len(),
            plan.forks(),
            plan.merges()
        );

        let started = Instant::now();
        let mut summary = RunSummary::new();
        let shared: Vec<Arc<Commit>> = commits.iter().cloned().map(Arc::new).collect();

        let mut arena: Vec<Option<BranchState>> = (0..plan.branches).map(|_| None).collect();
        arena[0] = Some(std::mem::take(&mut self.components));

        let total = commits.len();
        let mut done = 0usize;
        for action in &plan.actions {
            trace!("{}", action);
            match action {
                Action::Commit { branch, commit } => {
                    let state = slot_mut(&mut arena, *branch)?;
                    let commit = &shared[*commit];
                    self.consume(state, Arc::clone(commit), done, &mut summary)?;
                    summary.record_commit(commit.time);
                    done += 1;
                    if let Some(progress) = &self.progress {
                        progress(done, total);
                    }
                }
                Action::Fork { from, into } => fork_branch(&mut arena, *from, into)?,
                Action::Merge { into, from } => merge_branches(&mut arena, *into, from)?,
            }
        }

        self.components = arena
            .get_mut(plan.final_branch)
            .and_then(Option::take)
            .ok_or_else(|| {
                EngineError::BrokenHistory(format!("branch {} holds no state", plan.final_branch))
            })?;

        let mut results = BTreeMap::new();
        for component in &self.components {
            let Some(leaf) = component.as_leaf() else {
                continue;
            };
            let result = leaf
                .finalize()
                .map_err(|source| EngineError::FinalizeFailed {
                    component: component.name().to_string(),
                    source,
                })?;
            results.insert(component.name().to_string(), result);
        }

        summary.run_time = started.elapsed();
        info!(
            "processed {} commits in {:.2}s",
            summary.commits,
            summary.run_time.as_secs_f64()
        );
        Ok(RunResults { results, summary })
    }

    fn consume(
        &self,
        state: &mut BranchState,
        commit: Arc<Commit>,
        index: usize,
        summary: &mut RunSummary,
    ) -> EngineResult<()> {
        let hash = commit.id.to_string();
        let mut facts = FactStore::seeded(commit, index);
        for (key, fact) in &self.initial_facts {
            facts.insert(key.clone(), fact.clone());
        }

        for component in state.iter_mut() {
            let name = component.name();
            if let Some(key) = component.requires().into_iter().find(|k| !facts.contains(k)) {
                return Err(EngineError::MissingRequirement {
                    component: name.to_string(),
                    key: key.to_string(),
                    commit: hash,
                });
            }

            let started = Instant::now();
            let outputs = component
                .consume(&facts)
                .map_err(|source| EngineError::ConsumeFailed {
                    component: name.to_string(),
                    commit: hash.clone(),
                    source,
                })?;
            summary.record_item_time(name, started.elapsed());

            let provides = component.provides();
            let undeclared = outputs
                .keys()
                .find(|k| !provides.iter().any(|p| *p == k.as_str()));
            if let Some(key) = undeclared {
                return Err(EngineError::UndeclaredOutput {
                    component: name.to_string(),
                    key: key.clone(),
                    commit: hash,
                });
            }
            facts.extend(outputs);
        }
        Ok(())
    }
}

fn slot_mut(arena: &mut [Option<BranchState>], branch: BranchId) -> EngineResult<&mut BranchState> {
    arena
        .get_mut(branch)
        .and_then(Option::as_mut)
        .ok_or_else(|| EngineError::BrokenHistory(format!("branch {} holds no state", branch)))
}

fn take_slot(arena: &mut [Option<BranchState>], branch: BranchId) -> EngineResult<BranchState> {
    arena
        .get_mut(branch)
        .and_then(Option::take)
        .ok_or_else(|| EngineError::BrokenHistory(format!("branch {} holds no state", branch)))
}

fn fork_branch(
    arena: &mut [Option<BranchState>],
    from: BranchId,
    into: &[BranchId],
) -> EngineResult<()> {
    let source = slot_mut(arena, from)?;
    let mut copies: Vec<BranchState> = (0..into.len())
        .map(|_| Vec::with_capacity(source.len()))
        .collect();
    for component in source.iter() {
        let forks = component.fork(into.len());
        if forks.len() != into.len() {
            return Err(EngineError::ForkFailed {
                component: component.name().to_string(),
                expected: into.len(),
                actual: forks.len(),
            });
        }
        for (copy, fork) in copies.iter_mut().zip(forks) {
            copy.push(fork);
        }
    }
    for (&slot, copy) in into.iter().zip(copies) {
        let target = arena.get_mut(slot).ok_or_else(|| {
            EngineError::BrokenHistory(format!("branch {} is out of range", slot))
        })?;
        *target = Some(copy);
    }
    debug!("forked branch {} into {:?}", from, into);
    Ok(())
}

fn merge_branches(
    arena: &mut [Option<BranchState>],
    into: BranchId,
    from: &[BranchId],
) -> EngineResult<()> {
    let mut donors = Vec::with_capacity(from.len());
    for &branch in from {
        donors.push(take_slot(arena, branch)?.into_iter());
    }
    let target = slot_mut(arena, into)?;
    for component in target.iter_mut() {
        let siblings: Vec<Box<dyn Component>> = donors.iter_mut().filter_map(Iterator::next).collect();
        component
            .merge(siblings)
            .map_err(|source| EngineError::MergeFailed {
                component: component.name().to_string(),
                source,
            })?;
    }
    debug!("merged branches {:?} into {}", from, into);
    Ok(())
}

/// Invalid option values keep their own variant; anything else is wrapped
fn configure_error(component: &str, source: anyhow::Error) -> EngineError {
    match source.downcast::<EngineError>() {
        Ok(err @ EngineError::InvalidOption { .. }) => err,
        Ok(err) => EngineError::ConfigureFailed {
            component: component.to_string(),
            source: err.into(),
        },
        Err(source) => EngineError::ConfigureFailed {
            component: component.to_string(),
            source,
        },
    }
}

fn check_option_kinds(component: &dyn Component, options: &Options) -> EngineResult<()> {
    for declared in component.configuration_options() {
        let Some(value) = options.get(declared.name) else {
            continue;
        };
        let matches = matches!(
            (declared.kind, value),
            (OptionKind::Bool, OptionValue::Bool(_))
                | (OptionKind::Int, OptionValue::Int(_))
                | (OptionKind::Float, OptionValue::Float(_) | OptionValue::Int(_))
                | (OptionKind::Text, OptionValue::Text(_))
                | (OptionKind::TextList, OptionValue::TextList(_) | OptionValue::Text(_))
        );
        if !matches {
            return Err(EngineError::InvalidOption {
                option: declared.name.to_string(),
                reason: format!("expected a {} value, got '{}'", declared.kind, value),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::component::{downcast_siblings, ConfigurationOption};
    use crate::core::facts::Outputs;

    /// Counts commits seen on its line of history
    #[derive(Clone, Default)]
    struct Counter {
        count: i64,
        merges_seen: usize,
    }

    impl Component for Counter {
        fn name(&self) -> &'static str {
            "Counter"
        }
        fn provides(&self) -> Vec<&'static str> {
            vec![]
        }
        fn requires(&self) -> Vec<&'static str> {
            vec!["commit"]
        }
        fn configuration_options(&self) -> Vec<ConfigurationOption> {
            vec![ConfigurationOption {
                name: "Counter.Start",
                description: "initial value",
                flag: "counter-start",
                kind: OptionKind::Int,
                default: OptionValue::Int(0),
            }]
        }
        fn configure(&mut self, options: &Options) -> anyhow::Result<()> {
            self.count = options.int("Counter.Start")?.unwrap_or(0);
            Ok(())
        }
        fn initialize(&mut self, _ctx: &RunContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
        fn consume(&mut self, _facts: &FactStore) -> anyhow::Result<Outputs> {
            self.count += 1;
            Ok(Outputs::new())
        }
        fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
            (0..n)
                .map(|_| Box::new(Counter::default()) as Box<dyn Component>)
                .collect()
        }
        fn merge(&mut self, siblings: Vec<Box<dyn Component>>) -> anyhow::Result<()> {
            for sibling in downcast_siblings::<Counter>(siblings)? {
                self.count += sibling.count;
            }
            self.merges_seen += 1;
            Ok(())
        }
    }

    /// Fails on the commit named by `Failing.OnCommit`
    #[derive(Clone, Default)]
    struct Failing {
        on_commit: String,
    }

    impl Component for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }
        fn provides(&self) -> Vec<&'static str> {
            vec![]
        }
        fn requires(&self) -> Vec<&'static str> {
            vec!["commit"]
        }
        fn configuration_options(&self) -> Vec<ConfigurationOption> {
            vec![ConfigurationOption {
                name: "Failing.OnCommit",
                description: "commit to fail on",
                flag: "failing-on-commit",
                kind: OptionKind::Text,
                default: OptionValue::Text(String::new()),
            }]
        }
        fn configure(&mut self, options: &Options) -> anyhow::Result<()> {
            self.on_commit = options.text("Failing.OnCommit")?.unwrap_or("").to_string();
            Ok(())
        }
        fn initialize(&mut self, _ctx: &RunContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
        fn consume(&mut self, facts: &FactStore) -> anyhow::Result<Outputs> {
            if facts.commit()?.id.as_str() == self.on_commit {
                anyhow::bail!("refusing {}", self.on_commit);
            }
            Ok(Outputs::new())
        }
        fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
            crate::core::component::fork_copies(self, n)
        }
    }

    fn diamond() -> Vec<Commit> {
        vec![
            Commit::new("a", &[]).with_time(10),
            Commit::new("b", &["a"]).with_time(20),
            Commit::new("c", &["a"]).with_time(30),
            Commit::new("m", &["b", "c"]).with_time(40),
        ]
    }

    fn final_counter(pipeline: &Pipeline<'_>) -> Counter {
        pipeline
            .components
            .iter()
            .find_map(|c| (**c).as_any().downcast_ref::<Counter>())
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_run_requires_initialize() {
        let registry = Registry::new();
        let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("test"));
        assert!(matches!(pipeline.run(&diamond()), Err(EngineError::NotInitialized)));
    }

    #[test]
    fn test_diamond_counts_every_commit_once() -> anyhow::Result<()> {
        let registry = Registry::new();
        let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("test"));
        pipeline.deploy(Box::new(Counter::default()));
        let commits = diamond();
        pipeline.initialize(&commits)?;
        let results = pipeline.run(&commits)?;

        let counter = final_counter(&pipeline);
        assert_eq!(counter.count, 4);
        assert_eq!(counter.merges_seen, 1);
        assert_eq!(results.summary.commits, 4);
        assert_eq!(results.summary.begin_time, 10);
        assert_eq!(results.summary.end_time, 40);
        assert!(results.summary.run_time_per_item.contains_key("Counter"));
        Ok(())
    }

    #[test]
    fn test_options_reach_components() -> anyhow::Result<()> {
        let registry = Registry::new();
        let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("test"));
        pipeline.deploy(Box::new(Counter::default()));
        pipeline.set_option("Counter.Start", OptionValue::Int(100));
        let commits = diamond();
        pipeline.initialize(&commits)?;
        pipeline.run(&commits)?;
        assert_eq!(final_counter(&pipeline).count, 104);
        Ok(())
    }

    #[test]
    fn test_option_of_wrong_kind_is_rejected() {
        let registry = Registry::new();
        let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("test"));
        pipeline.deploy(Box::new(Counter::default()));
        pipeline.set_option("Counter.Start", OptionValue::Text("ten".to_string()));
        let err = pipeline.initialize(&diamond()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOption { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_progress_is_reported_per_commit() -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let registry = Registry::new();
        let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("test"));
        pipeline.deploy(Box::new(Counter::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        pipeline.set_progress(Box::new(move |done, total| {
            assert!(done <= total);
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let commits = diamond();
        pipeline.initialize(&commits)?;
        pipeline.run(&commits)?;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[test]
    fn test_unknown_name_is_reported() {
        let registry = Registry::new();
        let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("test"));
        assert!(matches!(
            pipeline.deploy_by_name("Nope"),
            Err(EngineError::UnknownComponent(_))
        ));
        assert!(matches!(
            pipeline.deploy_leaf("--nope"),
            Err(EngineError::UnknownComponent(_))
        ));
    }

    #[test]
    fn test_failed_run_can_be_initialized_again() -> anyhow::Result<()> {
        let registry = Registry::new();
        let mut pipeline = Pipeline::new(&registry, RepositoryHandle::detached("test"));
        pipeline.deploy(Box::new(Counter::default()));
        pipeline.deploy(Box::new(Failing::default()));
        pipeline.set_option("Failing.OnCommit", OptionValue::Text("b".to_string()));
        let commits = diamond();
        pipeline.initialize(&commits)?;
        assert_eq!(pipeline.component_names(), vec!["Counter", "Failing"]);

        let err = pipeline.run(&commits).err();
        assert!(matches!(err, Some(EngineError::ConsumeFailed { ref commit, .. }) if commit == "b"));
        assert!(matches!(pipeline.run(&commits), Err(EngineError::NotInitialized)));

        pipeline.initialize(&commits)?;
        assert_eq!(pipeline.component_names(), vec!["Counter", "Failing"]);
        assert!(matches!(pipeline.run(&commits), Err(EngineError::ConsumeFailed { .. })));

        pipeline.set_option("Failing.OnCommit", OptionValue::Text(String::new()));
        pipeline.initialize(&commits)?;
        let results = pipeline.run(&commits)?;
        assert_eq!(results.summary.commits, 4);
        assert_eq!(final_counter(&pipeline).count, 4);
        Ok(())
    }
}
