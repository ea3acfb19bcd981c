//! Commit plan
//!
//! Before anything runs, the requested commits are compiled into a flat list
//! of actions over numbered branch slots:
//!
//! ```text
//!   a ── b ──── m          Commit(0, a)
//!    \        /            Fork(0 → [1])
//!     └─ c ──┘             Commit(0, b)
//!                          Commit(1, c)
//!                          Merge(0 ← [1])
//!                          Commit(0, m)
//! ```
//!
//! Each edge of the commit graph carries exactly one branch. Consuming a
//! commit with k children forks k-1 new branches; reaching a commit with
//! several parents merges all incoming branches but one into the survivor
//! first. Merged slots are freed and reused, so the number of live branches
//! tracks the width of the history, not its length.

use crate::core::commit::{Commit, CommitId};
use crate::error::{EngineError, EngineResult};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

/// Index of a branch slot in the executor's arena
pub type BranchId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Drive commit `commit` (index into the planned commit slice) through
    /// the components of `branch`
    Commit { branch: BranchId, commit: usize },
    /// Replicate `from` into the fresh slots `into`
    Fork { from: BranchId, into: Vec<BranchId> },
    /// Fold `from` into `into`; the `from` slots are released
    Merge { into: BranchId, from: Vec<BranchId> },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Commit { branch, commit } => write!(f, "commit #{} on {}", commit, branch),
            Action::Fork { from, into } => write!(f, "fork {} -> {:?}", from, into),
            Action::Merge { into, from } => write!(f, "merge {:?} -> {}", from, into),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<Action>,
    /// Number of arena slots needed
    pub branches: usize,
    /// Slot holding the reconciled state after the last action
    pub final_branch: BranchId,
}

impl Plan {
    /// Commit indices in execution order
    pub fn commit_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.actions.iter().filter_map(|a| match a {
            Action::Commit { commit, .. } => Some(*commit),
            _ => None,
        })
    }

    pub fn merges(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Merge { .. }))
            .count()
    }

    pub fn forks(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Fork { .. }))
            .count()
    }
}

/// Slot allocator: lowest free id first
struct Slots {
    free: BinaryHeap<Reverse<BranchId>>,
    next: BranchId,
}

impl Slots {
    fn new() -> Self {
        Self {
            free: BinaryHeap::new(),
            next: 1,
        }
    }

    fn allocate(&mut self) -> BranchId {
        if let Some(Reverse(id)) = self.free.pop() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    fn release(&mut self, id: BranchId) {
        self.free.push(Reverse(id));
    }
}

/// Compile `commits` into a plan.
///
/// Parents outside `commits` are ignored. With `first_parent` the commits run
/// on a single branch and no fork or merge is ever emitted.
pub fn plan(commits: &[Commit], first_parent: bool) -> EngineResult<Plan> {
    if commits.is_empty() {
        return Ok(Plan {
            actions: vec![],
            branches: 1,
            final_branch: 0,
        });
    }

    let mut index: HashMap<&CommitId, usize> = HashMap::with_capacity(commits.len());
    for (i, commit) in commits.iter().enumerate() {
        if index.insert(&commit.id, i).is_some() {
            return Err(EngineError::BrokenHistory(format!(
                "commit {} is listed twice",
                commit.id.short()
            )));
        }
    }

    // In-set parents, deduplicated, first parent first
    let parents: Vec<Vec<usize>> = commits
        .iter()
        .map(|commit| {
            let mut seen = HashSet::new();
            let in_set = commit
                .parents
                .iter()
                .filter_map(|p| index.get(p).copied())
                .filter(|p| seen.insert(*p));
            if first_parent {
                in_set.take(1).collect()
            } else {
                in_set.collect()
            }
        })
        .collect();

    let order = topological_order(commits, &parents)?;

    if first_parent {
        return Ok(Plan {
            actions: order
                .into_iter()
                .map(|commit| Action::Commit { branch: 0, commit })
                .collect(),
            branches: 1,
            final_branch: 0,
        });
    }

    let mut position = vec![0usize; commits.len()];
    for (pos, &c) in order.iter().enumerate() {
        position[c] = pos;
    }
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); commits.len()];
    for &c in &order {
        for &p in &parents[c] {
            children[p].push(c);
        }
    }
    for list in &mut children {
        list.sort_by_key(|&c| position[c]);
    }

    let mut actions = Vec::with_capacity(commits.len() * 2);
    let mut slots = Slots::new();
    // (parent, child) -> branch parked on that edge
    let mut edges: HashMap<(usize, usize), BranchId> = HashMap::new();
    let mut ended: Vec<BranchId> = Vec::new();

    // Every root after the first starts from a pristine copy of the initial state
    let roots: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&c| parents[c].is_empty())
        .collect();
    let mut root_branches: HashMap<usize, BranchId> = HashMap::new();
    root_branches.insert(roots[0], 0);
    if roots.len() > 1 {
        let into: Vec<BranchId> = roots[1..].iter().map(|_| slots.allocate()).collect();
        for (&root, &branch) in roots[1..].iter().zip(&into) {
            root_branches.insert(root, branch);
        }
        actions.push(Action::Fork { from: 0, into });
    }

    let mut last_branch = 0;
    for &c in &order {
        let branch = if parents[c].is_empty() {
            root_branches.get(&c).copied().ok_or_else(|| {
                EngineError::BrokenHistory(format!("root {} was not planned", commits[c].id.short()))
            })?
        } else {
            let mut incoming: Vec<BranchId> = Vec::with_capacity(parents[c].len());
            for &p in &parents[c] {
                let branch = edges.remove(&(p, c)).ok_or_else(|| {
                    EngineError::BrokenHistory(format!(
                        "no branch reaches {} from {}",
                        commits[c].id.short(),
                        commits[p].id.short()
                    ))
                })?;
                incoming.push(branch);
            }
            let survivor = incoming.iter().copied().min().unwrap_or(0);
            let from: Vec<BranchId> = incoming.into_iter().filter(|&b| b != survivor).collect();
            if !from.is_empty() {
                for &b in &from {
                    slots.release(b);
                }
                actions.push(Action::Merge {
                    into: survivor,
                    from,
                });
            }
            survivor
        };

        actions.push(Action::Commit { branch, commit: c });
        last_branch = branch;

        match children[c].as_slice() {
            [] => ended.push(branch),
            [only] => {
                edges.insert((c, *only), branch);
            }
            [first, rest @ ..] => {
                edges.insert((c, *first), branch);
                let into: Vec<BranchId> = rest.iter().map(|_| slots.allocate()).collect();
                for (&child, &b) in rest.iter().zip(&into) {
                    edges.insert((c, child), b);
                }
                actions.push(Action::Fork { from: branch, into });
            }
        }
    }

    let from: Vec<BranchId> = ended.into_iter().filter(|&b| b != last_branch).collect();
    if !from.is_empty() {
        actions.push(Action::Merge {
            into: last_branch,
            from,
        });
    }

    Ok(Plan {
        actions,
        branches: slots.next,
        final_branch: last_branch,
    })
}

/// Kahn's algorithm; ready commits are taken in input order
fn topological_order(commits: &[Commit], parents: &[Vec<usize>]) -> EngineResult<Vec<usize>> {
    let mut pending: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); commits.len()];
    for (c, ps) in parents.iter().enumerate() {
        for &p in ps {
            children[p].push(c);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..commits.len())
        .filter(|&c| pending[c] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(commits.len());
    while let Some(Reverse(c)) = ready.pop() {
        order.push(c);
        for &child in &children[c] {
            pending[child] -= 1;
            if pending[child] == 0 {
                ready.push(Reverse(child));
            }
        }
    }

    if order.len() != commits.len() {
        let stuck: Vec<&str> = (0..commits.len())
            .filter(|&c| pending[c] > 0)
            .map(|c| commits[c].id.short())
            .collect();
        return Err(EngineError::BrokenHistory(format!(
            "parent links form a cycle through {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(edges: &[(&str, &[&str])]) -> Vec<Commit> {
        edges.iter()
            .map(|(id, parents)| Commit::new(*id, parents))
            .collect()
    }

    #[test]
    fn test_linear_history_has_no_forks() -> anyhow::Result<()> {
        let commits = history(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let plan = plan(&commits, false)?;
        assert_eq!(plan.forks(), 0);
        assert_eq!(plan.merges(), 0);
        assert_eq!(plan.commit_order().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(plan.branches, 1);
        Ok(())
    }

    #[test]
    fn test_diamond() -> anyhow::Result<()> {
        let commits = history(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("m", &["b", "c"])]);
        let plan = plan(&commits, false)?;
        assert_eq!(
            plan.actions,
            vec![
                Action::Commit { branch: 0, commit: 0 },
                Action::Fork { from: 0, into: vec![1] },
                Action::Commit { branch: 0, commit: 1 },
                Action::Commit { branch: 1, commit: 2 },
                Action::Merge { into: 0, from: vec![1] },
                Action::Commit { branch: 0, commit: 3 },
            ]
        );
        assert_eq!(plan.final_branch, 0);
        assert_eq!(plan.branches, 2);
        Ok(())
    }

    #[test]
    fn test_merge_of_already_visited_parents() -> anyhow::Result<()> {
        // a -> b, and m merges a and b
        let commits = history(&[("a", &[]), ("b", &["a"]), ("m", &["a", "b"])]);
        let plan = plan(&commits, false)?;
        assert_eq!(plan.merges(), 1);
        let merge_at = plan
            .actions
            .iter()
            .position(|a| matches!(a, Action::Merge { .. }))
            .unwrap();
        assert_eq!(
            plan.actions[merge_at + 1],
            Action::Commit { branch: 0, commit: 2 }
        );
        Ok(())
    }

    #[test]
    fn test_slots_are_reused() -> anyhow::Result<()> {
        // two consecutive diamonds need only two slots
        let commits = history(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("m", &["b", "c"]),
            ("d", &["m"]),
            ("e", &["m"]),
            ("n", &["d", "e"]),
        ]);
        let plan = plan(&commits, false)?;
        assert_eq!(plan.branches, 2);
        assert_eq!(plan.merges(), 2);
        assert_eq!(plan.forks(), 2);
        Ok(())
    }

    #[test]
    fn test_multiple_roots_and_dangling_lines() -> anyhow::Result<()> {
        let commits = history(&[("r1", &[]), ("r2", &[]), ("x", &["r1"]), ("y", &["r2"])]);
        let plan = plan(&commits, false)?;
        assert_eq!(plan.actions[0], Action::Fork { from: 0, into: vec![1] });
        let Some(Action::Merge { into, from }) = plan.actions.last() else {
            panic!("dangling lines must be reconciled");
        };
        assert_eq!(*into, plan.final_branch);
        assert_eq!(from.len(), 1);
        Ok(())
    }

    #[test]
    fn test_out_of_set_parents_are_ignored() -> anyhow::Result<()> {
        let commits = history(&[("b", &["a"]), ("m", &["b", "outside"])]);
        let plan = plan(&commits, false)?;
        assert_eq!(plan.merges(), 0);
        assert_eq!(plan.forks(), 0);
        Ok(())
    }

    #[test]
    fn test_first_parent_is_linear() -> anyhow::Result<()> {
        let commits = history(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("m", &["b", "c"])]);
        let plan = plan(&commits, true)?;
        assert_eq!(plan.forks(), 0);
        assert_eq!(plan.merges(), 0);
        assert!(plan
            .actions
            .iter()
            .all(|a| matches!(a, Action::Commit { branch: 0, .. })));
        Ok(())
    }

    #[test]
    fn test_broken_histories() {
        let duplicate = history(&[("a", &[]), ("a", &[])]);
        assert!(matches!(plan(&duplicate, false), Err(EngineError::BrokenHistory(_))));

        let cyclic = history(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(plan(&cyclic, false), Err(EngineError::BrokenHistory(_))));
    }

    #[test]
    fn test_children_before_parents_in_input() -> anyhow::Result<()> {
        let commits = history(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
        let plan = plan(&commits, false)?;
        assert_eq!(plan.commit_order().collect::<Vec<_>>(), vec![2, 1, 0]);
        Ok(())
    }
}
