//! Dependency resolution
//!
//! Turns the explicitly deployed components into a complete, ordered chain:
//!
//! 1. every required key not satisfied by a seed fact or a deployed component
//!    pulls in exactly one eligible provider from the registry
//! 2. keys with several providers inside the expanded set are rejected
//! 3. the provider → consumer graph is checked for cycles (Tarjan SCC)
//! 4. components are ordered with Kahn's algorithm; among ready components the
//!    smallest registration ordinal goes first

use crate::core::component::Component;
use crate::core::registry::{Registration, Registry};
use crate::error::{EngineError, EngineResult};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use tracing::debug;

/// A component instance awaiting scheduling
pub struct Deployed {
    pub component: Box<dyn Component>,
    /// Tie-break rank; registration ordinal for registry components
    pub ordinal: usize,
}

/// Expand, validate and order `deployed`.
///
/// `satisfied` holds keys available without any provider (seed and initial
/// facts). `features` holds the enabled feature tags.
pub fn resolve(
    registry: &Registry,
    deployed: Vec<Deployed>,
    satisfied: &HashSet<String>,
    features: &HashSet<String>,
) -> EngineResult<Vec<Deployed>> {
    let mut items = deployed;
    let mut providers: HashMap<&'static str, Vec<usize>> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        for key in item.component.provides() {
            providers.entry(key).or_default().push(idx);
        }
    }

    // Expansion. Pulled-in components are appended and scanned in turn.
    let mut cursor = 0;
    while cursor < items.len() {
        let required_by = items[cursor].component.name();
        for key in items[cursor].component.requires() {
            if satisfied.contains(key) || providers.contains_key(key) {
                continue;
            }
            let registration = pick_provider(registry, key, required_by, features)?;
            debug!(
                "auto-deploying {} to provide \"{}\" for {}",
                registration.name(),
                key,
                required_by
            );
            let idx = items.len();
            let component = registration.instantiate();
            for provided in component.provides() {
                providers.entry(provided).or_default().push(idx);
            }
            items.push(Deployed {
                component,
                ordinal: registration.ordinal,
            });
        }
        cursor += 1;
    }

    // Build the provider -> consumer graph, rejecting duplicate providers.
    let mut graph: DiGraph<usize, &'static str> = DiGraph::with_capacity(items.len(), 0);
    let nodes: Vec<NodeIndex> = (0..items.len()).map(|idx| graph.add_node(idx)).collect();
    for (consumer, item) in items.iter().enumerate() {
        for key in item.component.requires() {
            let Some(found) = providers.get(key) else {
                continue;
            };
            if found.len() > 1 {
                let mut candidates: Vec<String> = found
                    .iter()
                    .map(|&p| items[p].component.name().to_string())
                    .collect();
                candidates.sort();
                return Err(EngineError::AmbiguousDependency {
                    key: key.to_string(),
                    required_by: item.component.name().to_string(),
                    candidates,
                });
            }
            graph.update_edge(nodes[found[0]], nodes[consumer], key);
        }
    }

    detect_cycles(&graph, &items)?;

    let order = schedule(&graph, &items);
    let mut slots: Vec<Option<Deployed>> = items.into_iter().map(Some).collect();
    let ordered: Vec<Deployed> = order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect();

    debug!(
        "resolved pipeline: {}",
        ordered
            .iter()
            .map(|d| d.component.name())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    Ok(ordered)
}

/// Single eligible provider of `key`, or the reason there is none
fn pick_provider<'r>(
    registry: &'r Registry,
    key: &str,
    required_by: &str,
    features: &HashSet<String>,
) -> EngineResult<&'r Registration> {
    let all = registry.providers(key);
    let (eligible, gated): (Vec<&Registration>, Vec<&Registration>) = all
        .into_iter()
        .filter(|r| !r.is_leaf())
        .partition(|r| {
            r.prototype()
                .features()
                .iter()
                .all(|f| features.contains(*f))
        });

    match eligible.as_slice() {
        [single] => Ok(*single),
        [] => {
            let disabled_feature = gated.iter().find_map(|r| {
                r.prototype()
                    .features()
                    .into_iter()
                    .find(|f| !features.contains(*f))
                    .map(String::from)
            });
            Err(EngineError::MissingDependency {
                key: key.to_string(),
                required_by: required_by.to_string(),
                disabled_feature,
            })
        }
        many => Err(EngineError::AmbiguousDependency {
            key: key.to_string(),
            required_by: required_by.to_string(),
            candidates: many.iter().map(|r| r.name().to_string()).collect(),
        }),
    }
}

fn detect_cycles(graph: &DiGraph<usize, &'static str>, items: &[Deployed]) -> EngineResult<()> {
    for scc in tarjan_scc(graph) {
        let cyclic = scc.len() > 1 || graph.find_edge(scc[0], scc[0]).is_some();
        if !cyclic {
            continue;
        }
        let names: BTreeSet<&str> = scc
            .iter()
            .map(|&node| items[graph[node]].component.name())
            .collect();
        return Err(EngineError::DependencyCycle {
            components: names.into_iter().map(String::from).collect(),
        });
    }
    Ok(())
}

/// Kahn's algorithm with a min-heap on (ordinal, index)
fn schedule(graph: &DiGraph<usize, &'static str>, items: &[Deployed]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<(usize, usize)>> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(|n| Reverse((items[graph[n]].ordinal, graph[n])))
        .collect();

    let mut order = Vec::with_capacity(items.len());
    while let Some(Reverse((_, idx))) = ready.pop() {
        order.push(idx);
        let node = NodeIndex::new(idx);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.push(Reverse((items[graph[next]].ordinal, graph[next])));
            }
        }
    }
    order
}
