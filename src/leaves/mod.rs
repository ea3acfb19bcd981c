//! Built-in leaves
//!
//! - `Devs` (`--devs`): commits and changed lines per developer and tick
//! - `Couples` (`--couples`): files changed together, files touched per developer
//! - `ImportsPerDeveloper` (`--imports-per-dev`): imports used per developer,
//!   language and tick
//! - `Shotness` (`--shotness`): functions changed, alone and together
//!
//! All of them fork into empty accumulators and sum siblings on merge, so a
//! contribution is counted on exactly one line of history. Their results can be
//! combined offline; developers are matched by identity string and ticks are
//! realigned on the earlier run start.

pub mod couples;
pub mod devs;
pub mod imports_per_dev;
pub mod shotness;

pub use couples::{Couples, CouplesResult};
pub use devs::{DevStats, Devs, DevsResult};
pub use imports_per_dev::{ImportsPerDeveloper, ImportsPerDeveloperResult};
pub use shotness::{NodeSummary, Shotness, ShotnessResult};

use crate::core::RunSummary;
use crate::error::EngineError;
use crate::plumbing::ticks::floor_to_tick;
use anyhow::Result;
use rustc_hash::FxHashMap;
use std::io::Write;

/// Developer dictionary shared by two results
pub(crate) struct IdentityUnion {
    pub people: Vec<String>,
    /// Index in `people` of every developer of the left result
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

impl IdentityUnion {
    pub fn new(left: &[String], right: &[String]) -> Self {
        let mut union = Self {
            people: Vec::with_capacity(left.len() + right.len()),
            left: Vec::with_capacity(left.len()),
            right: Vec::with_capacity(right.len()),
        };
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        for (names, is_left) in [(left, true), (right, false)] {
            for name in names {
                let id = *index.entry(name.clone()).or_insert_with(|| {
                    union.people.push(name.clone());
                    union.people.len() - 1
                });
                if is_left {
                    union.left.push(id);
                } else {
                    union.right.push(id);
                }
            }
        }
        union
    }
}

/// Translate a developer index through `mapping`
pub(crate) fn remap(component: &str, mapping: &[usize], developer: usize) -> Result<usize> {
    mapping.get(developer).copied().ok_or_else(|| {
        EngineError::IncompatibleResults {
            component: component.to_string(),
            reason: format!("developer {} is missing from the identity list", developer),
        }
        .into()
    })
}

/// Tick shifts that put two results on a common time axis
pub(crate) struct TickAlignment {
    pub left: i64,
    pub right: i64,
}

impl TickAlignment {
    pub fn new(
        component: &str,
        left_tick: i64,
        right_tick: i64,
        left: &RunSummary,
        right: &RunSummary,
    ) -> Result<Self> {
        if left_tick != right_tick {
            return Err(EngineError::IncompatibleResults {
                component: component.to_string(),
                reason: format!(
                    "tick sizes differ: {}s vs {}s",
                    left_tick, right_tick
                ),
            }
            .into());
        }
        if left_tick <= 0 {
            return Err(EngineError::IncompatibleResults {
                component: component.to_string(),
                reason: format!("invalid tick size {}s", left_tick),
            }
            .into());
        }
        let start = |summary: &RunSummary, fallback: &RunSummary| {
            let source = if summary.is_empty() { fallback } else { summary };
            floor_to_tick(source.begin_time, left_tick)
        };
        let left_start = start(left, right);
        let right_start = start(right, left);
        let base = left_start.min(right_start);
        Ok(Self {
            left: (left_start - base) / left_tick,
            right: (right_start - base) / left_tick,
        })
    }
}

/// Text form of a developer dictionary
pub(crate) fn write_people(sink: &mut dyn Write, people: &[String]) -> Result<()> {
    writeln!(sink, "people:")?;
    for (index, person) in people.iter().enumerate() {
        writeln!(sink, "  {}: {:?}", index, person)?;
    }
    Ok(())
}
