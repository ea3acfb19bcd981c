//! Lineage - commit-graph analysis engine
//!
//! Pluggable analyses declare the facts they need and produce; the engine
//! resolves them into an execution order and drives every commit of a
//! repository through the chain, branches and merges included.
//!
//! ```no_run
//! use lineage::core::Pipeline;
//! use lineage::git::{load_commits, HistoryOptions, RepositoryHandle};
//!
//! # fn main() -> anyhow::Result<()> {
//! let registry = lineage::builtin_registry();
//! let repository = RepositoryHandle::open(std::path::Path::new("."))?;
//! let commits = load_commits(&repository, &HistoryOptions::default())?;
//!
//! let mut pipeline = Pipeline::new(&registry, repository);
//! pipeline.deploy_leaf("devs")?;
//! pipeline.initialize(&commits)?;
//! let results = pipeline.run(&commits)?;
//! println!("{} commits", results.summary.commits);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod git;
pub mod leaves;
pub mod parsers;
pub mod plumbing;
pub mod reporters;

pub use error::{EngineError, EngineResult};

use crate::core::Registry;
use leaves::{Couples, Devs, ImportsPerDeveloper, Shotness};
use plumbing::{BlobCache, IdentityDetector, Imports, LinesStats, TicksSinceStart, TreeDiff};

/// Registry holding every compiled-in component, plumbing first
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_default::<TreeDiff>();
    registry.register_default::<BlobCache>();
    registry.register_default::<IdentityDetector>();
    registry.register_default::<TicksSinceStart>();
    registry.register_default::<LinesStats>();
    registry.register_default::<Imports>();

    registry.register_default::<Devs>();
    registry.register_default::<Couples>();
    registry.register_default::<ImportsPerDeveloper>();
    registry.register_default::<Shotness>();
    registry
}
