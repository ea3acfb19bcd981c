//! Analysis engine
//!
//! ```text
//! Registry ─► resolve (dependency order) ─► Pipeline ─► plan (commit DAG)
//!                                              │
//!                                              ▼
//!                      FactStore per commit, fork / merge of branch states
//!                                              │
//!                                              ▼
//!                           leaf results ─► combine (offline merge)
//! ```

pub mod combine;
pub mod commit;
pub mod component;
pub mod facts;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod resolve;
pub mod summary;

pub use combine::{combine_reports, load_reports, CombineFailure, Combined};
pub use commit::{Commit, CommitId, Signature};
pub use component::{
    downcast_result, downcast_siblings, fork_copies, AnalysisResult, AsAny, Component,
    ConfigurationOption, Leaf, OneShotMergeGuard, OptionKind, OptionValue, Options,
    ResultMerger, RunContext,
};
pub use facts::{
    Fact, FactStore, Outputs, DEPENDENCY_COMMIT, DEPENDENCY_INDEX, DEPENDENCY_IS_MERGE,
    SEED_KEYS,
};
pub use pipeline::{Pipeline, ProgressCallback, RunResults};
pub use plan::{plan, Action, BranchId, Plan};
pub use registry::{ComponentFactory, Registration, Registry};
pub use resolve::{resolve, Deployed};
pub use summary::RunSummary;
