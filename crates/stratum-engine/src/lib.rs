//! stratum-engine
//!
//! Convergence engine: diffs a desired [`Spec`](stratum_core::Spec) against
//! stored state and walks the resulting plan concurrently across runtimes.
//!
//! Public API:
//! - `Engine::plan()`: classify every resource against prior state
//! - `Engine::preview()`: plan plus a dry-run walk, no state writes
//! - `Engine::apply()`: execute a plan, persisting state per resource
//! - `Engine::plan_destroy()` / `Engine::destroy()`: tear a stack down, dependents first
//! - `Registry`: maps resource type tags to `Runtime` implementations

pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod order;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod summary;

pub use crate::diff::{FieldDiff, classify, diff_fields};
pub use crate::engine::{Engine, Preview};
pub use crate::error::{EngineError, RuntimeError};
pub use crate::executor::{ExecuteOptions, ExecuteReport, Executor, NodeOutcome, Operation};
pub use crate::graph::DependencyGraph;
pub use crate::order::{build_change_order, build_destroy_order};
pub use crate::registry::{Registry, RuntimeSet};
pub use crate::runtime::{
    ApplyRequest, ApplyResponse, BoxFuture, DeleteRequest, ImportRequest, ImportResponse,
    ReadRequest, ReadResponse, Runtime, RuntimeContext, WatchEvent, WatchRequest, WatchStream,
};
pub use crate::summary::ExecuteSummary;
