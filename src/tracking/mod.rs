//! Experiment tracking module
//!
//! Persists run parameters, metrics, model snapshots and artifacts.

mod storage;
mod tracker;

pub use storage::LocalStorage;
pub use tracker::{ExperimentTracker, LocalTracker, NoopTracker, Run, RunStatus};
