//! Hyperparameter optimization module (HyperOptX)
//!
//! Sequential model-based search over a declarative search space:
//! - Search-space compilation from JSON (choice, uniform, loguniform, quniform, randint)
//! - Tree-structured Parzen Estimator and random sampling
//! - Train-then-validate objective with anomaly capping
//! - Early stopping and a study-level timeout

mod config;
mod objective;
mod optimizer;
mod samplers;
mod search_space;

pub use config::OptimizationConfig;
pub use objective::{tune, AlgorithmFactory, Objective, TuningResult};
pub use optimizer::{HyperOptX, StopReason, Study, StudySummary, TrialOutcome, TrialResult, TrialStatus};
pub use samplers::{create_sampler, RandomSampler, Sampler, SamplerType, TPESampler, DEFAULT_SEED};
pub use search_space::{Parameter, ParameterType, ParameterValue, SearchSpace, TrialParams};
