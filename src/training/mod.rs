//! Model training module
//!
//! Provides the forecasting families and the machinery around them:
//! - [`Algorithm`] / [`Optimizable`] capability traits
//! - Seasonal ARIMA ([`Sarima`])
//! - Additive trend + seasonality ([`AdditiveForecaster`])
//! - Tree-ensemble regression on lag features ([`RegressionForecaster`])
//! - The process-wide [`ModelRegistry`]
//! - The [`Trainer`] that runs a configured job end to end

mod algorithm;
mod linalg;
mod registry;
mod trainer;
pub mod additive;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod random_forest;
pub mod regression;
pub mod sarima;

pub use additive::{AdditiveForecaster, SeasonalComponent, SeasonalityMode, Toggle};
pub use algorithm::{
    future_timestamps, param_bool, param_f64, param_str, param_usize, resolve_frequency, training_data,
    Algorithm, Evaluation, EvaluationMode, FitMode, HyperParams, Optimizable,
};
pub use decision_tree::{DecisionTree, TreeNode};
pub use gradient_boosting::{GradientBoosting, GradientBoostingConfig};
pub use linalg::{solve_least_squares, solve_ridge};
pub use random_forest::{MaxFeatures, RandomForest};
pub use registry::{register_builtin_models, ModelConstructor, ModelRegistry};
pub use regression::{RegressionForecaster, RegressionParams, Regressor, RegressorKind};
pub use sarima::{Sarima, SarimaOrder, Trend};
pub use trainer::{Trainer, TrainingOutcome};
