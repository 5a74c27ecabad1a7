//! Kolosal Forecast - time-series training and hyperparameter optimization
//!
//! This crate trains univariate forecasters behind one capability interface,
//! tunes them with a sequential model-based search, and evaluates them with
//! frequency-aware forecasting strategies.
//!
//! # Modules
//!
//! ## Core
//! - [`training`] - Algorithm traits, forecasting families, registry and trainer
//! - [`optimizer`] - Hyperparameter search (TPE, random) with anomaly capping
//! - [`evaluation`] - Metrics and direct/rolling/in-sample evaluation
//!
//! ## Data
//! - [`timeseries`] - Series, frequencies, splits and feature engineering
//! - [`preprocessing`] - Cleaning raw timestamp/value rows into a series
//!
//! ## Infrastructure
//! - [`config`] - Training configuration document and validation
//! - [`tracking`] - Experiment tracking
//! - [`utils`] - CSV loading and forecast export
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;
pub mod config;

// Core modules
pub mod evaluation;
pub mod optimizer;
pub mod training;

// Data processing
pub mod preprocessing;
pub mod timeseries;

// Infrastructure
pub mod tracking;
pub mod utils;

// Services
pub mod cli;

pub use error::{ForecastError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{ForecastError, Result};

    // Configuration
    pub use crate::config::{EarlyStoppingConfig, TrainingConfig};

    // Data
    pub use crate::preprocessing::{Preprocessor, PreprocessingConfig, RawRecord, TimeSeriesPreprocessor};
    pub use crate::timeseries::{split_series, FeatureEngineer, FeatureEngineerConfig, Frequency, Series};

    // Training
    pub use crate::training::{
        register_builtin_models, AdditiveForecaster, Algorithm, EvaluationMode, FitMode, HyperParams,
        ModelRegistry, Optimizable, RegressionForecaster, Sarima, Trainer, TrainingOutcome,
    };

    // Evaluation
    pub use crate::evaluation::{ForecastMode, Metrics};

    // Optimization
    pub use crate::optimizer::{tune, HyperOptX, OptimizationConfig, SearchSpace, Study, StudySummary};

    // Experiment tracking
    pub use crate::tracking::{ExperimentTracker, LocalTracker, NoopTracker, Run, RunStatus};
}
