//! Optimization configuration

use serde::{Deserialize, Serialize};

use super::samplers::SamplerType;
use crate::config::{EarlyStoppingConfig, TrainingConfig};
use crate::evaluation::ForecastMode;

/// Configuration for a hyperparameter search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Maximum number of trials
    pub max_evals: usize,

    /// Validation metric to minimize
    pub metric: String,

    /// Random seed
    pub seed: Option<u64>,

    pub sampler: SamplerType,

    /// Number of initial random samples before TPE kicks in
    pub n_startup_trials: usize,

    pub early_stopping: EarlyStoppingConfig,

    /// Wall-clock budget for the whole study, checked between trials
    pub timeout_secs: Option<f64>,

    /// How trials forecast the validation split
    pub validation_mode: ForecastMode,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_evals: 50,
            metric: "rmse".to_string(),
            seed: None,
            sampler: SamplerType::TPE,
            n_startup_trials: 10,
            early_stopping: EarlyStoppingConfig::from_max_evals(50),
            timeout_secs: None,
            validation_mode: ForecastMode::Auto,
        }
    }
}

impl OptimizationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search settings of a training run
    pub fn from_training_config(config: &TrainingConfig) -> crate::error::Result<Self> {
        Ok(Self {
            max_evals: config.max_evals(),
            metric: config.metric().to_string(),
            seed: config.random_state(),
            early_stopping: config.early_stopping()?,
            ..Self::default()
        })
    }

    /// Builder method to set the number of trials.
    ///
    /// `patience` and `min_evals` are rescaled only while they still hold the
    /// values derived from the previous `max_evals`; customized settings are kept.
    pub fn with_max_evals(mut self, n: usize) -> Self {
        let previous = EarlyStoppingConfig::from_max_evals(self.max_evals);
        self.max_evals = n.max(1);
        let rescaled = EarlyStoppingConfig::from_max_evals(self.max_evals);
        if self.early_stopping.patience == previous.patience {
            self.early_stopping.patience = rescaled.patience;
        }
        if self.early_stopping.min_evals == previous.min_evals {
            self.early_stopping.min_evals = rescaled.min_evals;
        }
        self
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerType) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_n_startup(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    pub fn with_early_stopping(mut self, early_stopping: EarlyStoppingConfig) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}
