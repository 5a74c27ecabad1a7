//! Train-then-validate objective and the `tune` entry point

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::OptimizationConfig;
use super::optimizer::{HyperOptX, Study, TrialOutcome};
use super::search_space::SearchSpace;
use crate::error::{ForecastError, Result};
use crate::timeseries::Series;
use crate::training::{Algorithm, EvaluationMode, FitMode, HyperParams};

/// Builds an unfitted algorithm from literal hyperparameters
pub type AlgorithmFactory<'a> = dyn Fn(&HyperParams) -> Result<Box<dyn Algorithm>> + 'a;

/// Scores one parameter set by fitting a throwaway model on `train` and
/// forecasting `validation`
pub struct Objective<'a> {
    factory: &'a AlgorithmFactory<'a>,
    base: HyperParams,
    train: &'a Series,
    validation: &'a Series,
    metric: String,
    mode: EvaluationMode,
    cap_value: Option<f64>,
}

impl<'a> Objective<'a> {
    pub fn new(
        factory: &'a AlgorithmFactory<'a>,
        base: HyperParams,
        train: &'a Series,
        validation: &'a Series,
        config: &OptimizationConfig,
    ) -> Self {
        let cap = train.sample_std() * config.early_stopping.loss_cap_multiplier;
        Self {
            factory,
            base,
            train,
            validation,
            metric: config.metric.clone(),
            mode: EvaluationMode::OutOfSample(config.validation_mode),
            // A flat training series gives no scale to cap against
            cap_value: (cap.is_finite() && cap > 0.0).then_some(cap),
        }
    }

    /// Validation scores above this value are replaced by `cap * 1.5`
    pub fn cap_value(&self) -> Option<f64> {
        self.cap_value
    }

    /// Never fails: errors become a `Failed` outcome with `+inf` loss
    pub fn evaluate(&self, params: &HyperParams) -> TrialOutcome {
        match self.score(params) {
            Ok((train_score, validation_score)) => match self.cap_value {
                Some(cap) if validation_score > cap => TrialOutcome::capped(train_score, validation_score, cap * 1.5),
                _ => TrialOutcome::ok(train_score, validation_score),
            },
            Err(e) => TrialOutcome::failed(e),
        }
    }

    fn score(&self, params: &HyperParams) -> Result<(f64, f64)> {
        let mut merged = self.base.clone();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut model = (self.factory)(&merged)?;
        model.fit(self.train, Some(self.validation), FitMode::ExplorationFit)?;

        let train_score = model.evaluate(self.train, EvaluationMode::InSample)?.metrics.score(&self.metric)?;
        let validation_score = model.evaluate(self.validation, self.mode)?.metrics.score(&self.metric)?;
        if !validation_score.is_finite() {
            return Err(ForecastError::EvaluationError(format!(
                "non-finite validation {}",
                self.metric
            )));
        }
        Ok((train_score, validation_score))
    }
}

/// Winning configuration of a search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningResult {
    /// Best trial's values merged over the base configuration
    pub best_params: HyperParams,
    pub best_score: f64,
    pub study: Study,
}

/// Search `space_config` for the parameters minimizing the validation metric.
///
/// Fixed entries of the space are merged into `base`. Returns `Ok(None)`
/// when nothing in the space is searchable.
pub fn tune(
    factory: &AlgorithmFactory<'_>,
    base: &HyperParams,
    space_config: &serde_json::Value,
    train: &Series,
    validation: &Series,
    config: &OptimizationConfig,
) -> Result<Option<TuningResult>> {
    let space = SearchSpace::from_config(space_config);
    if space.is_empty() {
        warn!("Search space has no searchable parameters, skipping optimization");
        return Ok(None);
    }

    let mut fixed = base.clone();
    fixed.extend(space.fixed_values().iter().map(|(k, v)| (k.clone(), v.clone())));

    info!(
        parameters = space.len(),
        max_evals = config.max_evals,
        metric = %config.metric,
        "Starting hyperparameter search"
    );
    let objective = Objective::new(factory, fixed.clone(), train, validation, config);
    let mut optimizer = HyperOptX::new(config.clone(), space);
    optimizer.optimize(|params| objective.evaluate(params));
    let study = optimizer.into_study();

    let best = study.best_trial().ok_or_else(|| {
        ForecastError::OptimizationError(format!(
            "none of {} trials produced a usable score",
            study.trials.len()
        ))
    })?;

    let mut best_params = fixed;
    best_params.extend(best.params.iter().map(|(k, v)| (k.clone(), v.clone())));
    let best_score = best.validation_score.unwrap_or(best.value);

    Ok(Some(TuningResult {
        best_params,
        best_score,
        study,
    }))
}
