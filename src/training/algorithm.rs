//! Algorithm capability traits
//!
//! Every forecasting family implements [`Algorithm`]. Families that can tune
//! their own hyperparameters also implement [`Optimizable`] and expose it
//! through [`Algorithm::as_optimizable`], so callers branch on the capability
//! without knowing the concrete type.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{ForecastError, Result};
use crate::evaluation::{evaluate_model, ForecastMode, ForecastStrategy, Metrics};
use crate::optimizer::{tune, OptimizationConfig, TuningResult};
use crate::timeseries::{Frequency, Series};

/// Literal hyperparameter values, keyed by name
pub type HyperParams = serde_json::Map<String, Value>;

/// Training regime passed to [`Algorithm::fit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitMode {
    /// Fit on train only; validation stays held out
    ExplorationFit,
    /// Fit on train followed by validation
    FinalFit,
}

/// How [`Algorithm::evaluate`] scores a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    /// Against values the model already saw
    InSample,
    /// Against a genuine forecast past the training data
    OutOfSample(ForecastMode),
}

/// Result of one evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub metrics: Metrics,
    pub predictions: Vec<f64>,
    pub actuals: Vec<f64>,
    /// Strategy used for out-of-sample forecasts
    pub strategy: Option<ForecastStrategy>,
}

/// A univariate forecasting algorithm.
///
/// `fit` replaces any previous fitted state; a failed `fit` leaves the
/// instance unfitted. `predict` is deterministic for a given fitted state.
pub trait Algorithm: Send + Sync + fmt::Debug {
    /// Registry key of the family
    fn name(&self) -> &str;

    fn fit(&mut self, train: &Series, validation: Option<&Series>, mode: FitMode) -> Result<()>;

    /// Exactly `steps` values continuing the fitted series
    fn predict(&self, steps: usize) -> Result<Vec<f64>>;

    fn evaluate(&self, test: &Series, mode: EvaluationMode) -> Result<Evaluation> {
        evaluate_model(self, test, mode)
    }

    fn is_fitted(&self) -> bool;

    /// Resolved hyperparameters
    fn params(&self) -> HyperParams;

    /// Frequency captured at fit time
    fn frequency(&self) -> Option<Frequency>;

    /// One-step-ahead fitted values over the training data, if the family has them
    fn fitted_values(&self) -> Option<Series> {
        None
    }

    /// Family-specific metrics added to every evaluation
    fn extra_metrics(&self) -> Vec<(String, f64)> {
        Vec::new()
    }

    fn as_optimizable(&self) -> Option<&dyn Optimizable> {
        None
    }

    /// JSON description of the model and its learned state
    fn snapshot(&self) -> Result<Value>;
}

/// Hyperparameter search capability
pub trait Optimizable: Algorithm {
    /// Fresh, unfitted instance configured with `params`
    fn with_params(&self, params: &HyperParams) -> Result<Box<dyn Algorithm>>;

    /// Search space used when no space is configured
    fn default_search_space(&self) -> Value;

    /// Tune this family on `train`, scoring on `validation`.
    ///
    /// A null or empty `search_space` falls back to
    /// [`Optimizable::default_search_space`]. Returns `Ok(None)` when the
    /// space in use has nothing to search.
    fn optimize_hyperparams(
        &self,
        train: &Series,
        validation: &Series,
        search_space: &Value,
        config: &OptimizationConfig,
    ) -> Result<Option<TuningResult>> {
        let factory = |params: &HyperParams| self.with_params(params);
        let configured = match search_space {
            Value::Null => false,
            Value::Object(obj) => !obj.is_empty(),
            _ => true,
        };
        if configured {
            return tune(&factory, &self.params(), search_space, train, validation, config);
        }
        debug!(model = self.name(), "No search space configured, using the default space");
        tune(&factory, &self.params(), &self.default_search_space(), train, validation, config)
    }
}

/// Series a fit should train on for the given regime
pub fn training_data(train: &Series, validation: Option<&Series>, mode: FitMode) -> Result<Series> {
    match (mode, validation) {
        (FitMode::FinalFit, Some(val)) if !val.is_empty() => train.concat(val),
        _ => Ok(train.clone()),
    }
}

/// Frequency to build forecast horizons with.
///
/// Irregular series fall back to their median spacing.
pub fn resolve_frequency(series: &Series) -> Result<Frequency> {
    if let Some(freq) = series.effective_frequency() {
        return Ok(freq);
    }

    let mut deltas: Vec<i64> = series
        .timestamps()
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds())
        .collect();
    if deltas.is_empty() {
        return Err(ForecastError::TrainingError(
            "cannot determine a frequency from fewer than two observations".to_string(),
        ));
    }
    deltas.sort_unstable();
    let median = deltas[deltas.len() / 2].max(1);
    warn!(seconds = median, "Irregular series, forecasting with its median spacing");
    Ok(Frequency::Fixed(median))
}

/// Timestamps of the `steps` points following `last`
pub fn future_timestamps(frequency: Frequency, last: NaiveDateTime, steps: usize) -> Result<Vec<NaiveDateTime>> {
    frequency.horizon(last, steps)
}

/// Read an integer parameter
pub fn param_usize(params: &HyperParams, name: &str, default: usize) -> Result<usize> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .or_else(|| {
                v.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as usize)
            })
            .ok_or_else(|| ForecastError::invalid_param(name, v, "expected a non-negative integer")),
    }
}

/// Read a float parameter
pub fn param_f64(params: &HyperParams, name: &str, default: f64) -> Result<f64> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| ForecastError::invalid_param(name, v, "expected a number")),
    }
}

/// Read a string parameter
pub fn param_str(params: &HyperParams, name: &str, default: &str) -> Result<String> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(v) => Err(ForecastError::invalid_param(name, v, "expected a string")),
    }
}

/// Read a boolean parameter
pub fn param_bool(params: &HyperParams, name: &str, default: bool) -> Result<bool> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(v) => Err(ForecastError::invalid_param(name, v, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn series(n: usize) -> Series {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Series::from_values(start, Frequency::Daily, (0..n).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn test_training_data_regimes() {
        let s = series(10);
        let (train, val) = (s.slice(0..7), s.slice(7..10));

        let explore = training_data(&train, Some(&val), FitMode::ExplorationFit).unwrap();
        assert_eq!(explore.len(), 7);

        let fin = training_data(&train, Some(&val), FitMode::FinalFit).unwrap();
        assert_eq!(fin, s);

        let no_val = training_data(&train, None, FitMode::FinalFit).unwrap();
        assert_eq!(no_val.len(), 7);
    }

    #[test]
    fn test_resolve_frequency_irregular() {
        let ts = |d: u32| {
            NaiveDate::from_ymd_opt(2020, 1, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        };
        let s = Series::new(vec![ts(1), ts(2), ts(3), ts(6)], vec![1.0; 4]).unwrap();
        assert_eq!(resolve_frequency(&s).unwrap(), Frequency::Fixed(86_400));
        assert_eq!(resolve_frequency(&series(5)).unwrap(), Frequency::Daily);
    }

    #[test]
    fn test_param_readers() {
        let params: HyperParams = json!({"n": 5, "f": 5.0, "rate": 0.1, "mode": "additive", "on": true})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(param_usize(&params, "n", 1).unwrap(), 5);
        assert_eq!(param_usize(&params, "f", 1).unwrap(), 5);
        assert_eq!(param_usize(&params, "missing", 3).unwrap(), 3);
        assert!(param_usize(&params, "rate", 1).is_err());
        assert_eq!(param_f64(&params, "rate", 0.0).unwrap(), 0.1);
        assert_eq!(param_str(&params, "mode", "x").unwrap(), "additive");
        assert!(param_bool(&params, "on", false).unwrap());
        assert!(param_bool(&params, "mode", false).is_err());
    }
}
