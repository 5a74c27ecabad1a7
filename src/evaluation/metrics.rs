//! Forecast accuracy metrics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ForecastError, Result};

/// Metric names every evaluation produces
pub const CORE_METRICS: [&str; 6] = ["rmse", "mae", "mape", "bias", "bias_pct", "mse"];

/// Flat name -> value metric map.
///
/// The core metrics are always present and finite. Algorithm extras
/// (`aic`, `bic`, ...) are added with [`Metrics::insert_extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics(BTreeMap<String, f64>);

impl Metrics {
    /// Compute the core metrics from equally long actual/predicted slices
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(ForecastError::EvaluationError(format!(
                "length mismatch: {} actual vs {} predicted values",
                y_true.len(),
                y_pred.len()
            )));
        }
        if y_true.is_empty() {
            return Err(ForecastError::EvaluationError(
                "cannot compute metrics on empty input".to_string(),
            ));
        }

        let n = y_true.len() as f64;
        let errors: Vec<f64> = y_pred.iter().zip(y_true).map(|(p, t)| p - t).collect();

        let mse = errors.iter().map(|e| e * e).sum::<f64>() / n;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let bias = errors.iter().sum::<f64>() / n;

        // Zero actuals are dropped rather than counted as infinite error
        let (ape_sum, ape_count) = errors
            .iter()
            .zip(y_true)
            .filter(|(_, t)| **t != 0.0)
            .fold((0.0, 0usize), |(sum, count), (e, t)| (sum + (e / t).abs(), count + 1));
        let mape = if ape_count > 0 {
            ape_sum / ape_count as f64 * 100.0
        } else {
            0.0
        };

        let mean_true = y_true.iter().sum::<f64>() / n;
        let bias_pct = if mean_true != 0.0 {
            bias / mean_true * 100.0
        } else {
            0.0
        };

        let mut map = BTreeMap::new();
        map.insert("rmse".to_string(), finite_or_zero(mse.sqrt()));
        map.insert("mae".to_string(), finite_or_zero(mae));
        map.insert("mape".to_string(), finite_or_zero(mape));
        map.insert("bias".to_string(), finite_or_zero(bias));
        map.insert("bias_pct".to_string(), finite_or_zero(bias_pct));
        map.insert("mse".to_string(), finite_or_zero(mse));
        Ok(Self(map))
    }

    /// Add an algorithm-specific metric; non-finite values are ignored
    pub fn insert_extra(&mut self, name: impl Into<String>, value: f64) {
        if value.is_finite() {
            self.0.insert(name.into(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Value of the metric used as an optimization target
    pub fn score(&self, metric: &str) -> Result<f64> {
        self.get(metric).ok_or_else(|| {
            ForecastError::EvaluationError(format!("metric '{}' was not computed", metric))
        })
    }

    pub fn rmse(&self) -> f64 {
        self.get("rmse").unwrap_or(0.0)
    }

    pub fn mae(&self) -> f64 {
        self.get("mae").unwrap_or(0.0)
    }

    pub fn mape(&self) -> f64 {
        self.get("mape").unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, f64> {
        self.0
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
