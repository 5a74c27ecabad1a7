//! Forecast strategies and horizon thresholds

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ForecastError, Result};
use crate::timeseries::Frequency;

/// Smallest window scored by the degraded in-sample evaluation
pub const IN_SAMPLE_WINDOW_MIN: usize = 6;
/// Largest window scored by the degraded in-sample evaluation
pub const IN_SAMPLE_WINDOW_MAX: usize = 24;
/// Largest horizon passed to a model in one call
pub const MAX_SAFE_STEPS: usize = 10_000;
/// Horizon retried after a timestamp overflow
pub const FALLBACK_STEPS: usize = 500;

/// Largest horizon a single direct forecast is trusted for.
///
/// Unknown or irregular frequencies fall back to `max(6, min(len / 10, 36))`.
pub fn frequency_threshold(frequency: Option<Frequency>, series_len: usize) -> usize {
    match frequency {
        Some(
            Frequency::MonthStart
            | Frequency::MonthEnd
            | Frequency::QuarterStart
            | Frequency::QuarterEnd
            | Frequency::YearStart
            | Frequency::YearEnd,
        ) => 24,
        Some(Frequency::Weekly) => 26,
        Some(Frequency::Daily | Frequency::BusinessDaily) => 90,
        Some(Frequency::Hourly(_) | Frequency::Minutely(_)) => 168,
        Some(Frequency::Fixed(_)) | None => (series_len / 10).min(36).max(6),
    }
}

/// Window scored by in-sample evaluation when a model has no fitted values
pub fn in_sample_window(threshold: usize, len: usize) -> usize {
    (threshold / 2)
        .max(IN_SAMPLE_WINDOW_MIN)
        .min(IN_SAMPLE_WINDOW_MAX)
        .min(len)
}

/// Requested out-of-sample forecasting behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ForecastMode {
    /// Direct up to the threshold, rolling beyond it
    Auto,
    /// Always one direct call
    Recursive,
    /// Fixed-size windows
    Rolling { horizon: usize },
}

impl Default for ForecastMode {
    fn default() -> Self {
        ForecastMode::Auto
    }
}

/// Strategy actually used for an out-of-sample forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ForecastStrategy {
    Direct,
    Rolling { horizon: usize },
}

/// Resolve a mode into a strategy for `steps` steps
pub fn select_strategy(mode: ForecastMode, steps: usize, threshold: usize) -> Result<ForecastStrategy> {
    match mode {
        ForecastMode::Auto if steps <= threshold => Ok(ForecastStrategy::Direct),
        ForecastMode::Auto => {
            warn!(
                steps,
                threshold,
                "Long-horizon forecast beyond the recommended threshold, using rolling windows"
            );
            Ok(ForecastStrategy::Rolling {
                horizon: threshold.max(1),
            })
        }
        ForecastMode::Recursive => {
            if steps > threshold {
                warn!(steps, threshold, "Direct forecast beyond the recommended threshold");
            }
            Ok(ForecastStrategy::Direct)
        }
        ForecastMode::Rolling { horizon: 0 } => Err(ForecastError::invalid_param(
            "horizon",
            0,
            "rolling forecasts need a positive horizon",
        )),
        ForecastMode::Rolling { horizon } => Ok(ForecastStrategy::Rolling { horizon }),
    }
}

/// Forecast `steps` values in windows of `horizon`.
///
/// Each window asks the model for the cumulative step count and keeps the new
/// tail; the model is never refit. A failing first window is an error, later
/// failures repeat the last predicted value.
pub fn rolling_forecast<F>(predict: F, steps: usize, horizon: usize) -> Result<Vec<f64>>
where
    F: Fn(usize) -> Result<Vec<f64>>,
{
    if horizon == 0 {
        return Err(ForecastError::invalid_param("horizon", 0, "must be positive"));
    }

    let mut predictions: Vec<f64> = Vec::with_capacity(steps);
    let mut start = 0;
    while start < steps {
        let end = (start + horizon).min(steps);
        let window = predict(end).and_then(|all| {
            if all.len() < end {
                Err(ForecastError::EvaluationError(format!(
                    "model returned {} values for {} steps",
                    all.len(),
                    end
                )))
            } else {
                Ok(all[start..end].to_vec())
            }
        });

        match (window, predictions.last().copied()) {
            (Ok(values), _) => predictions.extend(values),
            (Err(e), None) => return Err(e),
            (Err(e), Some(last)) => {
                warn!(start, end, error = %e, "Rolling window failed, repeating last prediction");
                predictions.extend(std::iter::repeat(last).take(end - start));
            }
        }
        start = end;
    }
    Ok(predictions)
}

/// Run a forecast closure with horizon capping and overflow fallback.
///
/// Horizons above [`MAX_SAFE_STEPS`] are capped; a `HorizonOverflow` retries
/// with [`FALLBACK_STEPS`]. The result is padded to `steps` with the last value.
pub fn forecast_guarded<F>(steps: usize, mut forecast: F) -> Result<Vec<f64>>
where
    F: FnMut(usize) -> Result<Vec<f64>>,
{
    if steps == 0 {
        return Ok(Vec::new());
    }

    let capped = steps.min(MAX_SAFE_STEPS);
    if capped < steps {
        warn!(requested = steps, capped, "Forecast horizon capped");
    }

    let mut values = match forecast(capped) {
        Ok(values) => values,
        Err(ForecastError::HorizonOverflow { .. }) => {
            let fallback = capped.min(FALLBACK_STEPS);
            warn!(requested = steps, fallback, "Forecast horizon overflowed, retrying shorter");
            forecast(fallback)?
        }
        Err(e) => return Err(e),
    };

    if values.len() < steps {
        let last = values.last().copied().ok_or_else(|| {
            ForecastError::EvaluationError("forecast produced no values".to_string())
        })?;
        warn!(produced = values.len(), requested = steps, "Padding forecast with the last value");
        values.resize(steps, last);
    }
    values.truncate(steps);
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_table() {
        assert_eq!(frequency_threshold(Some(Frequency::MonthStart), 120), 24);
        assert_eq!(frequency_threshold(Some(Frequency::QuarterEnd), 120), 24);
        assert_eq!(frequency_threshold(Some(Frequency::Weekly), 120), 26);
        assert_eq!(frequency_threshold(Some(Frequency::Daily), 120), 90);
        assert_eq!(frequency_threshold(Some(Frequency::BusinessDaily), 10), 90);
        assert_eq!(frequency_threshold(Some(Frequency::Hourly(1)), 10), 168);
        assert_eq!(frequency_threshold(Some(Frequency::Minutely(5)), 10), 168);
    }

    #[test]
    fn test_threshold_fallback() {
        assert_eq!(frequency_threshold(None, 20), 6);
        assert_eq!(frequency_threshold(None, 200), 20);
        assert_eq!(frequency_threshold(None, 5000), 36);
        assert_eq!(frequency_threshold(Some(Frequency::Fixed(90)), 200), 20);
    }

    #[test]
    fn test_in_sample_window() {
        assert_eq!(in_sample_window(24, 100), 12);
        assert_eq!(in_sample_window(6, 100), 6);
        assert_eq!(in_sample_window(168, 100), 24);
        assert_eq!(in_sample_window(90, 10), 10);
    }

    #[test]
    fn test_select_strategy() {
        assert_eq!(select_strategy(ForecastMode::Auto, 24, 24).unwrap(), ForecastStrategy::Direct);
        assert_eq!(
            select_strategy(ForecastMode::Auto, 25, 24).unwrap(),
            ForecastStrategy::Rolling { horizon: 24 }
        );
        assert_eq!(select_strategy(ForecastMode::Recursive, 500, 24).unwrap(), ForecastStrategy::Direct);
        assert!(select_strategy(ForecastMode::Rolling { horizon: 0 }, 5, 24).is_err());
    }

    #[test]
    fn test_rolling_matches_direct_for_deterministic_model() {
        let model = |n: usize| -> Result<Vec<f64>> { Ok((0..n).map(|i| i as f64 * 2.0).collect()) };
        let rolled = rolling_forecast(model, 10, 3).unwrap();
        assert_eq!(rolled, model(10).unwrap());
    }

    #[test]
    fn test_rolling_failures() {
        let always_fails = |_: usize| -> Result<Vec<f64>> { Err(ForecastError::NotFitted) };
        assert!(rolling_forecast(always_fails, 10, 3).is_err());

        let fails_late = |n: usize| -> Result<Vec<f64>> {
            if n > 3 {
                Err(ForecastError::TrainingError("boom".to_string()))
            } else {
                Ok(vec![1.0, 2.0, 3.0][..n].to_vec())
            }
        };
        let rolled = rolling_forecast(fails_late, 7, 3).unwrap();
        assert_eq!(rolled, vec![1.0, 2.0, 3.0, 3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_guard_caps_and_pads() {
        let mut calls = Vec::new();
        let out = forecast_guarded(MAX_SAFE_STEPS + 5, |n| {
            calls.push(n);
            Ok(vec![1.5; n])
        })
        .unwrap();
        assert_eq!(calls, vec![MAX_SAFE_STEPS]);
        assert_eq!(out.len(), MAX_SAFE_STEPS + 5);
        assert_eq!(out.last(), Some(&1.5));
    }

    #[test]
    fn test_guard_overflow_fallback() {
        let out = forecast_guarded(2_000, |n| {
            if n > FALLBACK_STEPS {
                Err(ForecastError::HorizonOverflow { steps: n })
            } else {
                Ok((0..n).map(|i| i as f64).collect())
            }
        })
        .unwrap();
        assert_eq!(out.len(), 2_000);
        assert_eq!(out[FALLBACK_STEPS - 1], (FALLBACK_STEPS - 1) as f64);
        assert_eq!(out[1_999], (FALLBACK_STEPS - 1) as f64);
    }

    #[test]
    fn test_guard_propagates_other_errors() {
        let result = forecast_guarded(3, |_| Err(ForecastError::NotFitted));
        assert!(matches!(result, Err(ForecastError::NotFitted)));
    }
}
