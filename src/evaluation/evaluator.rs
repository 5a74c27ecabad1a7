//! In-sample and out-of-sample evaluation of fitted algorithms

use tracing::{debug, warn};

use super::metrics::Metrics;
use super::strategy::{
    frequency_threshold, in_sample_window, rolling_forecast, select_strategy, ForecastStrategy,
    IN_SAMPLE_WINDOW_MIN,
};
use crate::error::{ForecastError, Result};
use crate::timeseries::Series;
use crate::training::{Algorithm, Evaluation, EvaluationMode};

/// Evaluate a fitted algorithm against `test`.
///
/// Both modes return the same metric shape. The threshold that drives the
/// rolling window size and the degraded in-sample window is derived from the
/// frequency of `test` (or of the model when `test` has none).
pub fn evaluate_model<A>(model: &A, test: &Series, mode: EvaluationMode) -> Result<Evaluation>
where
    A: Algorithm + ?Sized,
{
    if !model.is_fitted() {
        return Err(ForecastError::NotFitted);
    }
    if test.is_empty() {
        return Err(ForecastError::EvaluationError(
            "evaluation series is empty".to_string(),
        ));
    }

    let frequency = test.effective_frequency().or_else(|| model.frequency());
    let threshold = frequency_threshold(frequency, test.len());

    let (predictions, actuals, strategy) = match mode {
        EvaluationMode::InSample => {
            let (predictions, actuals) = in_sample(model, test, threshold)?;
            (predictions, actuals, None)
        }
        EvaluationMode::OutOfSample(forecast_mode) => {
            let steps = test.len();
            let strategy = select_strategy(forecast_mode, steps, threshold)?;
            let predictions = match strategy {
                ForecastStrategy::Direct => model.predict(steps)?,
                ForecastStrategy::Rolling { horizon } => {
                    rolling_forecast(|n| model.predict(n), steps, horizon)?
                }
            };
            (predictions, test.values().to_vec(), Some(strategy))
        }
    };

    let mut metrics = Metrics::compute(&actuals, &predictions)?;
    for (name, value) in model.extra_metrics() {
        metrics.insert_extra(name, value);
    }

    debug!(
        model = model.name(),
        rmse = metrics.rmse(),
        mae = metrics.mae(),
        mape = metrics.mape(),
        strategy = ?strategy,
        "Evaluation complete"
    );

    Ok(Evaluation {
        metrics,
        predictions,
        actuals,
        strategy,
    })
}

fn in_sample<A>(model: &A, test: &Series, threshold: usize) -> Result<(Vec<f64>, Vec<f64>)>
where
    A: Algorithm + ?Sized,
{
    if let Some(fitted) = model.fitted_values() {
        let aligned = align_by_timestamp(&fitted, test);
        if !aligned.0.is_empty() {
            return Ok(aligned);
        }
        debug!("Fitted values do not overlap the evaluation series, using a recent window");
    }

    // No fitted-value concept: score a short forecast against the last points
    let window = in_sample_window(threshold, test.len());
    match model.predict(window) {
        Ok(predictions) => Ok((predictions, test.tail(window).values().to_vec())),
        Err(e) => {
            let fallback = IN_SAMPLE_WINDOW_MIN.min(test.len());
            warn!(window, fallback, error = %e, "In-sample window prediction failed, retrying smaller");
            let predictions = model.predict(fallback)?;
            Ok((predictions, test.tail(fallback).values().to_vec()))
        }
    }
}

/// Pair fitted and actual values sharing a timestamp
fn align_by_timestamp(fitted: &Series, test: &Series) -> (Vec<f64>, Vec<f64>) {
    let mut predictions = Vec::new();
    let mut actuals = Vec::new();
    let (mut i, mut j) = (0, 0);
    let (ft, tt) = (fitted.timestamps(), test.timestamps());
    while i < ft.len() && j < tt.len() {
        match ft[i].cmp(&tt[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                predictions.push(fitted.values()[i]);
                actuals.push(test.values()[j]);
                i += 1;
                j += 1;
            }
        }
    }
    (predictions, actuals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ForecastMode;
    use crate::timeseries::Frequency;
    use crate::training::{FitMode, HyperParams};
    use chrono::{NaiveDate, NaiveDateTime};

    /// Forecasts a fixed ramp; optionally exposes fitted values
    #[derive(Debug)]
    struct Ramp {
        fitted: Option<Series>,
        frequency: Option<Frequency>,
    }

    impl Algorithm for Ramp {
        fn name(&self) -> &str {
            "Ramp"
        }
        fn fit(&mut self, _: &Series, _: Option<&Series>, _: FitMode) -> Result<()> {
            Ok(())
        }
        fn predict(&self, steps: usize) -> Result<Vec<f64>> {
            Ok((0..steps).map(|i| i as f64).collect())
        }
        fn is_fitted(&self) -> bool {
            true
        }
        fn params(&self) -> HyperParams {
            HyperParams::new()
        }
        fn frequency(&self) -> Option<Frequency> {
            self.frequency
        }
        fn fitted_values(&self) -> Option<Series> {
            self.fitted.clone()
        }
        fn snapshot(&self) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2015, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn monthly(values: Vec<f64>) -> Series {
        Series::from_values(start(), Frequency::MonthStart, values).unwrap()
    }

    #[test]
    fn test_direct_when_within_threshold() {
        let model = Ramp { fitted: None, frequency: Some(Frequency::MonthStart) };
        let test = monthly((0..24).map(|i| i as f64).collect());
        let eval = evaluate_model(&model, &test, EvaluationMode::OutOfSample(ForecastMode::Auto)).unwrap();

        assert_eq!(eval.strategy, Some(ForecastStrategy::Direct));
        assert_eq!(eval.metrics.rmse(), 0.0);
        assert_eq!(eval.metrics.mape(), 0.0);
    }

    #[test]
    fn test_rolling_beyond_threshold() {
        let model = Ramp { fitted: None, frequency: None };
        let test = monthly((0..30).map(|i| i as f64).collect());
        let eval = evaluate_model(&model, &test, EvaluationMode::OutOfSample(ForecastMode::Auto)).unwrap();

        assert_eq!(eval.strategy, Some(ForecastStrategy::Rolling { horizon: 24 }));
        assert_eq!(eval.predictions.len(), 30);
        assert_eq!(eval.metrics.rmse(), 0.0);
    }

    #[test]
    fn test_in_sample_degraded_window() {
        let model = Ramp { fitted: None, frequency: None };
        // threshold 24 -> window 12
        let test = monthly(vec![5.0; 40]);
        let eval = evaluate_model(&model, &test, EvaluationMode::InSample).unwrap();
        assert_eq!(eval.predictions.len(), 12);
        assert!(eval.strategy.is_none());
    }

    #[test]
    fn test_in_sample_uses_fitted_values() {
        let train = monthly((0..10).map(|i| i as f64 * 3.0).collect());
        let fitted = train.slice(2..10);
        let model = Ramp { fitted: Some(fitted), frequency: None };

        let eval = evaluate_model(&model, &train, EvaluationMode::InSample).unwrap();
        assert_eq!(eval.predictions.len(), 8);
        assert_eq!(eval.metrics.rmse(), 0.0);
    }

    #[test]
    fn test_idempotent() {
        let model = Ramp { fitted: None, frequency: None };
        let test = monthly((0..12).map(|i| (i as f64).sin() + 2.0).collect());
        let mode = EvaluationMode::OutOfSample(ForecastMode::Auto);
        let a = evaluate_model(&model, &test, mode).unwrap();
        let b = evaluate_model(&model, &test, mode).unwrap();
        assert_eq!(a.metrics, b.metrics);
    }
}
