//! Additive-component forecaster
//!
//! A piecewise-linear trend with changepoints plus Fourier seasonalities,
//! fitted jointly by ridge regression. Changepoint slopes are shrunk by
//! `1 / changepoint_prior_scale`, Fourier terms by `1 / seasonality_prior_scale`.
//!
//! The model has no cheap way to re-predict history, so it exposes no fitted
//! values and in-sample evaluation uses the recent-window fallback.

use chrono::NaiveDateTime;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::f64::consts::PI;
use tracing::{debug, info};

use super::algorithm::{
    future_timestamps, param_f64, param_str, param_usize, resolve_frequency, training_data,
    Algorithm, FitMode, HyperParams, Optimizable,
};
use super::linalg::solve_ridge;
use crate::error::{ForecastError, Result};
use crate::evaluation::forecast_guarded;
use crate::timeseries::{Frequency, Series};

const SECS_PER_DAY: f64 = 86_400.0;
const MIN_OBSERVATIONS: usize = 3;

/// How seasonal components combine with the trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

impl SeasonalityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonalityMode::Additive => "additive",
            SeasonalityMode::Multiplicative => "multiplicative",
        }
    }
}

/// Whether a seasonal component is fitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Toggle {
    /// Decide from the history span and spacing
    Auto,
    On,
    Off,
    /// On, with an explicit Fourier order
    Order(usize),
}

impl Toggle {
    fn from_param(params: &HyperParams, name: &str) -> Result<Self> {
        match params.get(name) {
            None | Some(Value::Null) => Ok(Toggle::Auto),
            Some(Value::Bool(true)) => Ok(Toggle::On),
            Some(Value::Bool(false)) => Ok(Toggle::Off),
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "auto" => Ok(Toggle::Auto),
                "true" => Ok(Toggle::On),
                "false" => Ok(Toggle::Off),
                _ => Err(ForecastError::invalid_param(name, s, "expected auto, true, false or an order")),
            },
            Some(v) => match v.as_u64() {
                Some(0) => Ok(Toggle::Off),
                Some(order) => Ok(Toggle::Order(order as usize)),
                None => Err(ForecastError::invalid_param(name, v, "expected auto, true, false or an order")),
            },
        }
    }

    fn to_value(self) -> Value {
        match self {
            Toggle::Auto => json!("auto"),
            Toggle::On => json!(true),
            Toggle::Off => json!(false),
            Toggle::Order(order) => json!(order),
        }
    }

    /// Fourier order to fit, if any
    fn resolve(self, auto: bool, default_order: usize) -> Option<usize> {
        match self {
            Toggle::Auto if auto => Some(default_order),
            Toggle::Auto | Toggle::Off => None,
            Toggle::On => Some(default_order),
            Toggle::Order(order) => Some(order),
        }
    }
}

/// Fourier seasonality with a period in days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalComponent {
    pub name: String,
    pub period_days: f64,
    pub order: usize,
}

impl SeasonalComponent {
    fn features(&self, days: f64, out: &mut Vec<f64>) {
        for k in 1..=self.order {
            let angle = 2.0 * PI * k as f64 * days / self.period_days;
            out.push(angle.sin());
            out.push(angle.cos());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdditiveState {
    start_secs: i64,
    span_secs: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    trend_coefs: Vec<f64>,
    components: Vec<SeasonalComponent>,
    seasonal_coefs: Vec<f64>,
    frequency: Frequency,
    last: NaiveDateTime,
}

impl AdditiveState {
    fn scaled_time(&self, ts: NaiveDateTime) -> f64 {
        (ts.and_utc().timestamp() - self.start_secs) as f64 / self.span_secs
    }
}

/// Piecewise-linear trend plus Fourier seasonality
#[derive(Debug, Clone)]
pub struct AdditiveForecaster {
    n_changepoints: usize,
    changepoint_range: f64,
    changepoint_prior_scale: f64,
    seasonality_prior_scale: f64,
    seasonality_mode: SeasonalityMode,
    yearly: Toggle,
    weekly: Toggle,
    daily: Toggle,
    state: Option<AdditiveState>,
}

impl Default for AdditiveForecaster {
    fn default() -> Self {
        Self {
            n_changepoints: 25,
            changepoint_range: 0.8,
            changepoint_prior_scale: 0.1,
            seasonality_prior_scale: 10.0,
            seasonality_mode: SeasonalityMode::Additive,
            yearly: Toggle::Auto,
            weekly: Toggle::Auto,
            daily: Toggle::Auto,
            state: None,
        }
    }
}

impl AdditiveForecaster {
    pub const NAME: &'static str = "Additive";

    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let defaults = Self::default();

        let changepoint_prior_scale =
            param_f64(params, "changepoint_prior_scale", defaults.changepoint_prior_scale)?;
        if changepoint_prior_scale <= 0.0 {
            return Err(ForecastError::invalid_param(
                "changepoint_prior_scale",
                changepoint_prior_scale,
                "must be positive",
            ));
        }
        let seasonality_prior_scale =
            param_f64(params, "seasonality_prior_scale", defaults.seasonality_prior_scale)?;
        if seasonality_prior_scale <= 0.0 {
            return Err(ForecastError::invalid_param(
                "seasonality_prior_scale",
                seasonality_prior_scale,
                "must be positive",
            ));
        }
        let changepoint_range = param_f64(params, "changepoint_range", defaults.changepoint_range)?;
        if !(changepoint_range > 0.0 && changepoint_range <= 1.0) {
            return Err(ForecastError::invalid_param(
                "changepoint_range",
                changepoint_range,
                "must be in (0, 1]",
            ));
        }

        let mode = param_str(params, "seasonality_mode", SeasonalityMode::Additive.as_str())?;
        let seasonality_mode = match mode.as_str() {
            "additive" => SeasonalityMode::Additive,
            "multiplicative" => SeasonalityMode::Multiplicative,
            other => {
                return Err(ForecastError::invalid_param(
                    "seasonality_mode",
                    other,
                    "expected additive or multiplicative",
                ))
            }
        };

        Ok(Self {
            n_changepoints: param_usize(params, "n_changepoints", defaults.n_changepoints)?,
            changepoint_range,
            changepoint_prior_scale,
            seasonality_prior_scale,
            seasonality_mode,
            yearly: Toggle::from_param(params, "yearly_seasonality")?,
            weekly: Toggle::from_param(params, "weekly_seasonality")?,
            daily: Toggle::from_param(params, "daily_seasonality")?,
            state: None,
        })
    }

    /// Seasonal components of the last fit
    pub fn components(&self) -> Vec<String> {
        self.state
            .as_ref()
            .map(|s| s.components.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of changepoints placed by the last fit
    pub fn n_changepoints_used(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.changepoints.len())
    }

    fn seasonal_components(&self, span_days: f64, spacing_days: f64) -> Vec<SeasonalComponent> {
        let candidates = [
            ("yearly", 365.25, self.yearly, span_days >= 730.0, 10),
            ("weekly", 7.0, self.weekly, span_days >= 14.0 && spacing_days < 7.0, 3),
            ("daily", 1.0, self.daily, span_days >= 2.0 && spacing_days < 1.0, 4),
        ];
        candidates
            .into_iter()
            .filter_map(|(name, period_days, toggle, auto, default_order)| {
                toggle.resolve(auto, default_order).map(|order| SeasonalComponent {
                    name: name.to_string(),
                    period_days,
                    order,
                })
            })
            .collect()
    }

    fn changepoints(&self, t: &[f64]) -> Vec<f64> {
        let history = (t.len() as f64 * self.changepoint_range).floor() as usize;
        let n_cp = self.n_changepoints.min(history.saturating_sub(1));
        if n_cp == 0 {
            return Vec::new();
        }
        let mut points: Vec<f64> = (1..=n_cp)
            .map(|i| {
                let idx = (i as f64 * (history - 1) as f64 / n_cp as f64).round() as usize;
                t[idx]
            })
            .collect();
        points.dedup();
        points
    }

    fn estimate(&self, data: &Series) -> Result<AdditiveState> {
        let n = data.len();
        if n < MIN_OBSERVATIONS {
            return Err(ForecastError::TrainingError(format!(
                "Additive model needs at least {} observations, got {}",
                MIN_OBSERVATIONS, n
            )));
        }

        let frequency = resolve_frequency(data)?;
        let stamps = data.timestamps();
        let start_secs = stamps[0].and_utc().timestamp();
        let span_secs = (stamps[n - 1].and_utc().timestamp() - start_secs) as f64;

        let t: Vec<f64> = stamps
            .iter()
            .map(|ts| (ts.and_utc().timestamp() - start_secs) as f64 / span_secs)
            .collect();
        let changepoints = self.changepoints(&t);
        let components = self.seasonal_components(
            span_secs / SECS_PER_DAY,
            frequency.nominal_seconds() / SECS_PER_DAY,
        );

        let y_scale = data
            .values()
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };
        let y = Array1::from_iter(data.values().iter().map(|v| v / y_scale));

        let trend_x = rows_to_array(t.iter().map(|&ti| trend_features(ti, &changepoints)).collect())?;
        let seasonal_x = rows_to_array(
            stamps
                .iter()
                .map(|ts| seasonal_features(ts, &components))
                .collect(),
        )?;

        let n_trend = trend_x.ncols();
        let n_seasonal = seasonal_x.ncols();
        let trend_penalty = |k: usize| if k < 2 { 0.0 } else { 1.0 / self.changepoint_prior_scale };
        let seasonal_penalty = 1.0 / self.seasonality_prior_scale;

        let (trend_coefs, seasonal_coefs) = match self.seasonality_mode {
            SeasonalityMode::Additive => {
                let x = ndarray::concatenate(ndarray::Axis(1), &[trend_x.view(), seasonal_x.view()])?;
                let penalties = Array1::from_iter(
                    (0..n_trend)
                        .map(trend_penalty)
                        .chain(std::iter::repeat(seasonal_penalty).take(n_seasonal)),
                );
                let beta = solve_ridge(&x, &y, &penalties)?.to_vec();
                (beta[..n_trend].to_vec(), beta[n_trend..].to_vec())
            }
            SeasonalityMode::Multiplicative => {
                let penalties = Array1::from_iter((0..n_trend).map(trend_penalty));
                let trend_beta = solve_ridge(&trend_x, &y, &penalties)?;
                let trend_hat = trend_x.dot(&trend_beta);

                let relative = Array1::from_iter(y.iter().zip(trend_hat.iter()).map(|(yi, ti)| {
                    if ti.abs() > 1e-8 {
                        yi / ti - 1.0
                    } else {
                        0.0
                    }
                }));
                let seasonal_beta = if n_seasonal == 0 {
                    Vec::new()
                } else {
                    let penalties = Array1::from_elem(n_seasonal, seasonal_penalty);
                    solve_ridge(&seasonal_x, &relative, &penalties)?.to_vec()
                };
                (trend_beta.to_vec(), seasonal_beta)
            }
        };

        Ok(AdditiveState {
            start_secs,
            span_secs,
            y_scale,
            changepoints,
            trend_coefs,
            components,
            seasonal_coefs,
            frequency,
            last: stamps[n - 1],
        })
    }

    fn forecast_at(&self, state: &AdditiveState, stamps: &[NaiveDateTime]) -> Vec<f64> {
        stamps
            .iter()
            .map(|ts| {
                let trend: f64 = trend_features(state.scaled_time(*ts), &state.changepoints)
                    .iter()
                    .zip(&state.trend_coefs)
                    .map(|(x, b)| x * b)
                    .sum();
                let seasonal: f64 = seasonal_features(ts, &state.components)
                    .iter()
                    .zip(&state.seasonal_coefs)
                    .map(|(x, b)| x * b)
                    .sum();
                let value = match self.seasonality_mode {
                    SeasonalityMode::Additive => trend + seasonal,
                    SeasonalityMode::Multiplicative => trend * (1.0 + seasonal),
                };
                value * state.y_scale
            })
            .collect()
    }
}

fn trend_features(t: f64, changepoints: &[f64]) -> Vec<f64> {
    let mut row = Vec::with_capacity(2 + changepoints.len());
    row.push(1.0);
    row.push(t);
    row.extend(changepoints.iter().map(|c| (t - c).max(0.0)));
    row
}

fn seasonal_features(ts: &NaiveDateTime, components: &[SeasonalComponent]) -> Vec<f64> {
    let days = ts.and_utc().timestamp() as f64 / SECS_PER_DAY;
    let mut row = Vec::new();
    for component in components {
        component.features(days, &mut row);
    }
    row
}

fn rows_to_array(rows: Vec<Vec<f64>>) -> Result<Array2<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_rows, n_cols), flat)?)
}

impl Algorithm for AdditiveForecaster {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit(&mut self, train: &Series, validation: Option<&Series>, mode: FitMode) -> Result<()> {
        self.state = None;
        let data = training_data(train, validation, mode)?;
        debug!(points = data.len(), ?mode, seasonality = self.seasonality_mode.as_str(), "Fitting additive model");

        let state = self.estimate(&data)?;
        info!(
            changepoints = state.changepoints.len(),
            components = ?state.components.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Additive model fitted"
        );
        self.state = Some(state);
        Ok(())
    }

    fn predict(&self, steps: usize) -> Result<Vec<f64>> {
        let state = self.state.as_ref().ok_or(ForecastError::NotFitted)?;
        forecast_guarded(steps, |n| {
            let stamps = future_timestamps(state.frequency, state.last, n)?;
            Ok(self.forecast_at(state, &stamps))
        })
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn params(&self) -> HyperParams {
        let value = json!({
            "n_changepoints": self.n_changepoints,
            "changepoint_range": self.changepoint_range,
            "changepoint_prior_scale": self.changepoint_prior_scale,
            "seasonality_prior_scale": self.seasonality_prior_scale,
            "seasonality_mode": self.seasonality_mode.as_str(),
            "yearly_seasonality": self.yearly.to_value(),
            "weekly_seasonality": self.weekly.to_value(),
            "daily_seasonality": self.daily.to_value(),
        });
        value.as_object().cloned().unwrap_or_default()
    }

    fn frequency(&self) -> Option<Frequency> {
        self.state.as_ref().map(|s| s.frequency)
    }

    fn as_optimizable(&self) -> Option<&dyn Optimizable> {
        Some(self)
    }

    fn snapshot(&self) -> Result<Value> {
        let learned = match &self.state {
            Some(s) => json!({
                "changepoints": s.changepoints,
                "trend": s.trend_coefs,
                "components": s.components,
                "seasonal": s.seasonal_coefs,
                "y_scale": s.y_scale,
                "last_timestamp": s.last,
            }),
            None => Value::Null,
        };
        Ok(json!({
            "family": Self::NAME,
            "params": self.params(),
            "fitted": self.is_fitted(),
            "frequency": self.frequency().map(|f| f.code()),
            "state": learned,
        }))
    }
}

impl Optimizable for AdditiveForecaster {
    fn with_params(&self, params: &HyperParams) -> Result<Box<dyn Algorithm>> {
        Ok(Box::new(AdditiveForecaster::from_params(params)?))
    }

    fn default_search_space(&self) -> Value {
        json!({
            "changepoint_prior_scale": {"type": "loguniform", "low": -4.0, "high": 1.0},
            "seasonality_prior_scale": {"type": "loguniform", "low": -2.0, "high": 3.0},
            "seasonality_mode": {"type": "choice", "options": ["additive", "multiplicative"]},
            "n_changepoints": {"type": "choice", "options": [15, 25, 35, 50]},
        })
    }
}
