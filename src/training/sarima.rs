//! Seasonal ARIMA forecaster
//!
//! Estimation follows the Hannan-Rissanen scheme: a long autoregression gives
//! innovation estimates, then one least-squares regression on AR lags,
//! seasonal AR lags, lagged innovations and trend terms gives the final
//! coefficients. Seasonal terms enter additively at multiples of `s`.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::f64::consts::PI;
use tracing::{debug, info, warn};

use super::algorithm::{
    param_str, param_usize, training_data, Algorithm, FitMode, HyperParams, Optimizable,
};
use super::linalg::solve_least_squares;
use crate::error::{ForecastError, Result};
use crate::evaluation::forecast_guarded;
use crate::timeseries::{Differencer, Frequency, Series};

/// Per-step root scaling applied to non-invertible or non-stationary lag polynomials
const SHRINK_FACTOR: f64 = 0.98;
const MAX_SHRINK_STEPS: i32 = 400;
/// Forecasts further than this many training ranges outside the data are rejected
const DIVERGENCE_RANGES: f64 = 10.0;

/// Deterministic trend terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    /// No trend
    None,
    /// Constant
    Constant,
    /// Linear time trend
    Linear,
    /// Constant plus linear time trend
    ConstantLinear,
}

impl Trend {
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "n" => Some(Trend::None),
            "c" => Some(Trend::Constant),
            "t" => Some(Trend::Linear),
            "ct" => Some(Trend::ConstantLinear),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Trend::None => "n",
            Trend::Constant => "c",
            Trend::Linear => "t",
            Trend::ConstantLinear => "ct",
        }
    }

    fn terms(&self, t: usize) -> Vec<f64> {
        match self {
            Trend::None => vec![],
            Trend::Constant => vec![1.0],
            Trend::Linear => vec![t as f64],
            Trend::ConstantLinear => vec![1.0, t as f64],
        }
    }

    fn n_terms(&self) -> usize {
        self.terms(0).len()
    }
}

/// Model orders, (p, d, q) x (P, D, Q, s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SarimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub period: usize,
}

impl Default for SarimaOrder {
    fn default() -> Self {
        Self {
            p: 1,
            d: 1,
            q: 1,
            seasonal_p: 1,
            seasonal_d: 1,
            seasonal_q: 1,
            period: 12,
        }
    }
}

impl SarimaOrder {
    fn ar_lags(&self) -> Vec<usize> {
        merge_lags(self.p, self.seasonal_p, self.period)
    }

    fn ma_lags(&self) -> Vec<usize> {
        merge_lags(self.q, self.seasonal_q, self.period)
    }
}

fn merge_lags(order: usize, seasonal_order: usize, period: usize) -> Vec<usize> {
    let mut lags: Vec<usize> = (1..=order).collect();
    lags.extend((1..=seasonal_order).map(|k| k * period));
    lags.sort_unstable();
    lags.dedup();
    lags
}

/// Learned state of a fitted model
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SarimaState {
    differencer: Differencer,
    /// Differenced training series
    diffed: Vec<f64>,
    /// Innovations aligned with `diffed`
    innovations: Vec<f64>,
    trend_coefs: Vec<f64>,
    ar_coefs: Vec<(usize, f64)>,
    ma_coefs: Vec<(usize, f64)>,
    fitted: Series,
    sigma2: f64,
    aic: f64,
    bic: f64,
    frequency: Option<Frequency>,
    /// Training range, used to reject diverging forecasts
    value_min: f64,
    value_max: f64,
}

/// Seasonal ARIMA model
#[derive(Debug, Clone)]
pub struct Sarima {
    order: SarimaOrder,
    trend: Trend,
    state: Option<SarimaState>,
}

impl Default for Sarima {
    fn default() -> Self {
        Self {
            order: SarimaOrder::default(),
            trend: Trend::Constant,
            state: None,
        }
    }
}

impl Sarima {
    pub const NAME: &'static str = "Sarima";

    pub fn new(order: SarimaOrder, trend: Trend) -> Self {
        Self {
            order,
            trend,
            state: None,
        }
    }

    /// Build from hyperparameters.
    ///
    /// Accepts `order: [p, d, q]`, `seasonal_order: [P, D, Q, s]` and `trend`,
    /// with flat `p`, `d`, `q`, `P`, `D`, `Q`, `s` keys taking precedence.
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        let mut order = SarimaOrder::default();

        if let Some(v) = params.get("order").filter(|v| !v.is_null()) {
            let parts = usize_array(v, "order", 3)?;
            order.p = parts[0];
            order.d = parts[1];
            order.q = parts[2];
        }
        if let Some(v) = params.get("seasonal_order").filter(|v| !v.is_null()) {
            let parts = usize_array(v, "seasonal_order", 4)?;
            order.seasonal_p = parts[0];
            order.seasonal_d = parts[1];
            order.seasonal_q = parts[2];
            order.period = parts[3];
        }

        order.p = param_usize(params, "p", order.p)?;
        order.d = param_usize(params, "d", order.d)?;
        order.q = param_usize(params, "q", order.q)?;
        order.seasonal_p = param_usize(params, "P", order.seasonal_p)?;
        order.seasonal_d = param_usize(params, "D", order.seasonal_d)?;
        order.seasonal_q = param_usize(params, "Q", order.seasonal_q)?;
        order.period = param_usize(params, "s", order.period)?;

        if order.period < 2 {
            if order.seasonal_p + order.seasonal_d + order.seasonal_q > 0 {
                warn!(period = order.period, "Seasonal period below 2, dropping seasonal terms");
            }
            order.seasonal_p = 0;
            order.seasonal_d = 0;
            order.seasonal_q = 0;
            order.period = 0;
        }

        let trend_code = param_str(params, "trend", Trend::Constant.code())?;
        let trend = Trend::parse(&trend_code).ok_or_else(|| {
            ForecastError::invalid_param("trend", &trend_code, "expected one of n, c, t, ct")
        })?;

        Ok(Self::new(order, trend))
    }

    pub fn order(&self) -> SarimaOrder {
        self.order
    }

    pub fn trend(&self) -> Trend {
        self.trend
    }

    /// Akaike information criterion of the last fit
    pub fn aic(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.aic)
    }

    /// Bayesian information criterion of the last fit
    pub fn bic(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.bic)
    }

    /// Minimum observations for a non-degenerate fit
    pub fn min_samples(&self) -> usize {
        3 * (self.order.p + self.order.seasonal_p)
    }

    fn estimate(&self, data: &Series) -> Result<SarimaState> {
        let values = data.values();
        let n = values.len();
        if n < self.min_samples() {
            return Err(ForecastError::TrainingError(format!(
                "Sarima needs at least {} observations for order {:?}, got {}",
                self.min_samples(),
                self.order,
                n
            )));
        }

        let mut differencer = Differencer::new(self.order.d)
            .with_seasonal(self.order.seasonal_d, self.order.period);
        let w = differencer
            .transform(values)
            .map_err(|e| ForecastError::TrainingError(e.to_string()))?;
        let n_w = w.len();

        let ar_lags = self.order.ar_lags();
        let ma_lags = self.order.ma_lags();
        let max_ar = ar_lags.last().copied().unwrap_or(0);
        let max_ma = ma_lags.last().copied().unwrap_or(0);
        let n_trend = self.trend.n_terms();
        let n_params = n_trend + ar_lags.len() + ma_lags.len();

        // Stage one: long autoregression for innovation estimates
        let (stage_one, long_order) = if ma_lags.is_empty() {
            (vec![0.0; n_w], 0)
        } else {
            let m = (max_ar.max(max_ma) + 1)
                .max((n_w as f64).ln().powi(2) as usize)
                .min(n_w / 2);
            (long_ar_residuals(&w, m)?, m)
        };

        // Stage two: regression on lags and innovation lags
        let start = max_ar.max(if ma_lags.is_empty() { 0 } else { max_ma + long_order });
        if n_w <= start + n_params + 1 {
            return Err(ForecastError::TrainingError(format!(
                "Sarima needs more data: {} differenced observations for {} parameters starting at lag {}",
                n_w, n_params, start
            )));
        }

        let rows = n_w - start;
        let (trend_coefs, ar_coefs, ma_coefs) = if n_params == 0 {
            (vec![], vec![], vec![])
        } else {
            let mut design = Array2::zeros((rows, n_params));
            for (r, t) in (start..n_w).enumerate() {
                let regressors = self.regressors(t, &w, &stage_one, &ar_lags, &ma_lags);
                for (c, v) in regressors.into_iter().enumerate() {
                    design[[r, c]] = v;
                }
            }
            let target = Array1::from(w[start..].to_vec());
            let beta = solve_least_squares(&design, &target)?;

            let beta = beta.to_vec();
            let trend_coefs = beta[..n_trend].to_vec();
            let ar_coefs: Vec<(usize, f64)> = ar_lags
                .iter()
                .copied()
                .zip(beta[n_trend..n_trend + ar_lags.len()].iter().copied())
                .collect();
            let ma_coefs: Vec<(usize, f64)> = ma_lags
                .iter()
                .copied()
                .zip(beta[n_trend + ar_lags.len()..].iter().copied())
                .collect();
            (trend_coefs, ar_coefs, ma_coefs)
        };
        let ar_coefs = constrain_roots(ar_coefs, 1.0, "autoregressive")?;
        let ma_coefs = constrain_roots(ma_coefs, -1.0, "moving average")?;

        // Innovations under the final coefficients
        let mut innovations = vec![0.0; n_w];
        let mut fitted_w = Vec::with_capacity(rows);
        for t in start..n_w {
            let pred = one_step(t, &w, &innovations, &self.trend, &trend_coefs, &ar_coefs, &ma_coefs);
            innovations[t] = w[t] - pred;
            fitted_w.push(pred);
        }

        let residuals = &innovations[start..];
        let sigma2 = residuals.iter().map(|e| e * e).sum::<f64>() / rows as f64;
        if !sigma2.is_finite() || fitted_w.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::TrainingError(
                "Sarima fit diverged".to_string(),
            ));
        }

        let k = (n_params + 1) as f64;
        let log_lik = -(rows as f64) / 2.0 * ((2.0 * PI * sigma2.max(1e-12)).ln() + 1.0);
        let aic = 2.0 * k - 2.0 * log_lik;
        let bic = k * (rows as f64).ln() - 2.0 * log_lik;

        // y_hat = y - innovation, since differencing is linear in past values
        let offset = differencer.total_lag();
        let fitted_values: Vec<f64> = (start..n_w)
            .map(|t| values[offset + t] - innovations[t])
            .collect();
        let fitted_stamps = data.timestamps()[offset + start..].to_vec();
        let fitted = Series::new(fitted_stamps, fitted_values)?.with_frequency(data.frequency());

        Ok(SarimaState {
            differencer,
            diffed: w,
            innovations,
            trend_coefs,
            ar_coefs,
            ma_coefs,
            fitted,
            sigma2,
            aic,
            bic,
            frequency: data.effective_frequency(),
            value_min: values.iter().copied().fold(f64::INFINITY, f64::min),
            value_max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    fn regressors(
        &self,
        t: usize,
        w: &[f64],
        innovations: &[f64],
        ar_lags: &[usize],
        ma_lags: &[usize],
    ) -> Vec<f64> {
        let mut row = self.trend.terms(t);
        row.extend(ar_lags.iter().map(|&l| w[t - l]));
        row.extend(ma_lags.iter().map(|&l| innovations[t - l]));
        row
    }

    fn forecast(&self, state: &SarimaState, steps: usize) -> Result<Vec<f64>> {
        let mut w = state.diffed.clone();
        let mut e = state.innovations.clone();
        w.reserve(steps);
        e.reserve(steps);

        for _ in 0..steps {
            let t = w.len();
            let pred = one_step(
                t,
                &w,
                &e,
                &self.trend,
                &state.trend_coefs,
                &state.ar_coefs,
                &state.ma_coefs,
            );
            w.push(pred);
            // Future shocks have expectation zero
            e.push(0.0);
        }

        let forecast = state.differencer.integrate(&w[state.diffed.len()..])?;
        check_divergence(state, &forecast)?;
        Ok(forecast)
    }
}

/// Reject forecasts far outside the training range, allowing the band to
/// widen with the horizon
fn check_divergence(state: &SarimaState, forecast: &[f64]) -> Result<()> {
    let span = state.value_max - state.value_min;
    let span = if span > 0.0 { span } else { state.value_max.abs().max(1.0) };
    let n_obs = (state.diffed.len() + state.differencer.total_lag()).max(1) as f64;
    let widen = 1.0 + forecast.len() as f64 / n_obs;
    let bound = DIVERGENCE_RANGES * span * widen * widen;
    let (low, high) = (state.value_min - bound, state.value_max + bound);

    match forecast.iter().find(|v| !(low..=high).contains(*v)) {
        Some(v) => Err(ForecastError::TrainingError(format!(
            "Sarima forecast diverged: {} is far outside the training range [{}, {}]",
            v, state.value_min, state.value_max
        ))),
        None => Ok(()),
    }
}

/// Dense coefficients `a_1..a_n` of `1 - sign * sum(c_l z^l)`
fn lag_polynomial(coefs: &[(usize, f64)], sign: f64) -> Vec<f64> {
    let degree = coefs.iter().map(|(l, _)| *l).max().unwrap_or(0);
    let mut poly = vec![0.0; degree];
    for &(lag, c) in coefs {
        if lag > 0 {
            poly[lag - 1] += sign * c;
        }
    }
    poly
}

/// True when `1 - sum(a_k z^k)` has every root outside the unit circle.
///
/// Runs the Levinson step-down recursion; the polynomial qualifies exactly
/// when every reflection coefficient has magnitude below one.
fn roots_outside_unit_circle(poly: &[f64]) -> bool {
    if poly.iter().any(|c| !c.is_finite()) {
        return false;
    }
    let mut a = poly.to_vec();
    while let Some(&k) = a.last() {
        if k.abs() >= 1.0 {
            return false;
        }
        let n = a.len();
        let denom = 1.0 - k * k;
        a = (0..n - 1).map(|j| (a[j] + k * a[n - 2 - j]) / denom).collect();
    }
    true
}

/// Pull the roots of a lag polynomial outside the unit circle.
///
/// `sign` is `1.0` for autoregressive terms (`1 - sum`) and `-1.0` for
/// moving-average terms (`1 + sum`). Scaling the lag-`l` coefficient by
/// `r^l` scales every root by `1 / r`, so the shape of the polynomial is kept.
fn constrain_roots(coefs: Vec<(usize, f64)>, sign: f64, kind: &str) -> Result<Vec<(usize, f64)>> {
    if roots_outside_unit_circle(&lag_polynomial(&coefs, sign)) {
        return Ok(coefs);
    }
    if coefs.iter().any(|(_, c)| !c.is_finite()) {
        return Err(ForecastError::TrainingError(format!(
            "Sarima fit diverged: non-finite {} coefficients",
            kind
        )));
    }

    for step in 1..=MAX_SHRINK_STEPS {
        let r = SHRINK_FACTOR.powi(step);
        let shrunk: Vec<(usize, f64)> = coefs.iter().map(|&(l, c)| (l, c * r.powi(l as i32))).collect();
        if roots_outside_unit_circle(&lag_polynomial(&shrunk, sign)) {
            warn!(kind, scale = r, "Sarima lag polynomial had roots inside the unit circle, shrinking");
            return Ok(shrunk);
        }
    }
    Err(ForecastError::TrainingError(format!(
        "Sarima {} coefficients could not be made stable",
        kind
    )))
}

/// Residuals of an order-`m` autoregression with intercept
fn long_ar_residuals(w: &[f64], m: usize) -> Result<Vec<f64>> {
    let n = w.len();
    if m == 0 || n <= 2 * m + 1 {
        return Err(ForecastError::TrainingError(format!(
            "{} differenced observations are too few for a long autoregression of order {}",
            n, m
        )));
    }

    let rows = n - m;
    let mut design = Array2::zeros((rows, m + 1));
    for (r, t) in (m..n).enumerate() {
        design[[r, 0]] = 1.0;
        for l in 1..=m {
            design[[r, l]] = w[t - l];
        }
    }
    let target = Array1::from(w[m..].to_vec());
    let beta = solve_least_squares(&design, &target)?;
    let fitted = design.dot(&beta);

    let mut residuals = vec![0.0; n];
    for (r, t) in (m..n).enumerate() {
        residuals[t] = w[t] - fitted[r];
    }
    Ok(residuals)
}

fn one_step(
    t: usize,
    w: &[f64],
    innovations: &[f64],
    trend: &Trend,
    trend_coefs: &[f64],
    ar_coefs: &[(usize, f64)],
    ma_coefs: &[(usize, f64)],
) -> f64 {
    let trend_part: f64 = trend
        .terms(t)
        .iter()
        .zip(trend_coefs)
        .map(|(x, b)| x * b)
        .sum();
    let ar_part: f64 = ar_coefs
        .iter()
        .filter(|(l, _)| *l <= t)
        .map(|(l, phi)| phi * w[t - l])
        .sum();
    let ma_part: f64 = ma_coefs
        .iter()
        .filter(|(l, _)| *l <= t)
        .map(|(l, theta)| theta * innovations[t - l])
        .sum();
    trend_part + ar_part + ma_part
}

fn usize_array(value: &Value, name: &str, len: usize) -> Result<Vec<usize>> {
    let parts: Option<Vec<usize>> = value
        .as_array()
        .filter(|a| a.len() == len)
        .and_then(|a| a.iter().map(|v| v.as_u64().map(|n| n as usize)).collect());
    parts.ok_or_else(|| {
        ForecastError::invalid_param(name, value, format!("expected {} non-negative integers", len))
    })
}

impl Algorithm for Sarima {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit(&mut self, train: &Series, validation: Option<&Series>, mode: FitMode) -> Result<()> {
        self.state = None;
        let data = training_data(train, validation, mode)?;
        debug!(order = ?self.order, trend = self.trend.code(), points = data.len(), ?mode, "Fitting Sarima");

        let state = self.estimate(&data)?;
        info!(
            aic = state.aic,
            bic = state.bic,
            sigma2 = state.sigma2,
            "Sarima fitted"
        );
        self.state = Some(state);
        Ok(())
    }

    fn predict(&self, steps: usize) -> Result<Vec<f64>> {
        let state = self.state.as_ref().ok_or(ForecastError::NotFitted)?;
        forecast_guarded(steps, |n| self.forecast(state, n))
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    fn params(&self) -> HyperParams {
        let o = self.order;
        let value = json!({
            "order": [o.p, o.d, o.q],
            "seasonal_order": [o.seasonal_p, o.seasonal_d, o.seasonal_q, o.period],
            "trend": self.trend.code(),
        });
        value.as_object().cloned().unwrap_or_default()
    }

    fn frequency(&self) -> Option<Frequency> {
        self.state.as_ref().and_then(|s| s.frequency)
    }

    fn fitted_values(&self) -> Option<Series> {
        self.state.as_ref().map(|s| s.fitted.clone())
    }

    fn extra_metrics(&self) -> Vec<(String, f64)> {
        match &self.state {
            Some(s) => vec![
                ("aic".to_string(), s.aic),
                ("bic".to_string(), s.bic),
                ("sigma2".to_string(), s.sigma2),
            ],
            None => Vec::new(),
        }
    }

    fn as_optimizable(&self) -> Option<&dyn Optimizable> {
        Some(self)
    }

    fn snapshot(&self) -> Result<Value> {
        let learned = match &self.state {
            Some(s) => json!({
                "trend": s.trend_coefs,
                "ar": s.ar_coefs.iter().map(|(l, c)| json!({"lag": l, "coef": c})).collect::<Vec<_>>(),
                "ma": s.ma_coefs.iter().map(|(l, c)| json!({"lag": l, "coef": c})).collect::<Vec<_>>(),
                "sigma2": s.sigma2,
                "aic": s.aic,
                "bic": s.bic,
                "n_obs": s.diffed.len() + s.differencer.total_lag(),
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

impl Optimizable for Sarima {
    fn with_params(&self, params: &HyperParams) -> Result<Box<dyn Algorithm>> {
        Ok(Box::new(Sarima::from_params(params)?))
    }

    fn default_search_space(&self) -> Value {
        json!({
            "p": {"type": "choice", "choices": [0, 1, 2]},
            "d": {"type": "choice", "choices": [0, 1, 2]},
            "q": {"type": "choice", "choices": [0, 1, 2]},
            "P": {"type": "choice", "choices": [0, 1, 2]},
            "D": {"type": "choice", "choices": [0, 1]},
            "Q": {"type": "choice", "choices": [0, 1, 2]},
            "s": {"type": "choice", "choices": [12, 24, 7]},
            "trend": {"type": "choice", "choices": ["n", "c", "t", "ct"]},
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ForecastMode;
    use crate::training::EvaluationMode;
    use chrono::NaiveDate;

    fn monthly(values: Vec<f64>) -> Series {
        let start = NaiveDate::from_ymd_opt(2010, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Series::from_values(start, Frequency::MonthStart, values).unwrap()
    }

    fn seasonal(n: usize) -> Series {
        monthly(
            (0..n)
                .map(|i| {
                    let jitter = ((i * 7919) % 13) as f64 / 13.0 - 0.5;
                    100.0 + 0.5 * i as f64 + 10.0 * (2.0 * PI * i as f64 / 12.0).sin() + 0.5 * jitter
                })
                .collect(),
        )
    }

    fn params(value: Value) -> HyperParams {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_params() {
        let model = Sarima::from_params(&params(json!({
            "order": [2, 1, 0],
            "seasonal_order": [0, 1, 1, 12],
            "q": 1,
            "trend": "n"
        })))
        .unwrap();
        assert_eq!(model.order().p, 2);
        assert_eq!(model.order().q, 1);
        assert_eq!(model.order().seasonal_q, 1);
        assert_eq!(model.trend(), Trend::None);

        assert!(Sarima::from_params(&params(json!({"trend": "quadratic"}))).is_err());
        assert!(Sarima::from_params(&params(json!({"order": [1, 1]}))).is_err());
    }

    #[test]
    fn test_fit_predict_seasonal() {
        let series = seasonal(120);
        let mut model = Sarima::default();
        let result = model.fit(&series.slice(0..96), None, FitMode::FinalFit);
        assert!(result.is_ok(), "fit failed: {:?}", result.err());

        let forecast = model.predict(24).unwrap();
        assert_eq!(forecast.len(), 24);
        let actual = &series.values()[96..];
        let mae: f64 = forecast.iter().zip(actual).map(|(p, a)| (p - a).abs()).sum::<f64>() / 24.0;
        assert!(mae < 2.0, "mae {}", mae);
    }

    #[test]
    fn test_fitted_values_and_extras() {
        let series = seasonal(96);
        let mut model = Sarima::default();
        model.fit(&series, None, FitMode::FinalFit).unwrap();

        let eval = model.evaluate(&series, EvaluationMode::InSample).unwrap();
        assert!(eval.metrics.get("aic").is_some());
        assert!(eval.metrics.get("sigma2").is_some());
        assert!(eval.metrics.rmse() < 1.5);
        assert!(eval.predictions.len() < series.len());
    }

    #[test]
    fn test_too_few_samples() {
        let mut model = Sarima::from_params(&params(json!({"order": [3, 0, 0], "seasonal_order": [2, 0, 0, 12]}))).unwrap();
        let result = model.fit(&monthly(vec![1.0; 14]), None, FitMode::FinalFit);
        assert!(matches!(result, Err(ForecastError::TrainingError(_))));
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_not_fitted() {
        let model = Sarima::default();
        assert!(matches!(model.predict(3), Err(ForecastError::NotFitted)));
        let eval = model.evaluate(&seasonal(24), EvaluationMode::OutOfSample(ForecastMode::Auto));
        assert!(matches!(eval, Err(ForecastError::NotFitted)));
    }

    #[test]
    fn test_deterministic_predict() {
        let mut model = Sarima::from_params(&params(json!({"order": [1, 1, 0], "seasonal_order": [0, 0, 0, 0]}))).unwrap();
        model.fit(&seasonal(60), None, FitMode::FinalFit).unwrap();
        assert_eq!(model.predict(10).unwrap(), model.predict(10).unwrap());
        assert_eq!(model.predict(0).unwrap().len(), 0);
    }

    #[test]
    fn test_exploration_ignores_validation() {
        let series = seasonal(120);
        let (train, val) = (series.slice(0..96), series.slice(96..108));
        let mut explore = Sarima::default();
        explore.fit(&train, Some(&val), FitMode::ExplorationFit).unwrap();
        let mut final_fit = Sarima::default();
        final_fit.fit(&train, Some(&val), FitMode::FinalFit).unwrap();

        let n_explore = explore.fitted_values().unwrap().last_timestamp();
        let n_final = final_fit.fitted_values().unwrap().last_timestamp();
        assert_eq!(n_explore, train.last_timestamp());
        assert_eq!(n_final, val.last_timestamp());
    }

    #[test]
    fn test_unit_circle_check() {
        assert!(roots_outside_unit_circle(&[]));
        assert!(roots_outside_unit_circle(&[0.5, 0.3]));
        assert!(!roots_outside_unit_circle(&[0.5, 0.6]));
        assert!(!roots_outside_unit_circle(&[1.2]));
        assert!(!roots_outside_unit_circle(&[f64::NAN]));

        // 1 - 1.5z has its root at 2/3
        assert!(!roots_outside_unit_circle(&lag_polynomial(&[(1, -1.5)], -1.0)));
        assert!(roots_outside_unit_circle(&lag_polynomial(&[(1, -0.5)], -1.0)));
    }

    #[test]
    fn test_non_invertible_seasonal_ma_is_shrunk() {
        // 1 + 0.5 z^12 + 1.5 z^24: the roots in z^12 multiply to 2/3
        let ma = vec![(12, 0.5), (24, 1.5)];
        assert!(!roots_outside_unit_circle(&lag_polynomial(&ma, -1.0)));

        let shrunk = constrain_roots(ma.clone(), -1.0, "moving average").unwrap();
        assert!(roots_outside_unit_circle(&lag_polynomial(&shrunk, -1.0)));
        for ((lag, before), (same_lag, after)) in ma.iter().zip(&shrunk) {
            assert_eq!(lag, same_lag);
            assert!(after.abs() < before.abs());
        }

        let stable = vec![(1, 0.4)];
        assert_eq!(constrain_roots(stable.clone(), 1.0, "autoregressive").unwrap(), stable);
        assert!(constrain_roots(vec![(1, f64::INFINITY)], 1.0, "autoregressive").is_err());
    }

    #[test]
    fn test_seasonal_ma_forecast_stays_bounded() {
        let series = seasonal(96);
        let (train, test) = (series.slice(0..72), series.slice(72..96));
        let mut model = Sarima::from_params(&params(json!({
            "p": 1, "d": 0, "q": 0, "P": 0, "D": 1, "Q": 2, "s": 12, "trend": "c"
        })))
        .unwrap();

        let forecast = model.fit(&train, None, FitMode::FinalFit).and_then(|_| model.predict(24));
        match forecast {
            Ok(forecast) => {
                let state = model.state.as_ref().unwrap();
                for (lag, theta) in &state.ma_coefs {
                    assert!(theta.is_finite(), "lag {}", lag);
                }
                assert!(roots_outside_unit_circle(&lag_polynomial(&state.ma_coefs, -1.0)));
                let rmse = (forecast
                    .iter()
                    .zip(test.values())
                    .map(|(p, a)| (p - a).powi(2))
                    .sum::<f64>()
                    / 24.0)
                    .sqrt();
                assert!(rmse < 3.0 * series.std(), "rmse {} vs std {}", rmse, series.std());
            }
            Err(e) => assert!(matches!(e, ForecastError::TrainingError(_)), "{:?}", e),
        }
    }

    #[test]
    fn test_diverging_forecast_rejected() {
        let mut model = Sarima::from_params(&params(json!({"order": [1, 1, 0], "seasonal_order": [0, 0, 0, 0]}))).unwrap();
        model.fit(&seasonal(60), None, FitMode::FinalFit).unwrap();
        let mut state = model.state.clone().unwrap();

        assert!(check_divergence(&state, &[state.value_max + 1.0]).is_ok());
        let far = state.value_max + 1e6;
        assert!(matches!(check_divergence(&state, &[far]), Err(ForecastError::TrainingError(_))));
        assert!(check_divergence(&state, &[f64::NAN]).is_err());

        // An explosive trend surfaces as an error instead of a finite forecast
        state.trend_coefs = vec![1e5; state.trend_coefs.len()];
        state.ar_coefs = vec![(1, 0.0)];
        let tampered = Sarima { state: Some(state), ..model };
        assert!(matches!(tampered.predict(12), Err(ForecastError::TrainingError(_))));
    }
}
