//! Ensemble-regression forecasters
//!
//! Frames forecasting as tabular regression: [`FeatureEngineer`] turns the
//! history into (X, y) rows, a tree ensemble learns the mapping, and forecasts
//! are produced recursively by feeding each prediction back as history.

use chrono::NaiveDateTime;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use super::algorithm::{
    future_timestamps, param_bool, param_f64, param_usize, resolve_frequency, training_data,
    Algorithm, FitMode, HyperParams, Optimizable,
};
use super::gradient_boosting::{GradientBoosting, GradientBoostingConfig};
use super::random_forest::{MaxFeatures, RandomForest};
use crate::error::{ForecastError, Result};
use crate::evaluation::forecast_guarded;
use crate::timeseries::{FeatureEngineer, FeatureEngineerConfig, Frequency, Series};

/// Tabular learner behind a regression forecaster
pub trait Regressor: Send + Sync + fmt::Debug {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Normalized importances, one per column
    fn feature_importances(&self) -> Option<Array1<f64>> {
        None
    }
}

impl Regressor for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        RandomForest::fit(self, x, y).map(|_| ())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        RandomForest::predict(self, x)
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        RandomForest::feature_importances(self).cloned()
    }
}

impl Regressor for GradientBoosting {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        GradientBoosting::fit(self, x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        GradientBoosting::predict(self, x)
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        GradientBoosting::feature_importances(self).cloned()
    }
}

/// Which ensemble backs the forecaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegressorKind {
    RandomForest,
    GradientBoosting,
}

impl RegressorKind {
    /// Registry key
    pub fn name(&self) -> &'static str {
        match self {
            RegressorKind::RandomForest => "RandomForest",
            RegressorKind::GradientBoosting => "GradientBoosting",
        }
    }
}

/// Hyperparameters shared by both ensembles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionParams {
    pub n_estimators: usize,
    /// `None` grows trees until the leaf constraints stop them
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Forest only
    pub max_features: MaxFeatures,
    /// Boosting only
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    /// Window length when feature engineering is off
    pub lag_features: usize,
    pub random_state: u64,
    pub use_feature_engineering: bool,
    pub feature_engineering: Option<FeatureEngineerConfig>,
}

impl RegressionParams {
    fn defaults(kind: RegressorKind) -> Self {
        Self {
            n_estimators: 100,
            max_depth: match kind {
                RegressorKind::RandomForest => None,
                RegressorKind::GradientBoosting => Some(3),
            },
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            learning_rate: 0.1,
            subsample: 1.0,
            colsample_bytree: 1.0,
            lag_features: 12,
            random_state: 42,
            use_feature_engineering: false,
            feature_engineering: None,
        }
    }

    pub fn from_params(kind: RegressorKind, params: &HyperParams) -> Result<Self> {
        let d = Self::defaults(kind);

        let max_depth = match params.get("max_depth") {
            None => d.max_depth,
            Some(Value::Null) => None,
            Some(_) => Some(param_usize(params, "max_depth", 0)?).filter(|&depth| depth > 0),
        };
        let max_features = match params.get("max_features") {
            None => d.max_features,
            Some(v) => MaxFeatures::from_value(v).ok_or_else(|| {
                ForecastError::invalid_param("max_features", v, "expected sqrt, log2, all or a fraction in (0, 1]")
            })?,
        };
        let feature_engineering = match params.get("feature_engineering") {
            None | Some(Value::Null) => None,
            Some(v) => Some(serde_json::from_value::<FeatureEngineerConfig>(v.clone()).map_err(|e| {
                ForecastError::invalid_param("feature_engineering", "<object>", e.to_string())
            })?),
        };
        let random_state = param_usize(params, "random_state", d.random_state as usize)? as u64;

        let resolved = Self {
            n_estimators: param_usize(params, "n_estimators", d.n_estimators)?,
            max_depth,
            min_samples_split: param_usize(params, "min_samples_split", d.min_samples_split)?,
            min_samples_leaf: param_usize(params, "min_samples_leaf", d.min_samples_leaf)?,
            max_features,
            learning_rate: param_f64(params, "learning_rate", d.learning_rate)?,
            subsample: param_f64(params, "subsample", d.subsample)?,
            colsample_bytree: param_f64(params, "colsample_bytree", d.colsample_bytree)?,
            lag_features: param_usize(params, "lag_features", d.lag_features)?,
            random_state,
            use_feature_engineering: param_bool(params, "use_feature_engineering", d.use_feature_engineering)?,
            feature_engineering,
        };
        resolved.validate()?;
        Ok(resolved)
    }

    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(ForecastError::invalid_param("n_estimators", 0, "must be positive"));
        }
        if self.lag_features == 0 {
            return Err(ForecastError::invalid_param("lag_features", 0, "must be positive"));
        }
        Ok(())
    }

    fn engineer(&self) -> FeatureEngineer {
        let config = if self.use_feature_engineering {
            self.feature_engineering.clone().unwrap_or_default()
        } else {
            FeatureEngineerConfig::lag_window(self.lag_features)
        };
        FeatureEngineer::new(config)
    }

    fn learner(&self, kind: RegressorKind) -> Box<dyn Regressor> {
        match kind {
            RegressorKind::RandomForest => Box::new(
                RandomForest::new(self.n_estimators)
                    .with_max_depth(self.max_depth)
                    .with_min_samples_split(self.min_samples_split)
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_max_features(self.max_features)
                    .with_random_state(self.random_state),
            ),
            RegressorKind::GradientBoosting => Box::new(GradientBoosting::new(GradientBoostingConfig {
                n_estimators: self.n_estimators,
                learning_rate: self.learning_rate,
                max_depth: self.max_depth.unwrap_or(usize::MAX),
                min_samples_split: self.min_samples_split,
                min_samples_leaf: self.min_samples_leaf,
                subsample: self.subsample,
                colsample_bytree: self.colsample_bytree,
                random_state: self.random_state,
            })),
        }
    }

    fn to_params(&self, kind: RegressorKind) -> HyperParams {
        let mut value = json!({
            "n_estimators": self.n_estimators,
            "max_depth": self.max_depth,
            "min_samples_split": self.min_samples_split,
            "min_samples_leaf": self.min_samples_leaf,
            "lag_features": self.lag_features,
            "random_state": self.random_state,
            "use_feature_engineering": self.use_feature_engineering,
        });
        if let Some(obj) = value.as_object_mut() {
            match kind {
                RegressorKind::RandomForest => {
                    obj.insert("max_features".to_string(), self.max_features.to_value());
                }
                RegressorKind::GradientBoosting => {
                    obj.insert("learning_rate".to_string(), json!(self.learning_rate));
                    obj.insert("subsample".to_string(), json!(self.subsample));
                    obj.insert("colsample_bytree".to_string(), json!(self.colsample_bytree));
                }
            }
            if let Some(fe) = &self.feature_engineering {
                obj.insert(
                    "feature_engineering".to_string(),
                    serde_json::to_value(fe).unwrap_or(Value::Null),
                );
            }
        }
        value.as_object().cloned().unwrap_or_default()
    }
}

#[derive(Debug)]
struct RegressionState {
    learner: Box<dyn Regressor>,
    engineer: FeatureEngineer,
    /// Trailing values the next feature row is built from
    history: Vec<f64>,
    last: NaiveDateTime,
    frequency: Frequency,
    fitted: Series,
    importances: BTreeMap<String, f64>,
    n_rows: usize,
}

/// Recursive multi-step forecaster over a tree ensemble
#[derive(Debug)]
pub struct RegressionForecaster {
    kind: RegressorKind,
    params: RegressionParams,
    state: Option<RegressionState>,
}

impl RegressionForecaster {
    pub fn new(kind: RegressorKind, params: RegressionParams) -> Self {
        Self {
            kind,
            params,
            state: None,
        }
    }

    pub fn from_params(kind: RegressorKind, params: &HyperParams) -> Result<Self> {
        Ok(Self::new(kind, RegressionParams::from_params(kind, params)?))
    }

    pub fn kind(&self) -> RegressorKind {
        self.kind
    }

    pub fn settings(&self) -> &RegressionParams {
        &self.params
    }

    /// Importances of the last fit, keyed by feature name
    pub fn feature_importances(&self) -> Option<&BTreeMap<String, f64>> {
        self.state.as_ref().map(|s| &s.importances)
    }

    fn estimate(&self, data: &Series) -> Result<RegressionState> {
        let engineer = self.params.engineer();
        let min_history = engineer.min_history();
        if data.len() < min_history + 2 {
            return Err(ForecastError::TrainingError(format!(
                "{} needs at least {} observations for a lookback of {}, got {}",
                self.kind.name(),
                min_history + 2,
                min_history,
                data.len()
            )));
        }
        let frequency = resolve_frequency(data)?;

        let (x, y) = engineer
            .fit_transform(data)
            .map_err(|e| ForecastError::TrainingError(e.to_string()))?;

        let mut learner = self.params.learner(self.kind);
        learner.fit(&x, &y)?;

        let in_sample = learner.predict(&x)?;
        let fitted = Series::new(data.timestamps()[min_history..].to_vec(), in_sample.to_vec())?
            .with_frequency(data.frequency());

        let importances = learner
            .feature_importances()
            .map(|imp| engineer.importance_map(imp.as_slice().unwrap_or(&[])))
            .unwrap_or_default();

        let values = data.values();
        let last = data
            .last_timestamp()
            .ok_or_else(|| ForecastError::DataError("training series is empty".to_string()))?;

        Ok(RegressionState {
            learner,
            history: values[values.len() - min_history..].to_vec(),
            engineer,
            last,
            frequency,
            fitted,
            importances,
            n_rows: x.nrows(),
        })
    }

    fn forecast(&self, state: &RegressionState, steps: usize) -> Result<Vec<f64>> {
        let stamps = future_timestamps(state.frequency, state.last, steps)?;
        let mut history = state.history.clone();
        let mut predictions = Vec::with_capacity(steps);
        let n_features = state.engineer.n_features();

        for ts in stamps {
            let row = state.engineer.row(&history, ts)?;
            let x = Array2::from_shape_vec((1, n_features), row)?;
            let value = state.learner.predict(&x)?[0];
            history.push(value);
            predictions.push(value);
        }
        Ok(predictions)
    }
}

impl Algorithm for RegressionForecaster {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn fit(&mut self, train: &Series, validation: Option<&Series>, mode: FitMode) -> Result<()> {
        self.state = None;
        let data = training_data(train, validation, mode)?;
        debug!(model = self.kind.name(), points = data.len(), ?mode, "Fitting regression forecaster");

        let state = self.estimate(&data)?;
        info!(
            model = self.kind.name(),
            rows = state.n_rows,
            features = state.engineer.n_features(),
            "Regression forecaster fitted"
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
        self.params.to_params(self.kind)
    }

    fn frequency(&self) -> Option<Frequency> {
        self.state.as_ref().map(|s| s.frequency)
    }

    fn fitted_values(&self) -> Option<Series> {
        self.state.as_ref().map(|s| s.fitted.clone())
    }

    fn as_optimizable(&self) -> Option<&dyn Optimizable> {
        Some(self)
    }

    fn snapshot(&self) -> Result<Value> {
        let learned = match &self.state {
            Some(s) => json!({
                "feature_names": s.engineer.feature_names(),
                "feature_importances": s.importances,
                "training_rows": s.n_rows,
                "last_timestamp": s.last,
            }),
            None => Value::Null,
        };
        Ok(json!({
            "family": self.kind.name(),
            "params": self.params(),
            "fitted": self.is_fitted(),
            "frequency": self.frequency().map(|f| f.code()),
            "state": learned,
        }))
    }
}

impl Optimizable for RegressionForecaster {
    fn with_params(&self, params: &HyperParams) -> Result<Box<dyn Algorithm>> {
        Ok(Box::new(RegressionForecaster::from_params(self.kind, params)?))
    }

    fn default_search_space(&self) -> Value {
        match self.kind {
            RegressorKind::RandomForest => json!({
                "n_estimators": [50, 100, 200, 300],
                "max_depth": {"type": "choice", "choices": [3, 5, 10, 15, "none"]},
                "min_samples_split": [2, 5, 10],
                "min_samples_leaf": [1, 2, 4],
                "max_features": ["sqrt", "log2"],
                "lag_features": [6, 12, 18, 24],
            }),
            RegressorKind::GradientBoosting => json!({
                "n_estimators": [50, 100, 200, 300],
                "max_depth": [3, 5, 7],
                "learning_rate": {"type": "loguniform", "min": 0.01, "max": 0.3},
                "subsample": {"type": "uniform", "min": 0.6, "max": 1.0},
                "min_samples_leaf": [1, 2, 4],
                "lag_features": [6, 12, 18, 24],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::EvaluationMode;
    use chrono::NaiveDate;
    use std::f64::consts::PI;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2015, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn seasonal(n: usize) -> Series {
        let values = (0..n)
            .map(|i| 50.0 + 10.0 * (2.0 * PI * i as f64 / 12.0).sin())
            .collect();
        Series::from_values(start(), Frequency::MonthStart, values).unwrap()
    }

    fn params(value: Value) -> HyperParams {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_forest_lag_window() {
        let series = seasonal(96);
        let mut model = RegressionForecaster::from_params(
            RegressorKind::RandomForest,
            &params(json!({"n_estimators": 30, "max_features": "all"})),
        )
        .unwrap();
        model.fit(&series.slice(0..84), None, FitMode::FinalFit).unwrap();

        let forecast = model.predict(12).unwrap();
        assert_eq!(forecast.len(), 12);
        let actual = &series.values()[84..];
        let mae: f64 = forecast.iter().zip(actual).map(|(p, a)| (p - a).abs()).sum::<f64>() / 12.0;
        assert!(mae < 3.0, "mae {}", mae);
    }

    #[test]
    fn test_boosting_deterministic() {
        let series = seasonal(72);
        let p = params(json!({"n_estimators": 40, "subsample": 0.8, "random_state": 3}));
        let mut a = RegressionForecaster::from_params(RegressorKind::GradientBoosting, &p).unwrap();
        let mut b = RegressionForecaster::from_params(RegressorKind::GradientBoosting, &p).unwrap();
        a.fit(&series, None, FitMode::FinalFit).unwrap();
        b.fit(&series, None, FitMode::FinalFit).unwrap();

        assert_eq!(a.predict(6).unwrap(), b.predict(6).unwrap());
        assert_eq!(a.predict(6).unwrap(), a.predict(6).unwrap());
    }

    #[test]
    fn test_in_sample_uses_fitted_rows() {
        let series = seasonal(60);
        let mut model = RegressionForecaster::from_params(
            RegressorKind::GradientBoosting,
            &params(json!({"n_estimators": 20, "lag_features": 6})),
        )
        .unwrap();
        model.fit(&series, None, FitMode::FinalFit).unwrap();

        let eval = model.evaluate(&series, EvaluationMode::InSample).unwrap();
        assert_eq!(eval.predictions.len(), 54);
    }

    #[test]
    fn test_feature_engineering_path() {
        let values = (0..120).map(|i| 10.0 + (i % 7) as f64).collect();
        let series = Series::from_values(start(), Frequency::Daily, values).unwrap();
        let mut model = RegressionForecaster::from_params(
            RegressorKind::RandomForest,
            &params(json!({"n_estimators": 10, "use_feature_engineering": true})),
        )
        .unwrap();
        model.fit(&series, None, FitMode::FinalFit).unwrap();

        let importances = model.feature_importances().unwrap();
        assert_eq!(importances.len(), FeatureEngineer::new(FeatureEngineerConfig::default()).n_features());
        let total: f64 = importances.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(model.predict(10).unwrap().len(), 10);
    }

    #[test]
    fn test_too_short_and_bad_params() {
        let mut model = RegressionForecaster::from_params(RegressorKind::RandomForest, &HyperParams::new()).unwrap();
        let result = model.fit(&seasonal(13), None, FitMode::FinalFit);
        assert!(matches!(result, Err(ForecastError::TrainingError(_))));

        assert!(RegressionForecaster::from_params(
            RegressorKind::RandomForest,
            &params(json!({"max_features": "most"}))
        )
        .is_err());
        assert!(RegressionForecaster::from_params(
            RegressorKind::GradientBoosting,
            &params(json!({"lag_features": 0}))
        )
        .is_err());
    }

    #[test]
    fn test_null_max_depth() {
        let model = RegressionForecaster::from_params(
            RegressorKind::GradientBoosting,
            &params(json!({"max_depth": null})),
        )
        .unwrap();
        assert_eq!(model.settings().max_depth, None);
        assert_eq!(model.params()["max_depth"], Value::Null);
    }
}
