//! Training orchestrator
//!
//! Runs one training job end to end: preprocess, split, optionally tune,
//! fit the final model on train plus validation, evaluate, then hand the
//! results to the experiment tracker.

use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::algorithm::{Algorithm, Evaluation, EvaluationMode, FitMode, HyperParams};
use super::registry::ModelRegistry;
use crate::config::TrainingConfig;
use crate::error::Result;
use crate::evaluation::ForecastMode;
use crate::optimizer::{OptimizationConfig, StudySummary};
use crate::preprocessing::{Preprocessor, RawRecord, TimeSeriesPreprocessor};
use crate::timeseries::{split_series, Frequency, Series, SplitSeries};
use crate::tracking::{ExperimentTracker, RunStatus};

/// Everything a training run produced
#[derive(Debug)]
pub struct TrainingOutcome {
    /// Final model, fitted on train plus validation
    pub model: Box<dyn Algorithm>,
    /// Literal hyperparameters of the final model
    pub best_params: HyperParams,
    pub test_evaluation: Evaluation,
    /// Timestamps of the held-out test block
    pub test_timestamps: Vec<NaiveDateTime>,
    pub validation_evaluation: Option<Evaluation>,
    pub study_summary: Option<StudySummary>,
    /// Tracker run, when the tracker accepted one
    pub run_id: Option<String>,
    pub frequency: Option<Frequency>,
}

/// Sequences a training run over a registry and a tracker
pub struct Trainer<'r> {
    config: TrainingConfig,
    registry: &'r ModelRegistry,
    tracker: Box<dyn ExperimentTracker>,
    preprocessor: Box<dyn Preprocessor>,
    artifacts: Vec<PathBuf>,
}

impl<'r> Trainer<'r> {
    pub fn new(
        config: TrainingConfig,
        registry: &'r ModelRegistry,
        tracker: Box<dyn ExperimentTracker>,
    ) -> Result<Self> {
        let preprocessor = TimeSeriesPreprocessor::new(config.preprocessing()?);
        Ok(Self {
            config,
            registry,
            tracker,
            preprocessor: Box::new(preprocessor),
            artifacts: Vec::new(),
        })
    }

    /// Replace the default preprocessor
    pub fn with_preprocessor(mut self, preprocessor: Box<dyn Preprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// File to attach to the tracked run
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train from raw timestamp/value rows
    pub fn train_records(&mut self, raw: &[RawRecord]) -> Result<TrainingOutcome> {
        self.registry.get(self.config.model_type())?;

        let declared = self.config.get(&["preprocessing", "frequency"], Value::Null);
        let (series, frequency) = self.preprocessor.clean(raw, declared.as_str())?;
        info!(
            points = series.len(),
            frequency = ?frequency.map(|f| f.code()),
            "Preprocessed input data"
        );
        let split = split_series(&series, self.config.test_size(), self.config.validation_size())?;
        self.train_split(split, frequency)
    }

    /// Train from an already clean series
    pub fn train_series(&mut self, series: &Series) -> Result<TrainingOutcome> {
        self.registry.get(self.config.model_type())?;
        let split = split_series(series, self.config.test_size(), self.config.validation_size())?;
        self.train_split(split, series.effective_frequency())
    }

    /// Train from an externally prepared split
    pub fn train_split(&mut self, split: SplitSeries, frequency: Option<Frequency>) -> Result<TrainingOutcome> {
        let model_type = self.config.model_type().to_string();
        let SplitSeries { train, validation, test } = split;
        info!(
            model = %model_type,
            train = train.len(),
            validation = validation.as_ref().map_or(0, Series::len),
            test = test.len(),
            "Starting training run"
        );

        let fixed = self.config.model_params();
        let mut model = self.registry.create(&model_type, &fixed)?;
        let mut study_summary = None;

        if let Some((params, summary)) = self.tune(model.as_ref(), &train, validation.as_ref())? {
            model = self.registry.create(&model_type, &params)?;
            study_summary = Some(summary);
        }

        model.fit(&train, validation.as_ref(), FitMode::FinalFit)?;
        let best_params = model.params();
        info!(model = %model_type, "Final model fitted");

        let out_of_sample = EvaluationMode::OutOfSample(ForecastMode::Auto);
        let test_evaluation = model.evaluate(&test, out_of_sample)?;
        let validation_evaluation = match &validation {
            Some(val) => Some(model.evaluate(val, out_of_sample)?),
            None => None,
        };
        info!(
            rmse = test_evaluation.metrics.rmse(),
            mae = test_evaluation.metrics.mae(),
            mape = test_evaluation.metrics.mape(),
            "Test evaluation"
        );

        let mut outcome = TrainingOutcome {
            model,
            best_params,
            test_evaluation,
            test_timestamps: test.timestamps().to_vec(),
            validation_evaluation,
            study_summary,
            run_id: None,
            frequency: frequency.or_else(|| train.effective_frequency()),
        };
        outcome.run_id = self.track(&outcome);
        Ok(outcome)
    }

    /// Run the search when it is enabled, a validation split exists and the
    /// family supports it; a failed search falls back to fixed parameters
    fn tune(
        &self,
        model: &dyn Algorithm,
        train: &Series,
        validation: Option<&Series>,
    ) -> Result<Option<(HyperParams, StudySummary)>> {
        if !self.config.search_enabled() {
            debug!("Hyperparameter search disabled");
            return Ok(None);
        }
        let Some(validation) = validation else {
            warn!("No validation split, skipping hyperparameter search");
            return Ok(None);
        };
        let Some(optimizable) = model.as_optimizable() else {
            info!(model = model.name(), "Model does not support hyperparameter search");
            return Ok(None);
        };

        let opt_config = OptimizationConfig::from_training_config(&self.config)?;
        match optimizable.optimize_hyperparams(train, validation, &self.config.search_space(), &opt_config) {
            Ok(Some(result)) => {
                info!(best_score = result.best_score, "Hyperparameter search selected parameters");
                Ok(Some((result.best_params, result.study.summary())))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "Hyperparameter search failed, using fixed parameters");
                Ok(None)
            }
        }
    }

    /// Log the run; failures are reported and never fail training
    fn track(&mut self, outcome: &TrainingOutcome) -> Option<String> {
        let experiment = self.config.experiment_name().to_string();
        let run_name = self.config.run_name().map(str::to_string);
        let run_id = match self.tracker.start_run(&experiment, run_name.as_deref()) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Could not start tracking run");
                return None;
            }
        };

        let mut params: BTreeMap<String, String> = outcome
            .best_params
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect();
        params.insert("model_type".to_string(), self.config.model_type().to_string());
        params.insert("model_name".to_string(), self.config.model_name().to_string());
        params.insert(
            "frequency".to_string(),
            outcome.frequency.map_or_else(|| "unknown".to_string(), |f| f.code()),
        );
        report(self.tracker.log_params(&params), "params");

        report(
            self.tracker.log_metrics(&outcome.test_evaluation.metrics.clone().into_map(), "test_"),
            "test metrics",
        );
        if let Some(val) = &outcome.validation_evaluation {
            report(self.tracker.log_metrics(&val.metrics.clone().into_map(), "val_"), "validation metrics");
        }
        if let Some(summary) = &outcome.study_summary {
            report(
                self.tracker.log_metrics(&summary.to_metrics(), "hyperopt_summary/"),
                "search summary",
            );
        }

        match outcome.model.snapshot() {
            Ok(snapshot) => {
                let requirements = vec![format!("{}=={}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))];
                report(
                    self.tracker.log_model(self.config.model_name(), &snapshot, &requirements),
                    "model",
                );
            }
            Err(e) => warn!(error = %e, "Could not snapshot model for tracking"),
        }
        for path in &self.artifacts {
            report(self.tracker.log_artifact(path), "artifact");
        }
        report(self.tracker.end_run(RunStatus::Finished), "run end");

        info!(run_id = %run_id, experiment = %experiment, "Training run tracked");
        Some(run_id)
    }
}

fn report(result: Result<()>, what: &str) {
    if let Err(e) = result {
        warn!(error = %e, "Tracking {} failed", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;
    use crate::training::register_builtin_models;
    use crate::tracking::{LocalTracker, NoopTracker};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::path::Path;

    fn monthly(n: usize) -> Series {
        let start = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let values = (0..n)
            .map(|i| {
                let jitter = ((i * 7919) % 13) as f64 / 13.0 - 0.5;
                100.0 + 0.5 * i as f64 + 8.0 * (2.0 * std::f64::consts::PI * i as f64 / 12.0).sin() + jitter
            })
            .collect();
        Series::from_values(start, Frequency::MonthStart, values).unwrap()
    }

    fn config(model: &str, search: bool, dir: &Path) -> TrainingConfig {
        TrainingConfig::from_value(json!({
            "model": {"type": model, "name": "demo"},
            "hyperparams": {
                "use_feature_engineering": false,
                "random_state": 42,
                "max_evals": 4,
                "metric": "rmse",
                "search": {"enabled": search},
                "search_space": {"n_changepoints": [10, 20]},
            },
            "preprocessing": {"handle_missing": "interpolate", "max_missing_ratio": 0.3, "interpolation_limit": 3},
            "tracking": {"experiment_name": "demo", "output_dir": dir.to_string_lossy()}
        }))
        .unwrap()
    }

    /// Tracker whose every call fails
    struct BrokenTracker;

    impl ExperimentTracker for BrokenTracker {
        fn start_run(&mut self, _: &str, _: Option<&str>) -> Result<String> {
            Ok("broken".to_string())
        }
        fn log_params(&mut self, _: &BTreeMap<String, String>) -> Result<()> {
            Err(ForecastError::TrackingError("down".to_string()))
        }
        fn log_metrics(&mut self, _: &BTreeMap<String, f64>, _: &str) -> Result<()> {
            Err(ForecastError::TrackingError("down".to_string()))
        }
        fn log_model(&mut self, _: &str, _: &Value, _: &[String]) -> Result<()> {
            Err(ForecastError::TrackingError("down".to_string()))
        }
        fn log_artifact(&mut self, _: &Path) -> Result<()> {
            Err(ForecastError::TrackingError("down".to_string()))
        }
        fn end_run(&mut self, _: RunStatus) -> Result<()> {
            Err(ForecastError::TrackingError("down".to_string()))
        }
    }

    #[test]
    fn test_unknown_model_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new();
        let mut trainer = Trainer::new(config("Additive", false, dir.path()), &registry, Box::new(NoopTracker::new())).unwrap();
        let err = trainer.train_series(&monthly(60)).unwrap_err();
        assert!(matches!(err, ForecastError::UnknownModel { .. }));
    }

    #[test]
    fn test_additive_with_search_is_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::with_builtins();
        let tracker = LocalTracker::new(dir.path());
        let mut trainer = Trainer::new(config("Additive", true, dir.path()), &registry, Box::new(tracker)).unwrap();

        let outcome = trainer.train_series(&monthly(120)).unwrap();
        assert_eq!(outcome.test_evaluation.predictions.len(), 24);
        assert!(outcome.validation_evaluation.is_some());
        assert_eq!(outcome.frequency, Some(Frequency::MonthStart));

        let summary = outcome.study_summary.unwrap();
        assert!(summary.n_trials >= 1 && summary.n_trials <= 4);
        let n = outcome.best_params["n_changepoints"].as_u64().unwrap();
        assert!(n == 10 || n == 20);

        let run_id = outcome.run_id.unwrap();
        let run = LocalTracker::new(dir.path()).load_run("demo", &run_id).unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert_eq!(run.params["model_type"], "Additive");
        assert_eq!(run.params["frequency"], "MS");
        assert!(run.metrics.contains_key("test_rmse"));
        assert!(run.metrics.contains_key("val_mape"));
        assert!(run.metrics.contains_key("hyperopt_summary/n_trials"));
        assert_eq!(run.model.as_deref(), Some("demo"));
    }

    #[test]
    fn test_tracker_failures_do_not_fail_training() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new();
        register_builtin_models(&registry);
        let mut trainer = Trainer::new(config("Sarima", false, dir.path()), &registry, Box::new(BrokenTracker))
            .unwrap()
            .with_artifact(dir.path().join("missing.csv"));

        let outcome = trainer.train_series(&monthly(120)).unwrap();
        assert_eq!(outcome.run_id.as_deref(), Some("broken"));
        assert!(outcome.study_summary.is_none());
        assert!(outcome.test_evaluation.metrics.get("aic").is_some());
    }

    #[test]
    fn test_raw_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::with_builtins();
        let series = monthly(72);
        let mut raw: Vec<RawRecord> = series
            .iter()
            .map(|obs| RawRecord::new(obs.timestamp.format("%Y-%m-%d").to_string(), Some(obs.value)))
            .collect();
        raw[10].value = None;
        raw.reverse();

        let mut trainer = Trainer::new(config("GradientBoosting", false, dir.path()), &registry, Box::new(NoopTracker::new())).unwrap();
        let outcome = trainer.train_records(&raw).unwrap();
        assert_eq!(outcome.frequency, Some(Frequency::MonthStart));
        assert_eq!(outcome.test_evaluation.predictions.len(), 14);
        assert!(outcome.model.is_fitted());
    }
}
