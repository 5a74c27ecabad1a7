//! HyperOptX - sequential hyperparameter optimizer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::OptimizationConfig;
use super::samplers::{create_sampler, Sampler};
use super::search_space::{SearchSpace, TrialParams};
use crate::error::Result;
use crate::training::HyperParams;

/// Outcome class of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Ok,
    /// Validation score above the cap; the optimizer saw the penalty
    Capped,
    /// The trial raised; the optimizer saw `+inf`
    Failed,
}

/// What an objective reports for one parameter set
#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    pub train_score: Option<f64>,
    pub validation_score: Option<f64>,
    /// Loss fed to the optimizer
    pub value: f64,
    pub status: TrialStatus,
    pub error: Option<String>,
}

impl TrialOutcome {
    pub fn ok(train_score: f64, validation_score: f64) -> Self {
        Self {
            train_score: Some(train_score),
            validation_score: Some(validation_score),
            value: validation_score,
            status: TrialStatus::Ok,
            error: None,
        }
    }

    pub fn capped(train_score: f64, validation_score: f64, penalty: f64) -> Self {
        Self {
            value: penalty,
            status: TrialStatus::Capped,
            ..Self::ok(train_score, validation_score)
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            train_score: None,
            validation_score: None,
            value: f64::INFINITY,
            status: TrialStatus::Failed,
            error: Some(error.to_string()),
        }
    }
}

/// Result of a single trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: usize,
    /// Literal parameter values
    pub params: HyperParams,
    pub train_score: Option<f64>,
    pub validation_score: Option<f64>,
    #[serde(with = "loss")]
    pub value: f64,
    pub status: TrialStatus,
    pub duration_secs: f64,
    pub error: Option<String>,
}

/// Why a study stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Ran `max_evals` trials
    Completed,
    EarlyStopped,
    Timeout,
}

/// Study containing all trials, in evaluation order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub trials: Vec<TrialResult>,
    pub best_trial_idx: Option<usize>,
    pub total_duration_secs: f64,
    pub stop_reason: StopReason,
}

impl Default for Study {
    fn default() -> Self {
        Self::new()
    }
}

impl Study {
    pub fn new() -> Self {
        Self {
            trials: Vec::new(),
            best_trial_idx: None,
            total_duration_secs: 0.0,
            stop_reason: StopReason::Completed,
        }
    }

    /// Best `ok` trial; capped and failed trials never qualify
    pub fn best_trial(&self) -> Option<&TrialResult> {
        self.best_trial_idx.and_then(|idx| self.trials.get(idx))
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_trial().map(|t| t.value)
    }

    pub fn best_params(&self) -> Option<&HyperParams> {
        self.best_trial().map(|t| &t.params)
    }

    /// Append a trial; returns true when it became the best
    pub fn add_trial(&mut self, result: TrialResult) -> bool {
        let idx = self.trials.len();
        let is_better = result.status == TrialStatus::Ok
            && result.value.is_finite()
            && self.best_value().map_or(true, |best| result.value < best);
        if is_better {
            self.best_trial_idx = Some(idx);
        }
        self.trials.push(result);
        is_better
    }

    /// Best `ok` loss after each trial; `+inf` until the first `ok` trial
    pub fn best_value_history(&self) -> Vec<f64> {
        let mut best = f64::INFINITY;
        self.trials
            .iter()
            .map(|t| {
                if t.status == TrialStatus::Ok && t.value < best {
                    best = t.value;
                }
                best
            })
            .collect()
    }

    pub fn summary(&self) -> StudySummary {
        let count = |status| self.trials.iter().filter(|t| t.status == status).count();
        let (n_ok, n_capped, n_failed) = (count(TrialStatus::Ok), count(TrialStatus::Capped), count(TrialStatus::Failed));
        let n_trials = self.trials.len();

        let mut losses: Vec<f64> = self
            .trials
            .iter()
            .filter(|t| t.status == TrialStatus::Ok)
            .map(|t| t.value)
            .collect();
        let first_ok = losses.first().copied();
        let (mean, median, std) = if losses.is_empty() {
            (None, None, None)
        } else {
            let n = losses.len() as f64;
            let mean = losses.iter().sum::<f64>() / n;
            let std = (losses.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n).sqrt();
            losses.sort_by(f64::total_cmp);
            let mid = losses.len() / 2;
            let median = if losses.len() % 2 == 0 {
                (losses[mid - 1] + losses[mid]) / 2.0
            } else {
                losses[mid]
            };
            (Some(mean), Some(median), Some(std))
        };

        let best_value = self.best_value();
        let improvement_pct = match (first_ok, best_value) {
            (Some(first), Some(best)) if first > 0.0 => Some((first - best) / first * 100.0),
            _ => None,
        };

        StudySummary {
            n_trials,
            n_ok,
            n_capped,
            n_failed,
            success_rate: if n_trials == 0 {
                0.0
            } else {
                (n_trials - n_failed) as f64 / n_trials as f64
            },
            best_trial: self.best_trial().map(|t| t.trial_id),
            best_value,
            mean_loss: mean,
            median_loss: median,
            std_loss: std,
            improvement_pct,
            total_duration_secs: self.total_duration_secs,
            stop_reason: self.stop_reason,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load a saved study; the best trial is recomputed from the trials
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut study: Study = serde_json::from_str(&json)?;
        study.best_trial_idx = None;
        for (idx, trial) in study.trials.iter().enumerate() {
            let is_better = trial.status == TrialStatus::Ok
                && trial.value.is_finite()
                && study
                    .best_trial_idx
                    .map_or(true, |best| trial.value < study.trials[best].value);
            if is_better {
                study.best_trial_idx = Some(idx);
            }
        }
        Ok(study)
    }
}

/// Aggregate statistics of a study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySummary {
    pub n_trials: usize,
    pub n_ok: usize,
    pub n_capped: usize,
    pub n_failed: usize,
    /// Share of trials that did not fail
    pub success_rate: f64,
    pub best_trial: Option<usize>,
    pub best_value: Option<f64>,
    pub mean_loss: Option<f64>,
    pub median_loss: Option<f64>,
    pub std_loss: Option<f64>,
    /// First `ok` loss versus the best one
    pub improvement_pct: Option<f64>,
    pub total_duration_secs: f64,
    pub stop_reason: StopReason,
}

impl StudySummary {
    /// Numeric fields as a flat metric map
    pub fn to_metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::from([
            ("n_trials".to_string(), self.n_trials as f64),
            ("n_ok".to_string(), self.n_ok as f64),
            ("n_capped".to_string(), self.n_capped as f64),
            ("n_failed".to_string(), self.n_failed as f64),
            ("success_rate".to_string(), self.success_rate),
            ("total_duration_secs".to_string(), self.total_duration_secs),
        ]);
        let optional = [
            ("best_value", self.best_value),
            ("mean_loss", self.mean_loss),
            ("median_loss", self.median_loss),
            ("std_loss", self.std_loss),
            ("improvement_pct", self.improvement_pct),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                metrics.insert(name.to_string(), v);
            }
        }
        metrics
    }
}

/// Main hyperparameter optimizer
pub struct HyperOptX {
    config: OptimizationConfig,
    search_space: SearchSpace,
    sampler: Box<dyn Sampler>,
    study: Study,
}

impl HyperOptX {
    pub fn new(config: OptimizationConfig, search_space: SearchSpace) -> Self {
        let sampler = create_sampler(config.sampler, config.seed, config.n_startup_trials);
        Self {
            config,
            search_space,
            sampler,
            study: Study::new(),
        }
    }

    /// Run trials sequentially.
    ///
    /// The objective receives literal parameter values. Failed trials are
    /// kept out of the sampler history; capped trials enter it at their
    /// penalty.
    pub fn optimize<F>(&mut self, mut objective: F) -> &Study
    where
        F: FnMut(&HyperParams) -> TrialOutcome,
    {
        let start = Instant::now();
        let es = self.config.early_stopping.clone();
        let mut history: Vec<(TrialParams, f64)> = Vec::new();
        let mut without_improvement = 0usize;
        self.study = Study::new();

        for trial_id in 0..self.config.max_evals {
            if let Some(limit) = self.config.timeout_secs {
                if start.elapsed().as_secs_f64() > limit {
                    warn!(trials = trial_id, timeout_secs = limit, "Search timed out");
                    self.study.stop_reason = StopReason::Timeout;
                    break;
                }
            }

            let trial_start = Instant::now();
            let sampled = self.sampler.sample(&self.search_space, &history);
            let params = self.search_space.resolve(&sampled);
            let outcome = objective(&params);

            match outcome.status {
                TrialStatus::Ok => debug!(trial = trial_id, loss = outcome.value, "Trial finished"),
                TrialStatus::Capped => debug!(
                    trial = trial_id,
                    score = ?outcome.validation_score,
                    penalty = outcome.value,
                    "Trial capped"
                ),
                TrialStatus::Failed => warn!(
                    trial = trial_id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Trial failed"
                ),
            }
            if outcome.value.is_finite() {
                history.push((sampled, outcome.value));
            }

            let previous_best = self.study.best_value();
            let improved = outcome.status == TrialStatus::Ok
                && match previous_best {
                    None => true,
                    Some(best) => outcome.value < best - best.abs() * es.min_improvement_pct / 100.0,
                };
            without_improvement = if improved { 0 } else { without_improvement + 1 };

            self.study.add_trial(TrialResult {
                trial_id,
                params,
                train_score: outcome.train_score,
                validation_score: outcome.validation_score,
                value: outcome.value,
                status: outcome.status,
                duration_secs: trial_start.elapsed().as_secs_f64(),
                error: outcome.error,
            });

            let done = trial_id + 1;
            if es.enabled && done >= es.min_evals && without_improvement >= es.patience && done < self.config.max_evals {
                info!(trials = done, patience = es.patience, "Early stopping, no recent improvement");
                self.study.stop_reason = StopReason::EarlyStopped;
                break;
            }
        }

        self.study.total_duration_secs = start.elapsed().as_secs_f64();
        let summary = self.study.summary();
        info!(
            trials = summary.n_trials,
            ok = summary.n_ok,
            capped = summary.n_capped,
            failed = summary.n_failed,
            best = ?summary.best_value,
            stop = ?summary.stop_reason,
            "Hyperparameter search finished"
        );
        &self.study
    }

    pub fn study(&self) -> &Study {
        &self.study
    }

    pub fn into_study(self) -> Study {
        self.study
    }
}

/// Non-finite losses are stored as null
mod loss {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EarlyStoppingConfig;

    fn quadratic(params: &HyperParams) -> TrialOutcome {
        let x = params["x"].as_f64().unwrap_or(0.0);
        let y = params["y"].as_f64().unwrap_or(0.0);
        let loss = x * x + y * y;
        TrialOutcome::ok(loss, loss)
    }

    fn space() -> SearchSpace {
        SearchSpace::new().float("x", -5.0, 5.0).float("y", -5.0, 5.0)
    }

    #[test]
    fn test_optimization() {
        let config = OptimizationConfig::new()
            .with_max_evals(40)
            .with_early_stopping(EarlyStoppingConfig::disabled())
            .with_seed(11);
        let mut optimizer = HyperOptX::new(config, space());
        let study = optimizer.optimize(quadratic);

        assert_eq!(study.trials.len(), 40);
        assert!(study.best_value().unwrap() < 5.0);
        assert_eq!(study.stop_reason, StopReason::Completed);

        let history = study.best_value_history();
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_seeded_runs_agree() {
        let run = || {
            let config = OptimizationConfig::new().with_max_evals(25).with_seed(9);
            let mut optimizer = HyperOptX::new(config, space());
            optimizer.optimize(quadratic);
            optimizer.into_study()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.best_params(), b.best_params());
        assert_eq!(a.best_value(), b.best_value());
    }

    #[test]
    fn test_early_stopping() {
        let config = OptimizationConfig::new().with_max_evals(100).with_early_stopping(EarlyStoppingConfig {
            enabled: true,
            patience: 5,
            min_evals: 8,
            min_improvement_pct: 1.0,
            loss_cap_multiplier: 5.0,
        });
        let mut optimizer = HyperOptX::new(config, space());
        let study = optimizer.optimize(|_| TrialOutcome::ok(1.0, 1.0));

        // First trial improves, the next five do not, but stopping waits for min_evals
        assert_eq!(study.trials.len(), 8);
        assert_eq!(study.stop_reason, StopReason::EarlyStopped);
    }

    #[test]
    fn test_capped_and_failed_never_best() {
        let config = OptimizationConfig::new()
            .with_max_evals(12)
            .with_early_stopping(EarlyStoppingConfig::disabled());
        let mut optimizer = HyperOptX::new(config, space());
        let mut calls = 0;
        let study = optimizer.optimize(|_| {
            calls += 1;
            match calls % 3 {
                0 => TrialOutcome::capped(0.1, 100.0, 0.0),
                1 => TrialOutcome::failed("diverged"),
                _ => TrialOutcome::ok(1.0, 10.0 + calls as f64),
            }
        });

        let best = study.best_trial().unwrap();
        assert_eq!(best.status, TrialStatus::Ok);
        assert_eq!(best.value, 12.0);

        let summary = study.summary();
        assert_eq!((summary.n_ok, summary.n_capped, summary.n_failed), (4, 4, 4));
        assert!((summary.success_rate - 8.0 / 12.0).abs() < 1e-12);
        assert!(summary.to_metrics().contains_key("best_value"));
    }

    #[test]
    fn test_study_roundtrip_keeps_failed_loss() {
        let config = OptimizationConfig::new().with_max_evals(3);
        let mut optimizer = HyperOptX::new(config, space());
        optimizer.optimize(|_| TrialOutcome::failed("boom"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.json");
        optimizer.study().save(&path).unwrap();
        let loaded = Study::load(&path).unwrap();
        assert_eq!(loaded.trials.len(), 3);
        assert!(loaded.trials[0].value.is_infinite());
        assert!(loaded.best_trial().is_none());
    }

    #[test]
    fn test_load_truncated_study() {
        let config = OptimizationConfig::new()
            .with_max_evals(6)
            .with_early_stopping(EarlyStoppingConfig::disabled());
        let mut optimizer = HyperOptX::new(config, space());
        let mut loss = 10.0;
        optimizer.optimize(|_| {
            loss -= 1.0;
            TrialOutcome::ok(loss, loss)
        });
        assert_eq!(optimizer.study().best_trial_idx, Some(5));

        // Drop the last trials by hand, leaving a dangling best index
        let mut doc = serde_json::to_value(optimizer.study()).unwrap();
        doc["trials"].as_array_mut().unwrap().truncate(2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.json");
        std::fs::write(&path, doc.to_string()).unwrap();

        let loaded = Study::load(&path).unwrap();
        assert_eq!(loaded.best_trial_idx, Some(1));
        assert_eq!(loaded.best_value(), Some(8.0));

        let stale = Study {
            best_trial_idx: Some(7),
            ..loaded
        };
        assert!(stale.best_trial().is_none());
    }
}
