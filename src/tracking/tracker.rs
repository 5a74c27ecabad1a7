//! Experiment tracking interface and local implementation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::storage::LocalStorage;
use crate::error::{ForecastError, Result};

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
    Killed,
}

/// One tracked training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub experiment: String,
    pub run_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    /// Stored artifact file names
    pub artifacts: Vec<String>,
    /// Name given to the logged model
    pub model: Option<String>,
}

impl Run {
    pub fn new(experiment: &str, run_name: Option<&str>) -> Self {
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
            experiment: experiment.to_string(),
            run_name: run_name.map(str::to_string),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
            model: None,
        }
    }
}

/// Sink for run parameters, metrics, models and artifacts
pub trait ExperimentTracker: Send {
    /// Open a run and return its identifier
    fn start_run(&mut self, experiment: &str, run_name: Option<&str>) -> Result<String>;

    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()>;

    /// Log metrics as `<prefix><name>`; non-finite values are skipped
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>, prefix: &str) -> Result<()>;

    fn log_model(&mut self, name: &str, snapshot: &Value, requirements: &[String]) -> Result<()>;

    fn log_artifact(&mut self, path: &Path) -> Result<()>;

    fn end_run(&mut self, status: RunStatus) -> Result<()>;
}

/// Tracker that discards everything
#[derive(Debug, Default)]
pub struct NoopTracker {
    runs: usize,
}

impl NoopTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExperimentTracker for NoopTracker {
    fn start_run(&mut self, _experiment: &str, _run_name: Option<&str>) -> Result<String> {
        self.runs += 1;
        Ok(format!("noop-{}", self.runs))
    }

    fn log_params(&mut self, _params: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    fn log_metrics(&mut self, _metrics: &BTreeMap<String, f64>, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn log_model(&mut self, _name: &str, _snapshot: &Value, _requirements: &[String]) -> Result<()> {
        Ok(())
    }

    fn log_artifact(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn end_run(&mut self, _status: RunStatus) -> Result<()> {
        Ok(())
    }
}

/// Tracker writing JSON run records under a local directory.
///
/// `run.json` is rewritten after every call, so an interrupted run still
/// leaves what was logged so far.
#[derive(Debug)]
pub struct LocalTracker {
    storage: LocalStorage,
    active: Option<Run>,
}

impl LocalTracker {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: LocalStorage::new(output_dir),
            active: None,
        }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    /// The currently open run
    pub fn active_run(&self) -> Option<&Run> {
        self.active.as_ref()
    }

    pub fn load_run(&self, experiment: &str, run_id: &str) -> Result<Run> {
        self.storage.load_run(experiment, run_id)
    }

    fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Run, &LocalStorage) -> Result<()>,
    {
        let run = self
            .active
            .as_mut()
            .ok_or_else(|| ForecastError::TrackingError("no active run".to_string()))?;
        f(run, &self.storage)?;
        self.storage.save_run(run)?;
        Ok(())
    }
}

impl ExperimentTracker for LocalTracker {
    fn start_run(&mut self, experiment: &str, run_name: Option<&str>) -> Result<String> {
        if let Some(mut previous) = self.active.take() {
            debug!(run_id = %previous.run_id, "Starting a new run while one is open, killing it");
            previous.status = RunStatus::Killed;
            previous.end_time = Some(Utc::now());
            self.storage.save_run(&previous)?;
        }
        let run = Run::new(experiment, run_name);
        let run_id = run.run_id.clone();
        let path = self.storage.save_run(&run)?;
        debug!(run_id = %run_id, path = %path.display(), "Run started");
        self.active = Some(run);
        Ok(run_id)
    }

    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        self.update(|run, _| {
            run.params.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        })
    }

    fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>, prefix: &str) -> Result<()> {
        self.update(|run, _| {
            for (name, value) in metrics.iter().filter(|(_, v)| v.is_finite()) {
                run.metrics.insert(format!("{}{}", prefix, name), *value);
            }
            Ok(())
        })
    }

    fn log_model(&mut self, name: &str, snapshot: &Value, requirements: &[String]) -> Result<()> {
        self.update(|run, storage| {
            let document = json!({
                "name": name,
                "requirements": requirements,
                "logged_at": Utc::now(),
                "model": snapshot,
            });
            storage.save_model(run, &document)?;
            run.model = Some(name.to_string());
            Ok(())
        })
    }

    fn log_artifact(&mut self, path: &Path) -> Result<()> {
        self.update(|run, storage| {
            let stored = storage.copy_artifact(run, path)?;
            if !run.artifacts.contains(&stored) {
                run.artifacts.push(stored);
            }
            Ok(())
        })
    }

    fn end_run(&mut self, status: RunStatus) -> Result<()> {
        self.update(|run, _| {
            run.status = status;
            run.end_time = Some(Utc::now());
            Ok(())
        })?;
        self.active = None;
        Ok(())
    }
}
