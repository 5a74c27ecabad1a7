//! Storage backend for experiment tracking
//!
//! Runs are kept on the local file system, one directory per run:
//!
//! ```text
//! <base_dir>/<experiment>/<run_id>/run.json
//! <base_dir>/<experiment>/<run_id>/model.json
//! <base_dir>/<experiment>/<run_id>/artifacts/<file>
//! ```

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::tracker::Run;
use crate::error::{ForecastError, Result};

/// Local file system storage backend
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn run_dir(&self, experiment: &str, run_id: &str) -> PathBuf {
        self.base_dir.join(sanitize(experiment)).join(run_id)
    }

    /// Write `run.json`, creating the run directory if needed
    pub fn save_run(&self, run: &Run) -> Result<PathBuf> {
        let dir = self.run_dir(&run.experiment, &run.run_id);
        fs::create_dir_all(&dir).map_err(|e| tracking_io("create run directory", &dir, e))?;
        let path = dir.join("run.json");
        fs::write(&path, serde_json::to_string_pretty(run)?).map_err(|e| tracking_io("write", &path, e))?;
        Ok(path)
    }

    pub fn load_run(&self, experiment: &str, run_id: &str) -> Result<Run> {
        let path = self.run_dir(experiment, run_id).join("run.json");
        let json = fs::read_to_string(&path).map_err(|e| tracking_io("read", &path, e))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Run ids stored for an experiment, sorted
    pub fn list_runs(&self, experiment: &str) -> Result<Vec<String>> {
        let dir = self.base_dir.join(sanitize(experiment));
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs: Vec<String> = fs::read_dir(&dir)
            .map_err(|e| tracking_io("list", &dir, e))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join("run.json").is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        runs.sort();
        Ok(runs)
    }

    pub fn save_model(&self, run: &Run, document: &Value) -> Result<PathBuf> {
        let dir = self.run_dir(&run.experiment, &run.run_id);
        fs::create_dir_all(&dir).map_err(|e| tracking_io("create run directory", &dir, e))?;
        let path = dir.join("model.json");
        fs::write(&path, serde_json::to_string_pretty(document)?).map_err(|e| tracking_io("write", &path, e))?;
        Ok(path)
    }

    /// Copy a file into the run's `artifacts/` folder; returns the stored name
    pub fn copy_artifact(&self, run: &Run, source: &Path) -> Result<String> {
        if !source.is_file() {
            return Err(ForecastError::TrackingError(format!(
                "artifact {} is not a file",
                source.display()
            )));
        }
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ForecastError::TrackingError(format!("artifact {} has no file name", source.display())))?
            .to_string();
        let dir = self.run_dir(&run.experiment, &run.run_id).join("artifacts");
        fs::create_dir_all(&dir).map_err(|e| tracking_io("create artifact directory", &dir, e))?;
        let target = dir.join(&name);
        fs::copy(source, &target).map_err(|e| tracking_io("copy artifact to", &target, e))?;
        Ok(name)
    }
}

/// Experiment names become directory names
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "default".to_string()
    } else {
        cleaned
    }
}

fn tracking_io(action: &str, path: &Path, err: std::io::Error) -> ForecastError {
    ForecastError::TrackingError(format!("failed to {} {}: {}", action, path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("sales/daily run"), "sales_daily_run");
        assert_eq!(sanitize(".."), "default");
        assert_eq!(sanitize("v1.2-test"), "v1.2-test");
    }

    #[test]
    fn test_save_and_list_runs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let run = Run::new("demo", None);
        storage.save_run(&run).unwrap();
        assert_eq!(storage.list_runs("demo").unwrap(), vec![run.run_id.clone()]);
        assert!(storage.list_runs("other").unwrap().is_empty());

        let loaded = storage.load_run("demo", &run.run_id).unwrap();
        assert_eq!(loaded.run_id, run.run_id);
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let run = Run::new("demo", None);
        let err = storage.copy_artifact(&run, &dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, ForecastError::TrackingError(_)));
    }
}
