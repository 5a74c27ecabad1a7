//! Training run configuration
//!
//! A run is described by one JSON document with `model`, `hyperparams`,
//! `preprocessing`, `feature_engineering`, `split` and `tracking` sections.
//! [`TrainingConfig`] validates the document at construction and again on
//! every [`TrainingConfig::set`], so it never holds an invalid document.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

use crate::error::{ForecastError, Result};
use crate::preprocessing::{MissingValueStrategy, PreprocessingConfig};
use crate::timeseries::FeatureEngineerConfig;
use crate::training::HyperParams;

/// Metrics a search may optimize
pub const SUPPORTED_METRICS: [&str; 3] = ["rmse", "mae", "mape"];

/// Keys under `hyperparams` that steer the search rather than the model
const SEARCH_KEYS: [&str; 5] = ["max_evals", "metric", "search", "search_space", "early_stopping"];

/// Early stopping settings for a hyperparameter search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub enabled: bool,
    /// Consecutive non-improving trials tolerated
    pub patience: usize,
    /// Trials always run before stopping is considered
    pub min_evals: usize,
    /// Relative improvement, in percent, that resets patience
    pub min_improvement_pct: f64,
    /// Validation scores above `std(train) * multiplier` are capped
    pub loss_cap_multiplier: f64,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self::from_max_evals(50)
    }
}

impl EarlyStoppingConfig {
    /// Settings scaled to the size of the search
    pub fn from_max_evals(max_evals: usize) -> Self {
        let quarter = (max_evals as f64 * 0.25).floor() as usize;
        let fifth = (max_evals as f64 * 0.2).floor() as usize;
        Self {
            enabled: true,
            patience: quarter.min(30).max(10),
            min_evals: fifth.max(10),
            min_improvement_pct: 1.0,
            loss_cap_multiplier: 5.0,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Validated training configuration document
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    doc: Value,
}

impl TrainingConfig {
    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ForecastError::ConfigurationError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let doc: Value = serde_json::from_str(&text).map_err(|e| {
            ForecastError::ConfigurationError(format!("invalid JSON in {}: {}", path.display(), e))
        })?;
        Self::from_value(doc)
    }

    pub fn from_value(doc: Value) -> Result<Self> {
        let config = Self { doc };
        config.validate()?;
        Ok(config)
    }

    /// Nested lookup; `default` when any segment is missing or null
    pub fn get(&self, keys: &[&str], default: Value) -> Value {
        self.lookup(keys).cloned().unwrap_or(default)
    }

    fn lookup(&self, keys: &[&str]) -> Option<&Value> {
        let mut node = &self.doc;
        for key in keys {
            node = node.get(*key)?;
        }
        (!node.is_null()).then_some(node)
    }

    /// Set a nested value, creating intermediate objects.
    ///
    /// The updated document is validated again; on error the config is
    /// left unchanged.
    pub fn set(&mut self, keys: &[&str], value: Value) -> Result<()> {
        let Some((last, parents)) = keys.split_last() else {
            return Err(ForecastError::ConfigurationError("empty key path".to_string()));
        };
        let mut doc = self.doc.clone();
        let mut node = &mut doc;
        for key in parents {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = node
                .as_object_mut()
                .map(|obj| obj.entry(key.to_string()).or_insert_with(|| json!({})))
                .ok_or_else(|| ForecastError::ConfigurationError(format!("'{}' is not an object", key)))?;
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Some(obj) = node.as_object_mut() {
            obj.insert(last.to_string(), value);
        }

        let updated = Self { doc };
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn to_value(&self) -> &Value {
        &self.doc
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(&self.doc)?)?;
        Ok(())
    }

    fn str_at(&self, keys: &[&str]) -> Option<&str> {
        self.lookup(keys).and_then(Value::as_str)
    }

    pub fn model_type(&self) -> &str {
        self.str_at(&["model", "type"]).unwrap_or_default()
    }

    pub fn model_name(&self) -> &str {
        self.str_at(&["model", "name"]).unwrap_or_default()
    }

    pub fn search_enabled(&self) -> bool {
        self.lookup(&["hyperparams", "search", "enabled"])
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn max_evals(&self) -> usize {
        self.lookup(&["hyperparams", "max_evals"])
            .and_then(Value::as_u64)
            .unwrap_or(50) as usize
    }

    pub fn metric(&self) -> &str {
        self.str_at(&["hyperparams", "metric"]).unwrap_or("rmse")
    }

    pub fn random_state(&self) -> Option<u64> {
        self.lookup(&["hyperparams", "random_state"]).and_then(Value::as_u64)
    }

    pub fn use_feature_engineering(&self) -> bool {
        self.lookup(&["hyperparams", "use_feature_engineering"])
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn test_size(&self) -> f64 {
        self.lookup(&["split", "test_size"]).and_then(Value::as_f64).unwrap_or(0.2)
    }

    pub fn validation_size(&self) -> f64 {
        self.lookup(&["split", "validation_size"]).and_then(Value::as_f64).unwrap_or(0.1)
    }

    /// Automatic settings for `max_evals`, overridden field by field by
    /// `hyperparams.early_stopping`
    pub fn early_stopping(&self) -> Result<EarlyStoppingConfig> {
        let base = EarlyStoppingConfig::from_max_evals(self.max_evals());
        let Some(Value::Object(overrides)) = self.lookup(&["hyperparams", "early_stopping"]) else {
            return Ok(base);
        };
        let mut merged = serde_json::to_value(&base)?;
        if let Some(obj) = merged.as_object_mut() {
            obj.extend(overrides.clone());
        }
        serde_json::from_value(merged).map_err(|e| {
            ForecastError::ConfigurationError(format!("hyperparams.early_stopping: {}", e))
        })
    }

    pub fn search_space(&self) -> Value {
        self.get(&["hyperparams", "search_space"], json!({}))
    }

    /// Fixed model hyperparameters, with the feature engineering section
    /// attached when it is enabled
    pub fn model_params(&self) -> HyperParams {
        let mut params: HyperParams = self
            .lookup(&["hyperparams"])
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| !SEARCH_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if self.use_feature_engineering() {
            if let Some(fe) = self.lookup(&["feature_engineering"]) {
                params.insert("feature_engineering".to_string(), fe.clone());
            }
        }
        params
    }

    pub fn feature_engineering(&self) -> Result<Option<FeatureEngineerConfig>> {
        if !self.use_feature_engineering() {
            return Ok(None);
        }
        let section = self.get(&["feature_engineering"], json!({}));
        serde_json::from_value(section)
            .map(Some)
            .map_err(|e| ForecastError::ConfigurationError(format!("feature_engineering: {}", e)))
    }

    pub fn preprocessing(&self) -> Result<PreprocessingConfig> {
        let section = self.get(&["preprocessing"], json!({}));
        serde_json::from_value(section)
            .map_err(|e| ForecastError::ConfigurationError(format!("preprocessing: {}", e)))
    }

    pub fn experiment_name(&self) -> &str {
        self.str_at(&["tracking", "experiment_name"]).unwrap_or("default")
    }

    pub fn run_name(&self) -> Option<&str> {
        self.str_at(&["tracking", "run_name"])
    }

    pub fn tracking_dir(&self) -> &str {
        self.str_at(&["tracking", "output_dir"]).unwrap_or("./experiments")
    }

    fn validate(&self) -> Result<()> {
        self.validate_structure()?;
        self.validate_fields()?;
        self.validate_rules()
    }

    fn validate_structure(&self) -> Result<()> {
        for section in ["model", "hyperparams", "preprocessing", "tracking"] {
            match self.doc.get(section) {
                Some(Value::Object(_)) => {}
                Some(_) => return Err(invalid(section, "must be an object")),
                None => return Err(invalid(section, "missing required section")),
            }
        }
        if self.use_feature_engineering() && !matches!(self.doc.get("feature_engineering"), Some(Value::Object(_))) {
            return Err(invalid(
                "feature_engineering",
                "required when hyperparams.use_feature_engineering is true",
            ));
        }
        Ok(())
    }

    fn validate_fields(&self) -> Result<()> {
        require(&self.doc, &["model", "type"], Value::is_string, "must be a string")?;
        require(&self.doc, &["model", "name"], Value::is_string, "must be a string")?;

        let hp = ["hyperparams"];
        require(&self.doc, &[hp[0], "use_feature_engineering"], Value::is_boolean, "must be a boolean")?;
        require(&self.doc, &[hp[0], "random_state"], Value::is_u64, "must be a non-negative integer")?;
        require(
            &self.doc,
            &[hp[0], "max_evals"],
            |v| v.as_u64().map_or(false, |n| n >= 1),
            "must be an integer >= 1",
        )?;
        require(
            &self.doc,
            &[hp[0], "metric"],
            |v| v.as_str().map_or(false, |m| SUPPORTED_METRICS.contains(&m)),
            "must be one of rmse, mae, mape",
        )?;
        require(&self.doc, &[hp[0], "search_space"], Value::is_object, "must be an object")?;

        if self.use_feature_engineering() {
            let fe = "feature_engineering";
            let non_empty = |v: &Value| v.as_array().map_or(false, |a| !a.is_empty());
            for list in ["lag_periods", "rolling_windows", "rolling_features"] {
                require(&self.doc, &[fe, list], non_empty, "must be a non-empty list")?;
            }
            let diff_on = self
                .lookup(&[fe, "use_diff_features"])
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if diff_on {
                require(&self.doc, &[fe, "diff_periods"], non_empty, "required when use_diff_features is true")?;
            }
            self.feature_engineering()?;
        }

        require(
            &self.doc,
            &["preprocessing", "handle_missing"],
            |v| v.as_str().and_then(MissingValueStrategy::parse).is_some(),
            "must be one of interpolate, ffill, bfill, drop, median",
        )?;
        require(&self.doc, &["preprocessing", "max_missing_ratio"], Value::is_number, "must be a number")?;
        require(
            &self.doc,
            &["preprocessing", "interpolation_limit"],
            Value::is_u64,
            "must be a non-negative integer",
        )?;
        require(&self.doc, &["tracking", "experiment_name"], Value::is_string, "must be a string")?;
        self.preprocessing()?;
        self.early_stopping()?;
        Ok(())
    }

    fn validate_rules(&self) -> Result<()> {
        let (test, val) = (self.test_size(), self.validation_size());
        if !(test > 0.0 && test < 1.0) {
            return Err(invalid("split.test_size", format!("{} must be in (0, 1)", test)));
        }
        if !(0.0..1.0).contains(&val) {
            return Err(invalid("split.validation_size", format!("{} must be in [0, 1)", val)));
        }
        if test + val >= 1.0 {
            return Err(invalid(
                "split",
                format!("test_size + validation_size = {} leaves no training data", test + val),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: impl std::fmt::Display) -> ForecastError {
    ForecastError::ConfigurationError(format!("{}: {}", key, reason))
}

fn require(doc: &Value, keys: &[&str], check: impl Fn(&Value) -> bool, reason: &str) -> Result<()> {
    let path = keys.join(".");
    let mut node = doc;
    for key in keys {
        node = node
            .get(*key)
            .ok_or_else(|| invalid(&path, "missing required field"))?;
    }
    if check(node) {
        Ok(())
    } else {
        Err(invalid(&path, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_doc() -> Value {
        json!({
            "model": {"type": "Sarima", "name": "sales"},
            "hyperparams": {
                "use_feature_engineering": false,
                "random_state": 42,
                "max_evals": 40,
                "metric": "rmse",
                "search_space": {"p": [0, 1, 2]},
                "trend": "c"
            },
            "preprocessing": {"handle_missing": "interpolate", "max_missing_ratio": 0.3, "interpolation_limit": 3},
            "tracking": {"experiment_name": "sales"}
        })
    }

    #[test]
    fn test_accessors() {
        let config = TrainingConfig::from_value(sample_doc()).unwrap();
        assert_eq!(config.model_type(), "Sarima");
        assert_eq!(config.max_evals(), 40);
        assert!(config.search_enabled());
        assert_eq!(config.test_size(), 0.2);
        assert_eq!(config.get(&["model", "missing"], json!(7)), json!(7));

        let params = config.model_params();
        assert_eq!(params.get("trend"), Some(&json!("c")));
        assert!(!params.contains_key("max_evals"));
        assert!(!params.contains_key("search_space"));
        assert!(config.feature_engineering().unwrap().is_none());
    }

    #[test]
    fn test_early_stopping_defaults() {
        let es = EarlyStoppingConfig::from_max_evals(40);
        assert_eq!(es.patience, 10);
        assert_eq!(es.min_evals, 10);

        let es = EarlyStoppingConfig::from_max_evals(200);
        assert_eq!(es.patience, 30);
        assert_eq!(es.min_evals, 40);
        assert_eq!(es.loss_cap_multiplier, 5.0);

        let mut doc = sample_doc();
        doc["hyperparams"]["early_stopping"] = json!({"patience": 3, "enabled": false});
        let config = TrainingConfig::from_value(doc).unwrap();
        let es = config.early_stopping().unwrap();
        assert_eq!(es.patience, 3);
        assert!(!es.enabled);
        assert_eq!(es.min_evals, 10);
    }

    #[test]
    fn test_validation_names_key() {
        let mut doc = sample_doc();
        doc["hyperparams"]["metric"] = json!("r2");
        let err = TrainingConfig::from_value(doc).unwrap_err().to_string();
        assert!(err.contains("hyperparams.metric"), "{}", err);

        let mut doc = sample_doc();
        doc.as_object_mut().unwrap().remove("tracking");
        assert!(TrainingConfig::from_value(doc).unwrap_err().to_string().contains("tracking"));

        let mut doc = sample_doc();
        doc["split"] = json!({"test_size": 0.6, "validation_size": 0.5});
        assert!(TrainingConfig::from_value(doc).unwrap_err().to_string().contains("split"));
    }

    #[test]
    fn test_feature_engineering_required() {
        let mut doc = sample_doc();
        doc["hyperparams"]["use_feature_engineering"] = json!(true);
        assert!(TrainingConfig::from_value(doc.clone()).is_err());

        doc["feature_engineering"] = json!({
            "lag_periods": [1, 2],
            "rolling_windows": [3],
            "rolling_features": ["mean"],
            "use_diff_features": true,
            "diff_periods": [1]
        });
        let config = TrainingConfig::from_value(doc).unwrap();
        let fe = config.feature_engineering().unwrap().unwrap();
        assert_eq!(fe.lag_periods, vec![1, 2]);
        assert!(config.model_params().contains_key("feature_engineering"));
    }

    #[test]
    fn test_set_and_save() {
        let mut config = TrainingConfig::from_value(sample_doc()).unwrap();
        config.set(&["tracking", "run_name"], json!("nightly")).unwrap();
        config.set(&["extra", "deep", "key"], json!(1)).unwrap();
        assert_eq!(config.run_name(), Some("nightly"));
        assert_eq!(config.get(&["extra", "deep", "key"], Value::Null), json!(1));
        assert!(config.set(&[], json!(1)).is_err());

        // Invalid updates are rejected and leave the config untouched
        let err = config.set(&["hyperparams", "metric"], json!("r2")).unwrap_err().to_string();
        assert!(err.contains("hyperparams.metric"), "{}", err);
        assert_eq!(config.metric(), "rmse");
        assert!(config.set(&["split", "test_size"], json!(1.5)).is_err());
        assert_eq!(config.test_size(), 0.2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        config.save(&path).unwrap();
        let loaded = TrainingConfig::from_file(&path).unwrap();
        assert_eq!(loaded.run_name(), Some("nightly"));
    }
}
