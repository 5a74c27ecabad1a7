//! Model registry
//!
//! Maps model-type keys to algorithm constructors. The process-wide instance
//! starts empty; [`register_builtin_models`] is the bootstrap call that fills
//! it, so initialization order never depends on module loading.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use super::additive::AdditiveForecaster;
use super::algorithm::{Algorithm, HyperParams};
use super::regression::{RegressionForecaster, RegressorKind};
use super::sarima::Sarima;
use crate::error::{ForecastError, Result};

/// Builds an unfitted algorithm from fixed hyperparameters
pub type ModelConstructor = Arc<dyn Fn(&HyperParams) -> Result<Box<dyn Algorithm>> + Send + Sync>;

static GLOBAL: OnceLock<ModelRegistry> = OnceLock::new();

/// String-keyed constructor table
pub struct ModelRegistry {
    constructors: RwLock<HashMap<String, ModelConstructor>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.list_models())
            .finish()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the built-in families
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtin_models(&registry);
        registry
    }

    /// Process-wide registry
    pub fn global() -> &'static ModelRegistry {
        GLOBAL.get_or_init(ModelRegistry::new)
    }

    /// Insert a constructor. An existing key is overwritten with a warning.
    pub fn register<F>(&self, key: impl Into<String>, constructor: F)
    where
        F: Fn(&HyperParams) -> Result<Box<dyn Algorithm>> + Send + Sync + 'static,
    {
        let key = key.into();
        let previous = self.constructors.write().insert(key.clone(), Arc::new(constructor));
        if previous.is_some() {
            warn!(key = %key, "Model type already registered, overwriting");
        } else {
            debug!(key = %key, "Registered model type");
        }
    }

    /// Constructor for `key`
    pub fn get(&self, key: &str) -> Result<ModelConstructor> {
        let found = self.constructors.read().get(key).cloned();
        found.ok_or_else(|| ForecastError::UnknownModel {
            key: key.to_string(),
            available: self.list_models(),
        })
    }

    /// Instantiate `key` with `params`
    pub fn create(&self, key: &str, params: &HyperParams) -> Result<Box<dyn Algorithm>> {
        let constructor = self.get(key)?;
        constructor(params)
    }

    /// Registered keys, sorted
    pub fn list_models(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.constructors.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.constructors.read().contains_key(key)
    }

    /// Remove every registration
    pub fn clear(&self) {
        self.constructors.write().clear();
    }
}

/// Register the built-in families under their model-type keys
pub fn register_builtin_models(registry: &ModelRegistry) {
    registry.register(Sarima::NAME, |params: &HyperParams| {
        Ok(Box::new(Sarima::from_params(params)?) as Box<dyn Algorithm>)
    });
    registry.register(AdditiveForecaster::NAME, |params: &HyperParams| {
        Ok(Box::new(AdditiveForecaster::from_params(params)?) as Box<dyn Algorithm>)
    });
    registry.register(RegressorKind::RandomForest.name(), |params: &HyperParams| {
        Ok(Box::new(RegressionForecaster::from_params(RegressorKind::RandomForest, params)?)
            as Box<dyn Algorithm>)
    });
    registry.register(RegressorKind::GradientBoosting.name(), |params: &HyperParams| {
        Ok(Box::new(RegressionForecaster::from_params(RegressorKind::GradientBoosting, params)?)
            as Box<dyn Algorithm>)
    });
}
