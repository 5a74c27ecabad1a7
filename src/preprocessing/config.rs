//! Preprocessing configuration

use serde::{Deserialize, Serialize};

/// How missing values are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingValueStrategy {
    /// Time-weighted linear interpolation over short gaps
    Interpolate,
    /// Forward fill
    Ffill,
    /// Backward fill
    Bfill,
    /// Series median
    Median,
    /// Remove rows with missing values
    Drop,
}

impl MissingValueStrategy {
    /// Parse a strategy name as written in config files
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "interpolate" => Some(Self::Interpolate),
            "ffill" => Some(Self::Ffill),
            "bfill" => Some(Self::Bfill),
            "median" => Some(Self::Median),
            "drop" => Some(Self::Drop),
            _ => None,
        }
    }
}

/// Configuration for the time series preprocessor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Strategy for handling missing values
    pub handle_missing: MissingValueStrategy,

    /// Maximum tolerated share of missing values
    pub max_missing_ratio: f64,

    /// Longest gap filled by interpolation
    pub interpolation_limit: usize,

    /// Frequency code to enforce instead of inferring one
    pub frequency: Option<String>,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            handle_missing: MissingValueStrategy::Interpolate,
            max_missing_ratio: 0.3,
            interpolation_limit: 3,
            frequency: None,
        }
    }
}

impl PreprocessingConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the missing value strategy
    pub fn with_strategy(mut self, strategy: MissingValueStrategy) -> Self {
        self.handle_missing = strategy;
        self
    }

    /// Builder method to set the missing ratio threshold
    pub fn with_max_missing_ratio(mut self, ratio: f64) -> Self {
        self.max_missing_ratio = ratio;
        self
    }

    /// Builder method to set the interpolation limit
    pub fn with_interpolation_limit(mut self, limit: usize) -> Self {
        self.interpolation_limit = limit;
        self
    }

    /// Builder method to force a frequency
    pub fn with_frequency(mut self, code: impl Into<String>) -> Self {
        self.frequency = Some(code.into());
        self
    }
}
