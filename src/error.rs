//! Error types for the Kolosal forecasting engine

use thiserror::Error;

/// Result type alias for forecasting operations
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Main error type for the forecasting engine
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Model not fitted")]
    NotFitted,

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Unknown model type '{key}', available: [{}]", available.join(", "))]
    UnknownModel { key: String, available: Vec<String> },

    #[error("Forecast horizon of {steps} steps overflows the timestamp range")]
    HorizonOverflow { steps: usize },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Tracking error: {0}")]
    TrackingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ForecastError {
    /// Shorthand for an `InvalidParameter` error
    pub fn invalid_param(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        ForecastError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ForecastError {
    fn from(err: ndarray::ShapeError) -> Self {
        ForecastError::DataError(format!("invalid shape: {}", err))
    }
}

impl From<polars::error::PolarsError> for ForecastError {
    fn from(err: polars::error::PolarsError) -> Self {
        ForecastError::DataError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ForecastError::TrainingError("too few samples".to_string());
        assert_eq!(err.to_string(), "Training error: too few samples");
    }

    #[test]
    fn test_unknown_model_lists_keys() {
        let err = ForecastError::UnknownModel {
            key: "nonexistent".to_string(),
            available: vec!["Additive".to_string(), "Sarima".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("nonexistent"));
        assert!(msg.contains("Additive, Sarima"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ForecastError = io_err.into();
        assert!(matches!(err, ForecastError::IoError(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ForecastError = json_err.into();
        assert!(matches!(err, ForecastError::SerializationError(_)));
    }
}
