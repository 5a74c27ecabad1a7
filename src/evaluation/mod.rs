//! Evaluation module
//!
//! Shared metric contract plus the two ways a fitted algorithm is scored:
//! - In-sample, from fitted values or a short recent window
//! - Out-of-sample, by direct or rolling forecasts chosen from a
//!   frequency-derived horizon threshold

mod evaluator;
mod metrics;
mod strategy;

pub use evaluator::evaluate_model;
pub use metrics::{Metrics, CORE_METRICS};
pub use strategy::{
    forecast_guarded, frequency_threshold, in_sample_window, rolling_forecast, select_strategy,
    ForecastMode, ForecastStrategy, FALLBACK_STEPS, IN_SAMPLE_WINDOW_MAX, IN_SAMPLE_WINDOW_MIN,
    MAX_SAFE_STEPS,
};
