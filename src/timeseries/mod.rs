//! Time series module
//!
//! Provides the series data model and the transforms built on it:
//! - Frequency parsing, inference and horizon construction
//! - Chronological train/validation/test splitting
//! - Lag, rolling, diff and calendar features
//! - Regular and seasonal differencing

mod features;
mod frequency;
mod series;
mod transforms;

pub use features::{FeatureEngineer, FeatureEngineerConfig, RollingStat};
pub use frequency::Frequency;
pub use series::{split_series, Observation, Series, SplitSeries};
pub use transforms::Differencer;
