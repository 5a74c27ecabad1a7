//! Data preprocessing module
//!
//! Cleans raw timestamp/value rows into a [`Series`](crate::timeseries::Series):
//! - Timestamp parsing across common formats
//! - Sorting and duplicate removal
//! - Frequency enforcement or inference
//! - Missing value handling (interpolation, fills, median, drop)

mod cleaner;
mod config;

pub use cleaner::{parse_timestamp, DataSummary, Preprocessor, RawRecord, TimeSeriesPreprocessor};
pub use config::{MissingValueStrategy, PreprocessingConfig};
