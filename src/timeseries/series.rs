//! Frequency-tagged univariate series

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::frequency::Frequency;
use crate::error::{ForecastError, Result};

/// One timestamped value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// Ordered (timestamp, value) observations with a nominal frequency.
///
/// Timestamps are strictly increasing and every value is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
    frequency: Option<Frequency>,
}

impl Series {
    /// Build a series, validating ordering and values
    pub fn new(timestamps: Vec<NaiveDateTime>, values: Vec<f64>) -> Result<Self> {
        if timestamps.len() != values.len() {
            return Err(ForecastError::DataError(format!(
                "timestamps ({}) and values ({}) differ in length",
                timestamps.len(),
                values.len()
            )));
        }
        if let Some(pos) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ForecastError::DataError(format!(
                "timestamps must be strictly increasing (position {})",
                pos + 1
            )));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::DataError(format!(
                "non-finite value at position {}",
                pos
            )));
        }

        Ok(Self {
            timestamps,
            values,
            frequency: None,
        })
    }

    /// Build a regular series starting at `start`
    pub fn from_values(start: NaiveDateTime, frequency: Frequency, values: Vec<f64>) -> Result<Self> {
        let mut timestamps = Vec::with_capacity(values.len());
        if !values.is_empty() {
            timestamps.push(start);
            timestamps.extend(frequency.horizon(start, values.len() - 1)?);
        }
        Ok(Self::new(timestamps, values)?.with_frequency(Some(frequency)))
    }

    /// Build a series from observations already in time order
    pub fn from_observations(observations: &[Observation]) -> Result<Self> {
        let (timestamps, values) = observations
            .iter()
            .map(|o| (o.timestamp, o.value))
            .unzip();
        Self::new(timestamps, values)
    }

    /// Tag the series with a frequency
    pub fn with_frequency(mut self, frequency: Option<Frequency>) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    /// Declared frequency, if any
    pub fn frequency(&self) -> Option<Frequency> {
        self.frequency
    }

    /// Declared frequency, falling back to inference from the index
    pub fn effective_frequency(&self) -> Option<Frequency> {
        self.frequency.or_else(|| Frequency::infer(&self.timestamps))
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Observation> + '_ {
        self.timestamps
            .iter()
            .zip(&self.values)
            .map(|(&timestamp, &value)| Observation { timestamp, value })
    }

    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Arithmetic mean (0 for an empty series)
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population standard deviation (0 for an empty series)
    pub fn std(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / self.values.len() as f64;
        var.sqrt()
    }

    /// Sample standard deviation, `n - 1` denominator (0 below two points)
    pub fn sample_std(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        var.sqrt()
    }

    /// Sub-series over a positional range, keeping the frequency
    pub fn slice(&self, range: Range<usize>) -> Series {
        Series {
            timestamps: self.timestamps[range.clone()].to_vec(),
            values: self.values[range].to_vec(),
            frequency: self.frequency,
        }
    }

    /// Last `n` observations (all of them when `n >= len`)
    pub fn tail(&self, n: usize) -> Series {
        let start = self.len().saturating_sub(n);
        self.slice(start..self.len())
    }

    /// Append a later series
    pub fn concat(&self, other: &Series) -> Result<Series> {
        if let (Some(last), Some(first)) = (self.last_timestamp(), other.first_timestamp()) {
            if first <= last {
                return Err(ForecastError::DataError(
                    "cannot concatenate: second series does not start after the first".to_string(),
                ));
            }
        }
        let mut timestamps = self.timestamps.clone();
        timestamps.extend_from_slice(&other.timestamps);
        let mut values = self.values.clone();
        values.extend_from_slice(&other.values);
        Ok(Series {
            timestamps,
            values,
            frequency: self.frequency.or(other.frequency),
        })
    }
}

/// Chronological train/validation/test partition
#[derive(Debug, Clone)]
pub struct SplitSeries {
    pub train: Series,
    pub validation: Option<Series>,
    pub test: Series,
}

/// Split a series chronologically.
///
/// The test block is the last `round(n * test_size)` points (at least one), the
/// validation block the `round(n * validation_size)` points before it.
pub fn split_series(series: &Series, test_size: f64, validation_size: f64) -> Result<SplitSeries> {
    if !(0.0..1.0).contains(&test_size) || test_size == 0.0 {
        return Err(ForecastError::ConfigurationError(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }
    if !(0.0..1.0).contains(&validation_size) {
        return Err(ForecastError::ConfigurationError(format!(
            "validation_size must be in [0, 1), got {}",
            validation_size
        )));
    }

    let n = series.len();
    let n_test = ((n as f64 * test_size).round() as usize).max(1);
    let n_val = (n as f64 * validation_size).round() as usize;
    if n_test + n_val >= n {
        return Err(ForecastError::DataError(format!(
            "series of {} points is too short for a {} test / {} validation split",
            n, n_test, n_val
        )));
    }

    let n_train = n - n_test - n_val;
    let train = series.slice(0..n_train);
    let validation = (n_val > 0).then(|| series.slice(n_train..n_train + n_val));
    let test = series.slice(n_train + n_val..n);

    Ok(SplitSeries {
        train,
        validation,
        test,
    })
}
