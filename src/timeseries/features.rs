//! Time series feature engineering
//!
//! Turns a value series into supervised (X, y) samples for regression learners.
//! Features of row `t` only look at values strictly before `t` (plus the
//! timestamp of `t`), so a training row and the row built while forecasting
//! recursively are computed the same way.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

use super::series::Series;
use crate::error::{ForecastError, Result};

/// Rolling statistics types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RollingStat {
    Mean,
    Std,
    Min,
    Max,
}

impl RollingStat {
    fn name(&self) -> &'static str {
        match self {
            RollingStat::Mean => "mean",
            RollingStat::Std => "std",
            RollingStat::Min => "min",
            RollingStat::Max => "max",
        }
    }

    fn compute(&self, window: &[f64]) -> f64 {
        let n = window.len() as f64;
        match self {
            RollingStat::Mean => window.iter().sum::<f64>() / n,
            RollingStat::Min => window.iter().cloned().fold(f64::INFINITY, f64::min),
            RollingStat::Max => window.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            RollingStat::Std => {
                if window.len() < 2 {
                    return 0.0;
                }
                let mean = window.iter().sum::<f64>() / n;
                let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
                var.sqrt()
            }
        }
    }
}

/// Configuration for the feature engineer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureEngineerConfig {
    /// Lag periods to create
    pub lag_periods: Vec<usize>,
    /// Rolling window sizes
    pub rolling_windows: Vec<usize>,
    /// Statistics computed per rolling window
    pub rolling_features: Vec<RollingStat>,
    /// Calendar features of the target timestamp
    pub use_temporal_features: bool,
    /// Sin/cos encodings of month, weekday and hour
    pub use_cyclical_features: bool,
    pub use_diff_features: bool,
    pub diff_periods: Vec<usize>,
}

impl Default for FeatureEngineerConfig {
    fn default() -> Self {
        Self {
            lag_periods: vec![1, 2, 3, 7, 14],
            rolling_windows: vec![7, 14, 30],
            rolling_features: vec![
                RollingStat::Mean,
                RollingStat::Std,
                RollingStat::Min,
                RollingStat::Max,
            ],
            use_temporal_features: true,
            use_cyclical_features: true,
            use_diff_features: false,
            diff_periods: vec![1],
        }
    }
}

impl FeatureEngineerConfig {
    /// Plain lag window `1..=n_lags`, no other features
    pub fn lag_window(n_lags: usize) -> Self {
        Self {
            lag_periods: (1..=n_lags.max(1)).collect(),
            rolling_windows: Vec::new(),
            rolling_features: Vec::new(),
            use_temporal_features: false,
            use_cyclical_features: false,
            use_diff_features: false,
            diff_periods: Vec::new(),
        }
    }
}

/// Supervised feature builder for a univariate series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEngineer {
    config: FeatureEngineerConfig,
    feature_names: Vec<String>,
}

impl FeatureEngineer {
    pub fn new(config: FeatureEngineerConfig) -> Self {
        let feature_names = Self::build_names(&config);
        Self {
            config,
            feature_names,
        }
    }

    pub fn config(&self) -> &FeatureEngineerConfig {
        &self.config
    }

    fn build_names(config: &FeatureEngineerConfig) -> Vec<String> {
        let mut names = Vec::new();
        for lag in &config.lag_periods {
            names.push(format!("lag_{}", lag));
        }
        for window in &config.rolling_windows {
            for stat in &config.rolling_features {
                names.push(format!("rolling_{}_{}", stat.name(), window));
            }
        }
        if config.use_diff_features {
            for p in &config.diff_periods {
                names.push(format!("diff_{}", p));
            }
        }
        if config.use_temporal_features {
            names.extend(
                [
                    "year",
                    "month",
                    "day",
                    "day_of_week",
                    "day_of_year",
                    "week_of_year",
                    "quarter",
                    "hour",
                    "minute",
                    "is_weekend",
                    "is_month_start",
                    "is_month_end",
                    "season",
                ]
                .iter()
                .map(|s| s.to_string()),
            );
        }
        if config.use_cyclical_features {
            names.extend(
                ["month_sin", "month_cos", "dow_sin", "dow_cos", "hour_sin", "hour_cos"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        names
    }

    /// Feature names in column order
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Values needed before the first complete row
    pub fn min_history(&self) -> usize {
        let lags = self.config.lag_periods.iter().copied().max().unwrap_or(0);
        let windows = if self.config.rolling_features.is_empty() {
            0
        } else {
            self.config.rolling_windows.iter().copied().max().unwrap_or(0)
        };
        let diffs = if self.config.use_diff_features {
            self.config.diff_periods.iter().map(|p| p + 1).max().unwrap_or(0)
        } else {
            0
        };
        lags.max(windows).max(diffs).max(1)
    }

    /// Build (X, y) from a series, dropping rows without enough history
    pub fn fit_transform(&self, series: &Series) -> Result<(Array2<f64>, Array1<f64>)> {
        if self.feature_names.is_empty() {
            return Err(ForecastError::ConfigurationError(
                "feature engineering produces no features".to_string(),
            ));
        }

        let values = series.values();
        let start = self.min_history();
        if values.len() <= start {
            return Err(ForecastError::DataError(format!(
                "need more than {} observations to build features, got {}",
                start,
                values.len()
            )));
        }

        let n_rows = values.len() - start;
        let n_cols = self.n_features();
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for t in start..values.len() {
            data.extend(self.row(&values[..t], series.timestamps()[t])?);
        }

        let x = Array2::from_shape_vec((n_rows, n_cols), data)?;
        let y = Array1::from(values[start..].to_vec());
        Ok((x, y))
    }

    /// Features of the point following `history`, stamped `timestamp`
    pub fn row(&self, history: &[f64], timestamp: NaiveDateTime) -> Result<Vec<f64>> {
        let n = history.len();
        if n < self.min_history() {
            return Err(ForecastError::DataError(format!(
                "feature row needs {} past values, got {}",
                self.min_history(),
                n
            )));
        }

        let mut row = Vec::with_capacity(self.n_features());
        for &lag in &self.config.lag_periods {
            row.push(history[n - lag]);
        }
        for &window in &self.config.rolling_windows {
            let slice = &history[n - window..];
            for stat in &self.config.rolling_features {
                row.push(stat.compute(slice));
            }
        }
        if self.config.use_diff_features {
            for &p in &self.config.diff_periods {
                // Shifted one step so the current value never leaks in
                row.push(history[n - 1] - history[n - 1 - p]);
            }
        }
        if self.config.use_temporal_features {
            row.extend(temporal_features(timestamp));
        }
        if self.config.use_cyclical_features {
            row.extend(cyclical_features(timestamp));
        }
        Ok(row)
    }

    /// Pair feature importances with names
    pub fn importance_map(&self, importances: &[f64]) -> BTreeMap<String, f64> {
        self.feature_names
            .iter()
            .cloned()
            .zip(importances.iter().copied())
            .collect()
    }
}

fn temporal_features(ts: NaiveDateTime) -> [f64; 13] {
    let date = ts.date();
    let dow = date.weekday().num_days_from_monday() as f64;
    let month = date.month();
    let is_month_end = date.succ_opt().map(|d| d.day() == 1).unwrap_or(true);
    let season = match month {
        12 | 1 | 2 => 0.0,
        3..=5 => 1.0,
        6..=8 => 2.0,
        _ => 3.0,
    };
    [
        date.year() as f64,
        month as f64,
        date.day() as f64,
        dow,
        date.ordinal() as f64,
        date.iso_week().week() as f64,
        ((month - 1) / 3 + 1) as f64,
        ts.hour() as f64,
        ts.minute() as f64,
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun) as u8 as f64,
        (date.day() == 1) as u8 as f64,
        is_month_end as u8 as f64,
        season,
    ]
}

fn cyclical_features(ts: NaiveDateTime) -> [f64; 6] {
    let month = ts.month() as f64;
    let dow = ts.weekday().num_days_from_monday() as f64;
    let hour = ts.hour() as f64;
    [
        (2.0 * PI * month / 12.0).sin(),
        (2.0 * PI * month / 12.0).cos(),
        (2.0 * PI * dow / 7.0).sin(),
        (2.0 * PI * dow / 7.0).cos(),
        (2.0 * PI * hour / 24.0).sin(),
        (2.0 * PI * hour / 24.0).cos(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::Frequency;
    use chrono::NaiveDate;

    fn daily(values: Vec<f64>) -> Series {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Series::from_values(start, Frequency::Daily, values).unwrap()
    }

    #[test]
    fn test_lag_features() {
        let fe = FeatureEngineer::new(FeatureEngineerConfig::lag_window(2));
        let series = daily(vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let (x, y) = fe.fit_transform(&series).unwrap();

        assert_eq!(x.dim(), (3, 2));
        assert_eq!(y.to_vec(), vec![3.0, 4.0, 5.0]);
        // lag_1 then lag_2
        assert_eq!(x.row(0).to_vec(), vec![2.0, 1.0]);
        assert_eq!(fe.feature_names(), &["lag_1".to_string(), "lag_2".to_string()]);
    }

    #[test]
    fn test_rolling_uses_only_past() {
        let config = FeatureEngineerConfig {
            lag_periods: vec![],
            rolling_windows: vec![3],
            rolling_features: vec![RollingStat::Mean, RollingStat::Std],
            use_temporal_features: false,
            use_cyclical_features: false,
            ..Default::default()
        };
        let fe = FeatureEngineer::new(config);
        let (x, y) = fe.fit_transform(&daily(vec![1.0, 2.0, 3.0, 100.0])).unwrap();

        assert_eq!(y.to_vec(), vec![100.0]);
        assert!((x[[0, 0]] - 2.0).abs() < 1e-12);
        assert!((x[[0, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_diff_is_shifted() {
        let config = FeatureEngineerConfig {
            lag_periods: vec![1],
            rolling_windows: vec![],
            use_temporal_features: false,
            use_cyclical_features: false,
            use_diff_features: true,
            diff_periods: vec![1],
            ..Default::default()
        };
        let fe = FeatureEngineer::new(config);
        assert_eq!(fe.min_history(), 2);

        let (x, _) = fe.fit_transform(&daily(vec![1.0, 3.0, 6.0, 10.0])).unwrap();
        // Row for t=2: diff = y[1] - y[0]
        assert_eq!(x.row(0).to_vec(), vec![3.0, 2.0]);
        assert_eq!(x.row(1).to_vec(), vec![6.0, 3.0]);
    }

    #[test]
    fn test_row_matches_training_rows() {
        let fe = FeatureEngineer::new(FeatureEngineerConfig {
            lag_periods: vec![1, 3],
            rolling_windows: vec![4],
            ..Default::default()
        });
        let series = daily((0..20).map(|i| (i as f64).sin()).collect());
        let (x, _) = fe.fit_transform(&series).unwrap();

        let t = 10;
        let row = fe.row(&series.values()[..t], series.timestamps()[t]).unwrap();
        assert_eq!(row, x.row(t - fe.min_history()).to_vec());
    }

    #[test]
    fn test_temporal_values() {
        // 2024-03-31 is a Sunday and a month end
        let ts = NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap();
        let f = temporal_features(ts);
        assert_eq!(f[1], 3.0);
        assert_eq!(f[3], 6.0);
        assert_eq!(f[6], 1.0);
        assert_eq!(f[7], 13.0);
        assert_eq!(f[9], 1.0);
        assert_eq!(f[11], 1.0);
        assert_eq!(f[12], 1.0);
    }

    #[test]
    fn test_too_short() {
        let fe = FeatureEngineer::new(FeatureEngineerConfig::default());
        assert!(fe.fit_transform(&daily(vec![1.0; 30])).is_err());
    }

    #[test]
    fn test_importance_map() {
        let fe = FeatureEngineer::new(FeatureEngineerConfig::lag_window(2));
        let map = fe.importance_map(&[0.7, 0.3]);
        assert_eq!(map.get("lag_1"), Some(&0.7));
    }
}
