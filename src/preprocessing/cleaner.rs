//! Raw record cleaning into a regular, gap-free series

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::{MissingValueStrategy, PreprocessingConfig};
use crate::error::{ForecastError, Result};
use crate::timeseries::{Frequency, Series};

/// One unparsed input row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: String,
    pub value: Option<f64>,
}

impl RawRecord {
    pub fn new(timestamp: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            timestamp: timestamp.into(),
            value,
        }
    }
}

/// Turns raw rows into a clean, frequency-tagged series
pub trait Preprocessor {
    /// Clean `raw`, enforcing `frequency` when given
    fn clean(&self, raw: &[RawRecord], frequency: Option<&str>) -> Result<(Series, Option<Frequency>)>;
}

/// Descriptive statistics of a cleaned series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSummary {
    pub length: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub frequency: Option<String>,
}

/// Default preprocessor: parse, sort, dedupe, infer frequency, fill gaps
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesPreprocessor {
    config: PreprocessingConfig,
}

impl TimeSeriesPreprocessor {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    /// Summary statistics of a series
    pub fn summary(series: &Series) -> DataSummary {
        let values = series.values();
        let (min, max) = if values.is_empty() {
            (0.0, 0.0)
        } else {
            values
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
        };
        DataSummary {
            length: series.len(),
            mean: series.mean(),
            std: series.std(),
            min,
            max,
            median: median(values).unwrap_or(0.0),
            start: series.first_timestamp(),
            end: series.last_timestamp(),
            frequency: series.frequency().map(|f| f.code()),
        }
    }

    fn resolve_frequency(
        &self,
        timestamps: &[NaiveDateTime],
        requested: Option<&str>,
    ) -> Result<Option<Frequency>> {
        match requested.or(self.config.frequency.as_deref()) {
            Some(code) => Frequency::parse(code).map(Some).ok_or_else(|| {
                ForecastError::ConfigurationError(format!("unsupported frequency '{}'", code))
            }),
            None => {
                let inferred = Frequency::infer(timestamps);
                match inferred {
                    Some(freq) => info!(frequency = %freq, "Inferred series frequency"),
                    None => warn!("Could not infer a regular frequency from the timestamps"),
                }
                Ok(inferred)
            }
        }
    }

    fn fill_missing(&self, timestamps: &mut Vec<NaiveDateTime>, values: &mut Vec<Option<f64>>) -> Result<()> {
        let missing = values.iter().filter(|v| v.is_none()).count();
        if missing == 0 {
            return Ok(());
        }

        let ratio = missing as f64 / values.len() as f64;
        if ratio > self.config.max_missing_ratio {
            return Err(ForecastError::DataError(format!(
                "missing ratio {:.2}% exceeds the {:.2}% threshold",
                ratio * 100.0,
                self.config.max_missing_ratio * 100.0
            )));
        }
        info!(missing, ratio = ratio, strategy = ?self.config.handle_missing, "Filling missing values");

        let limit = self.config.interpolation_limit;
        match self.config.handle_missing {
            MissingValueStrategy::Interpolate => {
                interpolate(timestamps, values, limit);
                forward_fill(values, Some(limit * 2));
                backward_fill(values, Some(limit * 2));
            }
            MissingValueStrategy::Ffill => forward_fill(values, None),
            MissingValueStrategy::Bfill => backward_fill(values, None),
            MissingValueStrategy::Median => {
                let fill = median_present(values);
                values.iter_mut().filter(|v| v.is_none()).for_each(|v| *v = Some(fill));
            }
            MissingValueStrategy::Drop => {
                let (ts, vs): (Vec<_>, Vec<_>) = timestamps
                    .iter()
                    .zip(values.iter())
                    .filter(|(_, v)| v.is_some())
                    .map(|(t, v)| (*t, *v))
                    .unzip();
                *timestamps = ts;
                *values = vs;
            }
        }

        // Whatever the strategy left behind
        if values.iter().any(|v| v.is_none()) {
            debug!("Applying final fill to remaining gaps");
            forward_fill(values, None);
            backward_fill(values, None);
            let fill = median_present(values);
            values.iter_mut().filter(|v| v.is_none()).for_each(|v| *v = Some(fill));
        }
        Ok(())
    }
}

impl Preprocessor for TimeSeriesPreprocessor {
    fn clean(&self, raw: &[RawRecord], frequency: Option<&str>) -> Result<(Series, Option<Frequency>)> {
        if raw.is_empty() {
            return Err(ForecastError::DataError("input data is empty".to_string()));
        }

        let mut rows: Vec<(NaiveDateTime, Option<f64>)> = Vec::with_capacity(raw.len());
        let mut unparsed = 0usize;
        for record in raw {
            match parse_timestamp(&record.timestamp) {
                Some(ts) => rows.push((ts, record.value.filter(|v| v.is_finite()))),
                None => unparsed += 1,
            }
        }
        if unparsed > 0 {
            warn!(dropped = unparsed, "Dropped rows with unparseable timestamps");
        }
        if rows.is_empty() {
            return Err(ForecastError::DataError(
                "no row has a valid timestamp".to_string(),
            ));
        }

        rows.sort_by_key(|(ts, _)| *ts);
        let before = rows.len();
        let mut deduped: Vec<(NaiveDateTime, Option<f64>)> = Vec::with_capacity(rows.len());
        for row in rows {
            match deduped.last_mut() {
                Some(last) if last.0 == row.0 => *last = row,
                _ => deduped.push(row),
            }
        }
        if deduped.len() < before {
            warn!(removed = before - deduped.len(), "Removed duplicate timestamps, keeping the last");
        }

        let (mut timestamps, mut values): (Vec<_>, Vec<_>) = deduped.into_iter().unzip();
        let freq = self.resolve_frequency(&timestamps, frequency)?;
        self.fill_missing(&mut timestamps, &mut values)?;

        let values: Vec<f64> = values.into_iter().map(|v| v.unwrap_or(0.0)).collect();
        let series = Series::new(timestamps, values)?.with_frequency(freq);
        if series.is_empty() {
            return Err(ForecastError::DataError("no observations left after cleaning".to_string()));
        }
        info!(points = series.len(), frequency = ?freq.map(|f| f.code()), "Preprocessing complete");
        Ok((series, freq))
    }
}

/// Parse the timestamp formats seen in exported datasets
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn interpolate(timestamps: &[NaiveDateTime], values: &mut [Option<f64>], limit: usize) {
    let n = values.len();
    let mut i = 0;
    while i < n {
        if values[i].is_some() {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && values[i].is_none() {
            i += 1;
        }
        let end = i; // exclusive
        if start == 0 || end == n {
            continue;
        }

        let (left, right) = (start - 1, end);
        let (Some(v_left), Some(v_right)) = (values[left], values[right]) else {
            continue;
        };
        let span = (timestamps[right] - timestamps[left]).num_seconds() as f64;
        for k in start..end {
            // Long gaps are only filled `limit` points in from each side
            if k - start >= limit && end - 1 - k >= limit {
                continue;
            }
            let w = (timestamps[k] - timestamps[left]).num_seconds() as f64 / span;
            values[k] = Some(v_left + (v_right - v_left) * w);
        }
    }
}

fn forward_fill(values: &mut [Option<f64>], limit: Option<usize>) {
    let mut last: Option<f64> = None;
    let mut run = 0usize;
    for v in values.iter_mut() {
        match v {
            Some(x) => {
                last = Some(*x);
                run = 0;
            }
            None => {
                run += 1;
                if limit.map_or(true, |l| run <= l) {
                    *v = last;
                }
            }
        }
    }
}

fn backward_fill(values: &mut [Option<f64>], limit: Option<usize>) {
    values.reverse();
    forward_fill(values, limit);
    values.reverse();
}

fn median_present(values: &[Option<f64>]) -> f64 {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    median(&present).unwrap_or(0.0)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(rows: &[(&str, Option<f64>)]) -> Vec<RawRecord> {
        rows.iter().map(|(t, v)| RawRecord::new(*t, *v)).collect()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-01-05").is_some());
        assert!(parse_timestamp("2024/01/05").is_some());
        assert!(parse_timestamp("2024-01-05 10:30:00").is_some());
        assert!(parse_timestamp("2024-01-05T10:30:00Z").is_some());
        assert_eq!(parse_timestamp("2024-03"), parse_timestamp("2024-03-01"));
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_sort_dedupe_and_infer() {
        let raw = records(&[
            ("2024-01-03", Some(3.0)),
            ("2024-01-01", Some(1.0)),
            ("2024-01-02", Some(2.0)),
            ("2024-01-02", Some(20.0)),
            ("not a date", Some(9.0)),
        ]);
        let pre = TimeSeriesPreprocessor::default();
        let (series, freq) = pre.clean(&raw, None).unwrap();

        assert_eq!(series.values(), &[1.0, 20.0, 3.0]);
        assert_eq!(freq, Some(Frequency::Daily));
        assert_eq!(series.frequency(), Some(Frequency::Daily));
    }

    #[test]
    fn test_interpolate_gap() {
        let raw = records(&[
            ("2024-01-01", Some(0.0)),
            ("2024-01-02", None),
            ("2024-01-03", None),
            ("2024-01-04", Some(3.0)),
            ("2024-01-05", Some(4.0)),
            ("2024-01-06", Some(5.0)),
            ("2024-01-07", Some(6.0)),
        ]);
        let (series, _) = TimeSeriesPreprocessor::default().clean(&raw, Some("D")).unwrap();
        assert!((series.values()[1] - 1.0).abs() < 1e-12);
        assert!((series.values()[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_edge_fill_and_strategies() {
        let raw = records(&[
            ("2024-01-01", None),
            ("2024-01-02", Some(2.0)),
            ("2024-01-03", Some(4.0)),
            ("2024-01-04", Some(6.0)),
            ("2024-01-05", Some(8.0)),
            ("2024-01-06", Some(10.0)),
            ("2024-01-07", None),
        ]);

        let (series, _) = TimeSeriesPreprocessor::default().clean(&raw, None).unwrap();
        assert_eq!(series.values(), &[2.0, 2.0, 4.0, 6.0, 8.0, 10.0, 10.0]);

        let median_pre = TimeSeriesPreprocessor::new(
            PreprocessingConfig::new().with_strategy(MissingValueStrategy::Median),
        );
        let (series, _) = median_pre.clean(&raw, None).unwrap();
        assert_eq!(series.values(), &[6.0, 2.0, 4.0, 6.0, 8.0, 10.0, 6.0]);

        let drop_pre = TimeSeriesPreprocessor::new(
            PreprocessingConfig::new().with_strategy(MissingValueStrategy::Drop),
        );
        let (series, _) = drop_pre.clean(&raw, None).unwrap();
        assert_eq!(series.len(), 5);
    }

    #[test]
    fn test_too_many_missing() {
        let raw = records(&[
            ("2024-01-01", None),
            ("2024-01-02", None),
            ("2024-01-03", Some(1.0)),
        ]);
        let result = TimeSeriesPreprocessor::default().clean(&raw, None);
        assert!(matches!(result, Err(ForecastError::DataError(_))));
    }

    #[test]
    fn test_bad_frequency_code() {
        let raw = records(&[("2024-01-01", Some(1.0)), ("2024-01-02", Some(2.0))]);
        let result = TimeSeriesPreprocessor::default().clean(&raw, Some("fortnightly"));
        assert!(matches!(result, Err(ForecastError::ConfigurationError(_))));
    }

    #[test]
    fn test_summary() {
        let raw = records(&[
            ("2024-01-01", Some(1.0)),
            ("2024-01-02", Some(5.0)),
            ("2024-01-03", Some(3.0)),
        ]);
        let (series, _) = TimeSeriesPreprocessor::default().clean(&raw, None).unwrap();
        let summary = TimeSeriesPreprocessor::summary(&series);
        assert_eq!(summary.length, 3);
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.frequency.as_deref(), Some("D"));
    }
}
