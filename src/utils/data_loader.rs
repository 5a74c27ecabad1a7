//! Data loading utilities
//!
//! Reads timestamp/value CSV files through polars into [`RawRecord`]s for the
//! preprocessor, and writes forecasts back out.

use chrono::NaiveDateTime;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{ForecastError, Result};
use crate::preprocessing::RawRecord;

/// CSV loader for univariate series
#[derive(Debug, Clone)]
pub struct DataLoader {
    date_column: String,
    value_column: String,
    delimiter: u8,
    /// Rows used for schema inference
    infer_schema_length: usize,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            date_column: "date".to_string(),
            value_column: "value".to_string(),
            delimiter: b',',
            infer_schema_length: 100,
        }
    }

    pub fn with_columns(mut self, date_column: impl Into<String>, value_column: impl Into<String>) -> Self {
        self.date_column = date_column.into();
        self.value_column = value_column.into();
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    /// Load a CSV file into a data frame
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| ForecastError::DataError(format!("cannot open {}: {}", path.display(), e)))?;

        let delimiter = if path.extension().map_or(false, |ext| ext == "tsv") {
            b'\t'
        } else {
            self.delimiter
        };
        let parse_opts = CsvParseOptions::default().with_separator(delimiter);

        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(self.infer_schema_length))
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| ForecastError::DataError(format!("cannot read {}: {}", path.display(), e)))
    }

    /// Load the configured date and value columns as raw records.
    ///
    /// Values that do not parse as numbers become missing; the preprocessor
    /// decides how to fill them.
    pub fn load_records(&self, path: impl AsRef<Path>) -> Result<Vec<RawRecord>> {
        let start = Instant::now();
        let df = self.load_csv(&path)?;
        let records = self.records_from_frame(&df)?;
        info!(
            path = %path.as_ref().display(),
            rows = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded series data"
        );
        Ok(records)
    }

    /// Extract raw records from an in-memory frame
    pub fn records_from_frame(&self, df: &DataFrame) -> Result<Vec<RawRecord>> {
        let dates = self.column(df, &self.date_column)?.cast(&DataType::String)?;
        let values = self.column(df, &self.value_column)?.cast(&DataType::Float64)?;

        let records: Vec<RawRecord> = dates
            .str()?
            .into_iter()
            .zip(values.f64()?)
            .filter_map(|(date, value)| date.map(|d| RawRecord::new(d.trim(), value)))
            .collect();

        let skipped = df.height() - records.len();
        if skipped > 0 {
            debug!(skipped, "Dropped rows without a timestamp");
        }
        if records.is_empty() {
            return Err(ForecastError::DataError("no rows with a timestamp".to_string()));
        }
        Ok(records)
    }

    fn column(&self, df: &DataFrame, name: &str) -> Result<Series> {
        df.column(name)
            .map(|c| c.as_materialized_series().clone())
            .map_err(|_| {
                ForecastError::DataError(format!(
                    "column '{}' not found (available: {})",
                    name,
                    df.get_column_names()
                        .iter()
                        .map(|c| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// Write a forecast as a `date,forecast` CSV file
pub fn save_forecast(path: impl AsRef<Path>, timestamps: &[NaiveDateTime], values: &[f64]) -> Result<()> {
    if timestamps.len() != values.len() {
        return Err(ForecastError::DataError(format!(
            "{} timestamps for {} forecast values",
            timestamps.len(),
            values.len()
        )));
    }
    let dates: Vec<String> = timestamps
        .iter()
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .collect();
    let mut df = DataFrame::new(vec![
        Column::new("date".into(), dates),
        Column::new("forecast".into(), values.to_vec()),
    ])?;

    let path = path.as_ref();
    let mut file = File::create(path)
        .map_err(|e| ForecastError::DataError(format!("cannot create {}: {}", path.display(), e)))?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    Ok(())
}
