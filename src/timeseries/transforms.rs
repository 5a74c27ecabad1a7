//! Time series transformations

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Regular and seasonal differencing with forward integration.
///
/// `transform` keeps the input of every differencing stage so forecasts made on
/// the differenced scale can be integrated back onto the original one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Differencer {
    /// Order of regular differencing
    order: usize,
    /// Order of seasonal differencing
    seasonal_order: usize,
    /// Seasonal period
    seasonal_period: usize,
    /// (lag, stage input) for every applied stage, in application order
    stages: Vec<(usize, Vec<f64>)>,
    fitted: bool,
}

impl Differencer {
    /// Create a differencer with `order` regular differences
    pub fn new(order: usize) -> Self {
        Self {
            order,
            seasonal_order: 0,
            seasonal_period: 0,
            stages: Vec::new(),
            fitted: false,
        }
    }

    /// Add `seasonal_order` differences at lag `period`
    pub fn with_seasonal(mut self, seasonal_order: usize, period: usize) -> Self {
        self.seasonal_order = if period > 0 { seasonal_order } else { 0 };
        self.seasonal_period = period;
        self
    }

    /// Lags applied, seasonal stages first
    fn lags(&self) -> Vec<usize> {
        std::iter::repeat(self.seasonal_period)
            .take(self.seasonal_order)
            .chain(std::iter::repeat(1).take(self.order))
            .collect()
    }

    /// Number of observations consumed by differencing
    pub fn total_lag(&self) -> usize {
        self.order + self.seasonal_order * self.seasonal_period
    }

    /// Difference the series and remember each stage
    pub fn transform(&mut self, series: &[f64]) -> Result<Vec<f64>> {
        if series.len() <= self.total_lag() {
            return Err(ForecastError::DataError(format!(
                "{} observations cannot be differenced {} times",
                series.len(),
                self.total_lag()
            )));
        }

        let mut stages = Vec::new();
        let mut current = series.to_vec();
        for lag in self.lags() {
            let next: Vec<f64> = (lag..current.len())
                .map(|i| current[i] - current[i - lag])
                .collect();
            stages.push((lag, current));
            current = next;
        }

        self.stages = stages;
        self.fitted = true;
        Ok(current)
    }

    /// Integrate values that continue the differenced series back to the original scale
    pub fn integrate(&self, diffs: &[f64]) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(ForecastError::NotFitted);
        }

        let mut current = diffs.to_vec();
        for (lag, history) in self.stages.iter().rev() {
            let mut extended = history.clone();
            for &d in &current {
                let base = extended[extended.len() - lag];
                extended.push(d + base);
            }
            current = extended.split_off(history.len());
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_difference() {
        let mut diff = Differencer::new(1);
        let out = diff.transform(&[1.0, 3.0, 6.0, 10.0]).unwrap();
        assert_eq!(out, vec![2.0, 3.0, 4.0]);

        let future = diff.integrate(&[5.0, 6.0]).unwrap();
        assert_eq!(future, vec![15.0, 21.0]);
    }

    #[test]
    fn test_seasonal_and_regular() {
        let series: Vec<f64> = (0..24)
            .map(|i| i as f64 * 0.5 + [0.0, 3.0, -1.0, 2.0][i % 4])
            .collect();
        let mut diff = Differencer::new(1).with_seasonal(1, 4);
        let out = diff.transform(&series).unwrap();
        assert_eq!(out.len(), 24 - 5);
        // Linear trend plus fixed pattern vanishes entirely
        assert!(out.iter().all(|v| v.abs() < 1e-12));

        // Integrating zeros continues the pattern
        let future = diff.integrate(&[0.0; 4]).unwrap();
        for (k, v) in future.iter().enumerate() {
            let i = 24 + k;
            let expected = i as f64 * 0.5 + [0.0, 3.0, -1.0, 2.0][i % 4];
            assert!((v - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_identity_when_no_differencing() {
        let mut diff = Differencer::new(0);
        assert_eq!(diff.transform(&[1.0, 2.0]).unwrap(), vec![1.0, 2.0]);
        assert_eq!(diff.integrate(&[7.0]).unwrap(), vec![7.0]);
    }

    #[test]
    fn test_too_short() {
        let mut diff = Differencer::new(1).with_seasonal(1, 12);
        assert!(diff.transform(&[1.0; 13]).is_err());
        assert!(matches!(Differencer::new(1).integrate(&[1.0]), Err(ForecastError::NotFitted)));
    }
}
