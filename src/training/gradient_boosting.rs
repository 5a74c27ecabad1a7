//! Gradient boosting regressor
//!
//! Stochastic gradient boosting on squared error: each round fits a shallow
//! tree to the residuals of a row and column subsample, then shrinks its
//! output by the learning rate and adds it to the prediction of every row.

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::decision_tree::DecisionTree;
use crate::error::{ForecastError, Result};

/// Gradient boosting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingConfig {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Learning rate (shrinkage)
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Row subsample ratio per round
    pub subsample: f64,
    /// Column subsample ratio per round
    pub colsample_bytree: f64,
    pub random_state: u64,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            colsample_bytree: 1.0,
            random_state: 42,
        }
    }
}

impl GradientBoostingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ForecastError::invalid_param("learning_rate", self.learning_rate, "must be in (0, 1]"));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ForecastError::invalid_param("subsample", self.subsample, "must be in (0, 1]"));
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return Err(ForecastError::invalid_param(
                "colsample_bytree",
                self.colsample_bytree,
                "must be in (0, 1]",
            ));
        }
        if self.n_estimators == 0 {
            return Err(ForecastError::invalid_param("n_estimators", 0, "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Round {
    tree: DecisionTree,
    columns: Vec<usize>,
}

/// Gradient boosted regression trees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    config: GradientBoostingConfig,
    rounds: Vec<Round>,
    initial_prediction: f64,
    feature_importances: Option<Array1<f64>>,
}

impl GradientBoosting {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            rounds: Vec::new(),
            initial_prediction: 0.0,
            feature_importances: None,
        }
    }

    pub fn config(&self) -> &GradientBoostingConfig {
        &self.config
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.config.validate()?;
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(ForecastError::TrainingError(format!(
                "feature matrix has {} rows but target has {}",
                n_samples,
                y.len()
            )));
        }
        if n_samples == 0 || n_features == 0 {
            return Err(ForecastError::TrainingError(
                "cannot boost on an empty matrix".to_string(),
            ));
        }

        self.rounds.clear();
        self.initial_prediction = y.mean().unwrap_or(0.0);
        let mut predictions = Array1::from_elem(n_samples, self.initial_prediction);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let mut importances = vec![0.0; n_features];

        for round in 0..self.config.n_estimators {
            let residuals = y - &predictions;
            let rows = sample_indices(n_samples, self.config.subsample, &mut rng);
            let columns = sample_indices(n_features, self.config.colsample_bytree, &mut rng);

            let x_cols = x.select(Axis(1), &columns);
            let x_sub = x_cols.select(Axis(0), &rows);
            let y_sub = residuals.select(Axis(0), &rows);

            let mut tree = DecisionTree::new()
                .with_max_depth(self.config.max_depth)
                .with_min_samples_split(self.config.min_samples_split)
                .with_min_samples_leaf(self.config.min_samples_leaf)
                .with_random_state(self.config.random_state.wrapping_add(round as u64));
            tree.fit(&x_sub, &y_sub)?;

            // The tree was fitted on a subsample but updates every row
            let update = tree.predict(&x_cols)?;
            predictions.scaled_add(self.config.learning_rate, &update);

            if let Some(tree_importance) = tree.feature_importances() {
                for (&col, &imp) in columns.iter().zip(tree_importance.iter()) {
                    importances[col] += imp;
                }
            }
            self.rounds.push(Round { tree, columns });
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        self.feature_importances = Some(Array1::from_vec(importances));
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.rounds.is_empty() {
            return Err(ForecastError::NotFitted);
        }
        let mut predictions = Array1::from_elem(x.nrows(), self.initial_prediction);
        for round in &self.rounds {
            let x_sub = x.select(Axis(1), &round.columns);
            predictions.scaled_add(self.config.learning_rate, &round.tree.predict(&x_sub)?);
        }
        Ok(predictions)
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }
}

fn sample_indices(n: usize, ratio: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    if ratio < 1.0 {
        let size = ((n as f64) * ratio).ceil().max(1.0) as usize;
        indices.shuffle(rng);
        indices.truncate(size);
        indices.sort_unstable();
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((50, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y = Array1::from_shape_fn(50, |i| (i as f64 / 5.0).sin() * 10.0);
        (x, y)
    }

    fn mse(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / a.len() as f64
    }

    #[test]
    fn test_boosting_reduces_error() {
        let (x, y) = data();
        let baseline = Array1::from_elem(y.len(), y.mean().unwrap());

        let mut model = GradientBoosting::new(GradientBoostingConfig::default());
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        assert!(mse(&preds, &y) < 0.1 * mse(&baseline, &y));
    }

    #[test]
    fn test_subsampled_rounds_update_all_rows() {
        let (x, y) = data();
        let config = GradientBoostingConfig {
            subsample: 0.5,
            colsample_bytree: 0.5,
            n_estimators: 50,
            ..Default::default()
        };
        let mut model = GradientBoosting::new(config.clone());
        model.fit(&x, &y).unwrap();
        assert_eq!(model.n_rounds(), 50);

        let mut again = GradientBoosting::new(config);
        again.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap(), again.predict(&x).unwrap());

        let importances = model.feature_importances().unwrap();
        assert!((importances.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config() {
        let config = GradientBoostingConfig {
            learning_rate: 0.0,
            ..Default::default()
        };
        let mut model = GradientBoosting::new(config);
        let (x, y) = data();
        assert!(matches!(model.fit(&x, &y), Err(ForecastError::InvalidParameter { .. })));
        assert!(matches!(model.predict(&array![[1.0, 2.0]]), Err(ForecastError::NotFitted)));
    }
}
