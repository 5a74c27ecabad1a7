//! Random forest regressor

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::decision_tree::DecisionTree;
use crate::error::{ForecastError, Result};

/// Strategy for features considered per split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    /// Square root of n_features
    Sqrt,
    /// Log2 of n_features
    Log2,
    /// Fraction of n_features
    Fraction(f64),
    /// All features
    All,
}

impl MaxFeatures {
    /// Parse `sqrt`, `log2`, `all`/`auto`, or a fraction in (0, 1]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(MaxFeatures::All),
            Value::String(s) => match s.to_lowercase().as_str() {
                "sqrt" => Some(MaxFeatures::Sqrt),
                "log2" => Some(MaxFeatures::Log2),
                "all" | "auto" | "none" => Some(MaxFeatures::All),
                other => other.parse::<f64>().ok().and_then(Self::fraction),
            },
            Value::Number(n) => n.as_f64().and_then(Self::fraction),
            _ => None,
        }
    }

    fn fraction(f: f64) -> Option<Self> {
        if f > 0.0 && f <= 1.0 {
            Some(MaxFeatures::Fraction(f))
        } else {
            None
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            MaxFeatures::Sqrt => json!("sqrt"),
            MaxFeatures::Log2 => json!("log2"),
            MaxFeatures::Fraction(f) => json!(f),
            MaxFeatures::All => json!("all"),
        }
    }

    fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        match self {
            MaxFeatures::Sqrt => n.sqrt().ceil() as usize,
            MaxFeatures::Log2 => n.log2().ceil() as usize,
            MaxFeatures::Fraction(f) => (n * f).ceil() as usize,
            MaxFeatures::All => n_features,
        }
        .clamp(1, n_features.max(1))
    }
}

/// Bagged regression trees fitted in parallel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: u64,
    feature_importances: Option<Array1<f64>>,
    n_features: usize,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RandomForest {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators: n_estimators.max(1),
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            random_state: 42,
            feature_importances: None,
            n_features: 0,
        }
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit the forest to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(ForecastError::TrainingError(format!(
                "feature matrix has {} rows but target has {}",
                n_samples,
                y.len()
            )));
        }
        if n_samples == 0 {
            return Err(ForecastError::TrainingError(
                "cannot fit a forest on an empty matrix".to_string(),
            ));
        }

        self.n_features = n_features;
        let max_features = self.max_features.resolve(n_features);
        let base_seed = self.random_state;

        // Each tree owns its seed, so the result is independent of thread scheduling
        let trees: Result<Vec<DecisionTree>> = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let seed = base_seed.wrapping_add(tree_idx as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(seed);

                let sample_indices: Vec<usize> = if self.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                let x_boot = x.select(Axis(0), &sample_indices);
                let y_boot = y.select(Axis(0), &sample_indices);

                let mut tree = DecisionTree::new()
                    .with_min_samples_split(self.min_samples_split)
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_max_features(max_features)
                    .with_random_state(seed);
                if let Some(d) = self.max_depth {
                    tree = tree.with_max_depth(d);
                }
                tree.fit(&x_boot, &y_boot)?;
                Ok(tree)
            })
            .collect();

        self.trees = trees?;
        self.compute_feature_importances();
        Ok(self)
    }

    fn compute_feature_importances(&mut self) {
        let mut total = vec![0.0; self.n_features];
        for imp in self.trees.iter().filter_map(|t| t.feature_importances()) {
            for (acc, v) in total.iter_mut().zip(imp.iter()) {
                *acc += v;
            }
        }
        let sum: f64 = total.iter().sum();
        if sum > 0.0 {
            total.iter_mut().for_each(|v| *v /= sum);
        }
        self.feature_importances = Some(Array1::from_vec(total));
    }

    /// Mean prediction over all trees
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(ForecastError::NotFitted);
        }

        let per_tree: Vec<Array1<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<Result<_>>()?;

        let mut sum = Array1::zeros(x.nrows());
        for preds in &per_tree {
            sum += preds;
        }
        Ok(sum / per_tree.len() as f64)
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        let n = 60;
        let x = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => i as f64,
            1 => ((i * 7) % 5) as f64,
            _ => 1.0,
        });
        let y = Array1::from_shape_fn(n, |i| 2.0 * i as f64);
        (x, y)
    }

    #[test]
    fn test_regressor_fits() {
        let (x, y) = linear_data();
        let mut forest = RandomForest::new(20).with_max_features(MaxFeatures::All);
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.n_trees(), 20);

        let preds = forest.predict(&x).unwrap();
        let mae: f64 = preds.iter().zip(y.iter()).map(|(p, a)| (p - a).abs()).sum::<f64>() / y.len() as f64;
        assert!(mae < 5.0, "mae {}", mae);
    }

    #[test]
    fn test_seeded_determinism() {
        let (x, y) = linear_data();
        let mut a = RandomForest::new(10).with_random_state(7);
        let mut b = RandomForest::new(10).with_random_state(7);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_feature_importances() {
        let (x, y) = linear_data();
        let mut forest = RandomForest::new(10).with_max_features(MaxFeatures::All);
        forest.fit(&x, &y).unwrap();

        let importances = forest.feature_importances().unwrap();
        assert!((importances.sum() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
        assert_eq!(importances[2], 0.0);
    }

    #[test]
    fn test_max_features_parsing() {
        assert_eq!(MaxFeatures::from_value(&json!("sqrt")), Some(MaxFeatures::Sqrt));
        assert_eq!(MaxFeatures::from_value(&json!("0.5")), Some(MaxFeatures::Fraction(0.5)));
        assert_eq!(MaxFeatures::from_value(&json!(1.0)), Some(MaxFeatures::Fraction(1.0)));
        assert_eq!(MaxFeatures::from_value(&json!(2.5)), None);
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
    }

    #[test]
    fn test_not_fitted() {
        let forest = RandomForest::default();
        assert!(matches!(forest.predict(&array![[1.0]]), Err(ForecastError::NotFitted)));
    }
}
