//! Regression tree used by the ensemble learners

use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with the mean target of its samples
    Leaf { value: f64, n_samples: usize },
    /// Internal node; samples with `x[feature_idx] <= threshold` go left
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

/// Variance-reduction regression tree.
///
/// With `max_features` set, each split considers a random feature subset
/// drawn from a generator seeded by `random_state`, so fits are reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split (all when `None`)
    pub max_features: Option<usize>,
    pub random_state: u64,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Best split found for one feature: (feature, threshold, weighted SSE reduction)
type Candidate = (usize, f64, f64);

impl DecisionTree {
    pub fn new() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            random_state: 0,
            n_features: 0,
            feature_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
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

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features.max(1));
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit the tree to training data
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
        if n_samples == 0 || n_features == 0 {
            return Err(ForecastError::TrainingError(
                "cannot fit a tree on an empty matrix".to_string(),
            ));
        }

        self.n_features = n_features;
        let mut importances = vec![0.0; n_features];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.random_state);

        let indices: Vec<usize> = (0..n_samples).collect();
        let root = self.build_tree(x, y, &indices, 0, &mut importances, &mut rng);
        self.root = Some(root);

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|imp| *imp /= total);
        }
        self.feature_importances = Some(Array1::from_vec(importances));

        Ok(self)
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        depth: usize,
        importances: &mut [f64],
        rng: &mut Xoshiro256PlusPlus,
    ) -> TreeNode {
        let n_samples = indices.len();
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / n_samples as f64;

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || indices.iter().all(|&i| (y[i] - mean).abs() < 1e-12);
        if should_stop {
            return TreeNode::Leaf { value: mean, n_samples };
        }

        let features = self.candidate_features(rng);
        let Some((feature_idx, threshold, gain)) = self.find_best_split(x, y, indices, &features) else {
            return TreeNode::Leaf { value: mean, n_samples };
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| x[[i, feature_idx]] <= threshold);
        if left_idx.len() < self.min_samples_leaf || right_idx.len() < self.min_samples_leaf {
            return TreeNode::Leaf { value: mean, n_samples };
        }

        importances[feature_idx] += gain;

        let left = Box::new(self.build_tree(x, y, &left_idx, depth + 1, importances, rng));
        let right = Box::new(self.build_tree(x, y, &right_idx, depth + 1, importances, rng));
        TreeNode::Split {
            feature_idx,
            threshold,
            left,
            right,
            n_samples,
        }
    }

    fn candidate_features(&self, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        let mut features: Vec<usize> = (0..self.n_features).collect();
        if let Some(k) = self.max_features.filter(|&k| k < self.n_features) {
            features.shuffle(rng);
            features.truncate(k);
            features.sort_unstable();
        }
        features
    }

    /// Scan each candidate feature in sorted order with running sums
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        features: &[usize],
    ) -> Option<Candidate> {
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let parent_sse = total_sq - total_sum * total_sum / n as f64;
        let min_leaf = self.min_samples_leaf;

        features
            .par_iter()
            .filter_map(|&feature_idx| {
                let mut order: Vec<usize> = indices.to_vec();
                order.sort_by(|&a, &b| x[[a, feature_idx]].total_cmp(&x[[b, feature_idx]]));

                let mut best: Option<(f64, f64)> = None;
                let (mut left_sum, mut left_sq) = (0.0, 0.0);
                for k in 0..n - 1 {
                    let yi = y[order[k]];
                    left_sum += yi;
                    left_sq += yi * yi;

                    let left_n = k + 1;
                    let right_n = n - left_n;
                    if left_n < min_leaf || right_n < min_leaf {
                        continue;
                    }
                    let (here, next) = (x[[order[k], feature_idx]], x[[order[k + 1], feature_idx]]);
                    if here == next {
                        continue;
                    }

                    let right_sum = total_sum - left_sum;
                    let right_sq = total_sq - left_sq;
                    let sse = (left_sq - left_sum * left_sum / left_n as f64)
                        + (right_sq - right_sum * right_sum / right_n as f64);
                    let gain = parent_sse - sse;
                    if gain > best.map_or(1e-12, |(g, _)| g) {
                        best = Some((gain, (here + next) / 2.0));
                    }
                }
                best.map(|(gain, threshold)| (feature_idx, threshold, gain))
            })
            .collect::<Vec<Candidate>>()
            .into_iter()
            // Lowest feature index wins ties so results do not depend on scheduling
            .fold(None, |acc: Option<Candidate>, cand| match acc {
                Some(best) if best.2 >= cand.2 => Some(best),
                _ => Some(cand),
            })
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(ForecastError::NotFitted)?;
        if x.ncols() != self.n_features {
            return Err(ForecastError::EvaluationError(format!(
                "tree was fitted on {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        Ok(x.rows().into_iter().map(|row| predict_row(root, &row)).collect())
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.root.as_ref().map_or(0, node_depth)
    }

    pub fn n_leaves(&self) -> usize {
        self.root.as_ref().map_or(0, count_leaves)
    }
}

fn predict_row(node: &TreeNode, sample: &ArrayView1<f64>) -> f64 {
    match node {
        TreeNode::Leaf { value, .. } => *value,
        TreeNode::Split {
            feature_idx,
            threshold,
            left,
            right,
            ..
        } => {
            if sample[*feature_idx] <= *threshold {
                predict_row(left, sample)
            } else {
                predict_row(right, sample)
            }
        }
    }
}

fn node_depth(node: &TreeNode) -> usize {
    match node {
        TreeNode::Leaf { .. } => 1,
        TreeNode::Split { left, right, .. } => 1 + node_depth(left).max(node_depth(right)),
    }
}

fn count_leaves(node: &TreeNode) -> usize {
    match node {
        TreeNode::Leaf { .. } => 1,
        TreeNode::Split { left, right, .. } => count_leaves(left) + count_leaves(right),
    }
}
