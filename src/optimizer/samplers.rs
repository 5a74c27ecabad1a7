//! Sampling strategies for hyperparameter optimization

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_distr::Normal;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::search_space::{ParameterType, ParameterValue, SearchSpace, TrialParams};

/// Seed used when a search is not given one
pub const DEFAULT_SEED: u64 = 2025;

/// Type of sampler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerType {
    /// Random sampling
    Random,
    /// Tree-structured Parzen Estimator
    TPE,
}

/// Trait for hyperparameter samplers
pub trait Sampler: Send + Sync {
    /// Sample the next set of hyperparameters.
    ///
    /// `history` holds finite losses only, in evaluation order.
    fn sample(&mut self, search_space: &SearchSpace, history: &[(TrialParams, f64)]) -> TrialParams;
}

/// Random sampler
#[derive(Debug)]
pub struct RandomSampler {
    rng: Xoshiro256PlusPlus,
}

impl RandomSampler {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed.unwrap_or(DEFAULT_SEED)),
        }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, search_space: &SearchSpace, _history: &[(TrialParams, f64)]) -> TrialParams {
        search_space.sample(&mut self.rng)
    }
}

/// Tree-structured Parzen Estimator sampler.
///
/// Past trials are split at the `gamma` quantile of their loss into a good
/// and a bad group. Each parameter gets a density per group, candidates are
/// drawn from the good density, and the candidate maximizing l(x)/g(x) wins.
/// Parameters are treated independently.
#[derive(Debug)]
pub struct TPESampler {
    rng: Xoshiro256PlusPlus,
    n_startup_trials: usize,
    gamma: f64,
    n_candidates: usize,
}

impl TPESampler {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed.unwrap_or(DEFAULT_SEED)),
            n_startup_trials: 10,
            gamma: 0.25,
            n_candidates: 24,
        }
    }

    /// Set number of startup trials
    pub fn with_n_startup(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    /// Set gamma (quantile for splitting good/bad)
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n.max(1);
        self
    }

    fn sample_numeric(&mut self, param_type: &ParameterType, good: &[f64], bad: &[f64]) -> Option<ParameterValue> {
        let (low, high) = param_type.numeric_bounds()?;
        let width = high - low;
        if width <= 0.0 {
            return param_type.from_numeric(low);
        }
        let l = Parzen::new(good, low, high);
        let g = Parzen::new(bad, low, high);

        let mut best: Option<(f64, f64)> = None;
        for _ in 0..self.n_candidates {
            let x = l.draw(&mut self.rng);
            let score = l.log_density(x) - g.log_density(x);
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, x));
            }
        }
        best.and_then(|(_, x)| param_type.from_numeric(x))
    }

    fn sample_categorical(&mut self, choices: &[serde_json::Value], good: &[usize], bad: &[usize]) -> Option<ParameterValue> {
        let k = choices.len();
        let weights = |group: &[usize]| {
            let mut counts = vec![1.0; k];
            for &idx in group.iter().filter(|&&i| i < k) {
                counts[idx] += 1.0;
            }
            let total: f64 = counts.iter().sum();
            counts.into_iter().map(|c| c / total).collect::<Vec<f64>>()
        };
        let p_good = weights(good);
        let p_bad = weights(bad);
        let dist = WeightedIndex::new(&p_good).ok()?;

        let mut best: Option<(f64, usize)> = None;
        for _ in 0..self.n_candidates {
            let idx = dist.sample(&mut self.rng);
            let score = p_good[idx] / p_bad[idx];
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, idx));
            }
        }
        best.map(|(_, index)| ParameterValue::Choice {
            index,
            value: choices[index].clone(),
        })
    }
}

impl Sampler for TPESampler {
    fn sample(&mut self, search_space: &SearchSpace, history: &[(TrialParams, f64)]) -> TrialParams {
        if history.len() < self.n_startup_trials.max(2) {
            return search_space.sample(&mut self.rng);
        }

        // Stable sort keeps evaluation order among equal losses
        let mut order: Vec<usize> = (0..history.len()).collect();
        order.sort_by(|&a, &b| history[a].1.total_cmp(&history[b].1));
        let n_good = ((history.len() as f64 * self.gamma).ceil() as usize).clamp(1, history.len() - 1);
        let (good_idx, bad_idx) = order.split_at(n_good);

        let mut params = TrialParams::new();
        for param in search_space.parameters() {
            let collect = |idx: &[usize]| -> Vec<&ParameterValue> {
                idx.iter().filter_map(|&i| history[i].0.get(&param.name)).collect()
            };
            let (good, bad) = (collect(good_idx), collect(bad_idx));

            let value = match &param.param_type {
                ParameterType::Categorical { choices } => {
                    let index_of = |v: &&ParameterValue| match v {
                        ParameterValue::Choice { index, .. } => Some(*index),
                        _ => None,
                    };
                    let good: Vec<usize> = good.iter().filter_map(index_of).collect();
                    let bad: Vec<usize> = bad.iter().filter_map(index_of).collect();
                    self.sample_categorical(choices, &good, &bad)
                }
                numeric => {
                    let good: Vec<f64> = good.iter().filter_map(|v| numeric.to_numeric(v)).collect();
                    let bad: Vec<f64> = bad.iter().filter_map(|v| numeric.to_numeric(v)).collect();
                    self.sample_numeric(numeric, &good, &bad)
                }
            };
            let value = value.unwrap_or_else(|| param.param_type.sample(&mut self.rng));
            params.insert(param.name.clone(), value);
        }
        params
    }
}

/// Gaussian mixture over observed points plus a uniform prior component
struct Parzen {
    centers: Vec<f64>,
    sigma: f64,
    low: f64,
    high: f64,
}

impl Parzen {
    fn new(points: &[f64], low: f64, high: f64) -> Self {
        let width = high - low;
        let n = points.len().max(1) as f64;
        Self {
            centers: points.iter().map(|p| p.clamp(low, high)).collect(),
            sigma: (width * n.powf(-0.2) * 0.5).max(width * 1e-3),
            low,
            high,
        }
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        // Component 0 is the prior
        let component = rng.gen_range(0..=self.centers.len());
        if component == 0 {
            return rng.gen_range(self.low..=self.high);
        }
        match Normal::new(self.centers[component - 1], self.sigma) {
            Ok(normal) => normal.sample(rng).clamp(self.low, self.high),
            Err(_) => self.centers[component - 1],
        }
    }

    fn log_density(&self, x: f64) -> f64 {
        let prior = 1.0 / (self.high - self.low);
        let norm = 1.0 / (self.sigma * (2.0 * std::f64::consts::PI).sqrt());
        let kernels: f64 = self
            .centers
            .iter()
            .map(|c| norm * (-0.5 * ((x - c) / self.sigma).powi(2)).exp())
            .sum();
        ((prior + kernels) / (self.centers.len() + 1) as f64).max(f64::MIN_POSITIVE).ln()
    }
}

/// Create a sampler from type
pub fn create_sampler(sampler_type: SamplerType, seed: Option<u64>, n_startup_trials: usize) -> Box<dyn Sampler> {
    match sampler_type {
        SamplerType::Random => Box::new(RandomSampler::new(seed)),
        SamplerType::TPE => Box::new(TPESampler::new(seed).with_n_startup(n_startup_trials)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn history_for(space: &SearchSpace, n: usize, loss: impl Fn(&TrialParams) -> f64) -> Vec<(TrialParams, f64)> {
        let mut sampler = RandomSampler::new(Some(5));
        (0..n)
            .map(|_| {
                let p = sampler.sample(space, &[]);
                let l = loss(&p);
                (p, l)
            })
            .collect()
    }

    #[test]
    fn test_random_sampler_seeded() {
        let space = SearchSpace::new().float("lr", 0.001, 0.1).int("n", 10, 100);
        let mut a = RandomSampler::new(Some(42));
        let mut b = RandomSampler::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.sample(&space, &[]), b.sample(&space, &[]));
        }
    }

    #[test]
    fn test_tpe_concentrates_near_optimum() {
        let space = SearchSpace::new().float("x", -10.0, 10.0);
        let loss = |p: &TrialParams| (p["x"].as_float().unwrap() - 3.0).powi(2);
        let history = history_for(&space, 40, loss);

        let mut sampler = TPESampler::new(Some(7));
        let mean_distance: f64 = (0..30)
            .map(|_| (sampler.sample(&space, &history)["x"].as_float().unwrap() - 3.0).abs())
            .sum::<f64>()
            / 30.0;
        // Uniform draws on [-10, 10] average about 6.5 away from 3
        assert!(mean_distance < 4.0, "mean distance {}", mean_distance);
    }

    #[test]
    fn test_tpe_prefers_good_category() {
        let space = SearchSpace::new().categorical("mode", vec![json!("a"), json!("b"), json!("c")]);
        let loss = |p: &TrialParams| if p["mode"].to_value() == json!("b") { 0.0 } else { 1.0 };
        let history = history_for(&space, 30, loss);

        let mut sampler = TPESampler::new(None);
        let picks_b = (0..20)
            .filter(|_| sampler.sample(&space, &history)["mode"].to_value() == json!("b"))
            .count();
        assert!(picks_b >= 15, "picked b {} times", picks_b);
    }

    #[test]
    fn test_tpe_startup_is_random_and_in_bounds() {
        let space = SearchSpace::new().log_float("lr", 0.001, 0.1).int("n", 1, 5);
        let history = history_for(&space, 12, |p| p["n"].as_float().unwrap());
        let mut sampler = TPESampler::new(Some(1)).with_n_startup(5);
        for _ in 0..20 {
            let p = sampler.sample(&space, &history);
            assert!((0.001..=0.1).contains(&p["lr"].as_float().unwrap()));
            assert!((1..=5).contains(&p["n"].as_int().unwrap()));
        }
    }
}
