//! Search space definition and declarative compilation
//!
//! A search space is compiled from a JSON description where each entry is
//! either a fixed value or a distribution:
//!
//! ```json
//! {
//!   "n_estimators": [50, 100, 200],
//!   "learning_rate": {"type": "loguniform", "min": 0.01, "max": 0.3},
//!   "max_depth": {"type": "randint", "min": 2, "max": 8},
//!   "trend": "c"
//! }
//! ```
//!
//! Lists are shorthand for `choice`. Scalars are fixed and never searched.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::training::HyperParams;

/// Domain of one searched parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterType {
    /// Inclusive integer range
    Int { low: i64, high: i64 },
    /// Continuous range, optionally sampled in log space
    Float { low: f64, high: f64, log: bool },
    /// Continuous range rounded to multiples of `q`
    Quantized { low: f64, high: f64, q: f64 },
    /// One of a list of literal values
    Categorical { choices: Vec<Value> },
}

/// Named parameter in a search space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParameterType,
}

/// Value drawn for one parameter in one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    /// Categorical draw: the index is sampler bookkeeping, the value is literal
    Choice { index: usize, value: Value },
}

impl ParameterValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Int(v) => Some(*v as f64),
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Choice { value, .. } => value.as_f64(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            ParameterValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            ParameterValue::Choice { value, .. } => value.as_i64(),
            _ => None,
        }
    }

    /// Literal JSON value
    pub fn to_value(&self) -> Value {
        match self {
            ParameterValue::Int(v) => Value::from(*v),
            ParameterValue::Float(v) => Value::from(*v),
            ParameterValue::Choice { value, .. } => value.clone(),
        }
    }
}

/// Parameter values of one trial, keyed by name
pub type TrialParams = BTreeMap<String, ParameterValue>;

/// Searched parameters plus the fixed values declared alongside them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    parameters: Vec<Parameter>,
    fixed: HyperParams,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int(self, name: &str, low: i64, high: i64) -> Self {
        self.add(name, ParameterType::Int { low, high })
    }

    pub fn float(self, name: &str, low: f64, high: f64) -> Self {
        self.add(name, ParameterType::Float { low, high, log: false })
    }

    pub fn log_float(self, name: &str, low: f64, high: f64) -> Self {
        self.add(name, ParameterType::Float { low, high, log: true })
    }

    pub fn quantized(self, name: &str, low: f64, high: f64, q: f64) -> Self {
        self.add(name, ParameterType::Quantized { low, high, q })
    }

    pub fn categorical(self, name: &str, choices: Vec<Value>) -> Self {
        self.add(name, ParameterType::Categorical { choices })
    }

    pub fn fixed(mut self, name: &str, value: Value) -> Self {
        self.fixed.insert(name.to_string(), value);
        self
    }

    fn add(mut self, name: &str, param_type: ParameterType) -> Self {
        self.parameters.retain(|p| p.name != name);
        self.parameters.push(Parameter {
            name: name.to_string(),
            param_type,
        });
        self
    }

    /// Compile a declarative description.
    ///
    /// Malformed or unsupported entries are skipped with a warning, so the
    /// result may search fewer parameters than were described.
    pub fn from_config(config: &Value) -> Self {
        let mut space = Self::new();
        let Some(entries) = config.as_object() else {
            if !config.is_null() {
                warn!("Search space must be an object, ignoring it");
            }
            return space;
        };

        for (name, entry) in entries {
            match compile_entry(entry) {
                Ok(Entry::Searched(param_type)) => space = space.add(name, param_type),
                Ok(Entry::Fixed(value)) => space = space.fixed(name, value),
                Err(reason) => warn!(param = %name, reason = %reason, "Skipping search space entry"),
            }
        }
        space
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn fixed_values(&self) -> &HyperParams {
        &self.fixed
    }

    /// True when nothing is searched
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Draw every parameter uniformly from its domain
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TrialParams {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.param_type.sample(rng)))
            .collect()
    }

    /// Literal hyperparameters for a trial
    pub fn resolve(&self, params: &TrialParams) -> HyperParams {
        params.iter().map(|(k, v)| (k.clone(), v.to_value())).collect()
    }
}

impl ParameterType {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        match self {
            ParameterType::Int { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
            ParameterType::Float { low, high, log: false } => ParameterValue::Float(rng.gen_range(*low..=*high)),
            ParameterType::Float { low, high, log: true } => {
                ParameterValue::Float(rng.gen_range(low.ln()..=high.ln()).exp())
            }
            ParameterType::Quantized { low, high, q } => {
                ParameterValue::Float(self.quantize(rng.gen_range(*low..=*high), *q))
            }
            ParameterType::Categorical { choices } => {
                let index = rng.gen_range(0..choices.len());
                ParameterValue::Choice {
                    index,
                    value: choices[index].clone(),
                }
            }
        }
    }

    /// Snap `x` to the multiples of `q` inside the bounds
    fn quantize(&self, x: f64, q: f64) -> f64 {
        match self {
            ParameterType::Quantized { low, high, .. } => {
                let (grid_low, grid_high) = ((low / q).ceil() * q, (high / q).floor() * q);
                if grid_low > grid_high {
                    return x.clamp(*low, *high);
                }
                ((x.clamp(grid_low, grid_high) / q).round() * q).clamp(grid_low, grid_high)
            }
            _ => x,
        }
    }

    /// Map a numeric coordinate back into a value of this domain
    pub(crate) fn from_numeric(&self, x: f64) -> Option<ParameterValue> {
        match self {
            ParameterType::Int { low, high } => Some(ParameterValue::Int((x.round() as i64).clamp(*low, *high))),
            ParameterType::Float { low, high, log } => {
                let v = if *log { x.exp() } else { x };
                Some(ParameterValue::Float(v.clamp(*low, *high)))
            }
            ParameterType::Quantized { q, .. } => Some(ParameterValue::Float(self.quantize(x, *q))),
            ParameterType::Categorical { .. } => None,
        }
    }

    /// Numeric coordinate of a value, in the space its prior is uniform over
    pub(crate) fn to_numeric(&self, value: &ParameterValue) -> Option<f64> {
        let x = value.as_float()?;
        match self {
            ParameterType::Float { log: true, .. } => (x > 0.0).then(|| x.ln()),
            ParameterType::Categorical { .. } => None,
            _ => Some(x),
        }
    }

    /// Numeric bounds matching [`to_numeric`](Self::to_numeric)
    pub(crate) fn numeric_bounds(&self) -> Option<(f64, f64)> {
        match self {
            ParameterType::Int { low, high } => Some((*low as f64, *high as f64)),
            ParameterType::Float { low, high, log: false } => Some((*low, *high)),
            ParameterType::Float { low, high, log: true } => Some((low.ln(), high.ln())),
            ParameterType::Quantized { low, high, .. } => Some((*low, *high)),
            ParameterType::Categorical { .. } => None,
        }
    }
}

enum Entry {
    Searched(ParameterType),
    Fixed(Value),
}

fn compile_entry(entry: &Value) -> Result<Entry, String> {
    match entry {
        Value::Array(items) => categorical(items).map(Entry::Searched),
        Value::Object(dist) => {
            let kind = dist
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| "distribution object without a 'type'".to_string())?;
            compile_distribution(kind, dist).map(Entry::Searched)
        }
        scalar => Ok(Entry::Fixed(scalar.clone())),
    }
}

fn compile_distribution(kind: &str, dist: &Map<String, Value>) -> Result<ParameterType, String> {
    match kind.to_ascii_lowercase().as_str() {
        "randint" => {
            let low = int_field(dist, "min")?;
            let high = int_field(dist, "max")?;
            if low > high {
                return Err(format!("randint min {} exceeds max {}", low, high));
            }
            Ok(ParameterType::Int { low, high })
        }
        "uniform" => {
            let (low, high) = float_bounds(dist, "min", "max")?;
            Ok(ParameterType::Float { low, high, log: false })
        }
        "loguniform" => {
            let (low, high) = if dist.contains_key("min") || dist.contains_key("max") {
                let (low, high) = float_bounds(dist, "min", "max")?;
                if low <= 0.0 {
                    return Err(format!("loguniform min {} must be positive", low));
                }
                (low, high)
            } else {
                // Natural-log bounds
                let (low, high) = float_bounds(dist, "low", "high")?;
                (low.exp(), high.exp())
            };
            Ok(ParameterType::Float { low, high, log: true })
        }
        "quniform" => {
            let (low, high) = float_bounds(dist, "min", "max")?;
            let q = float_field(dist, "q")?;
            if q <= 0.0 {
                return Err(format!("quniform q {} must be positive", q));
            }
            if (low / q).ceil() > (high / q).floor() {
                return Err(format!("quniform range [{}, {}] holds no multiple of {}", low, high, q));
            }
            Ok(ParameterType::Quantized { low, high, q })
        }
        "choice" => {
            let items = ["choices", "choice", "options"]
                .iter()
                .find_map(|key| dist.get(*key).and_then(Value::as_array))
                .ok_or_else(|| "choice needs a 'choices' list".to_string())?;
            categorical(items)
        }
        "choice_list" => {
            let items = dist
                .get("choices")
                .and_then(Value::as_array)
                .ok_or_else(|| "choice_list needs a 'choices' list".to_string())?;
            if items.iter().any(|item| !item.is_array()) {
                return Err("choice_list choices must all be lists".to_string());
            }
            categorical(items)
        }
        other => Err(format!("unsupported distribution type '{}'", other)),
    }
}

fn categorical(items: &[Value]) -> Result<ParameterType, String> {
    if items.is_empty() {
        return Err("empty choice list".to_string());
    }
    Ok(ParameterType::Categorical {
        choices: items.iter().map(literal).collect(),
    })
}

/// `"none"`, `"true"` and `"false"` in any case become their JSON literals
fn literal(value: &Value) -> Value {
    match value {
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "none" | "null" => Value::Null,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn float_field(dist: &Map<String, Value>, key: &str) -> Result<f64, String> {
    dist.get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("missing numeric '{}'", key))
}

fn int_field(dist: &Map<String, Value>, key: &str) -> Result<i64, String> {
    let v = float_field(dist, key)?;
    if v.fract() != 0.0 {
        return Err(format!("'{}' must be an integer, got {}", key, v));
    }
    Ok(v as i64)
}

fn float_bounds(dist: &Map<String, Value>, low_key: &str, high_key: &str) -> Result<(f64, f64), String> {
    let low = float_field(dist, low_key)?;
    let high = float_field(dist, high_key)?;
    if low >= high {
        return Err(format!("{} {} must be below {} {}", low_key, low, high_key, high));
    }
    Ok((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use serde_json::json;

    #[test]
    fn test_compile_declarative_space() {
        let space = SearchSpace::from_config(&json!({
            "n_estimators": [50, 100],
            "lr": {"type": "loguniform", "min": 0.01, "max": 0.3},
            "cps": {"type": "loguniform", "low": -4.0, "high": 1.0},
            "depth": {"type": "randint", "min": 2, "max": 4},
            "sub": {"type": "uniform", "min": 0.5, "max": 1.0},
            "q": {"type": "quniform", "min": 10, "max": 50, "q": 10},
            "mode": {"type": "choice", "options": ["additive", "multiplicative"]},
            "max_depth": {"type": "choice", "choices": [3, "None"]},
            "order": {"type": "choice_list", "choices": [[1, 1, 1], [2, 1, 0]]},
            "trend": "c"
        }));

        assert_eq!(space.len(), 9);
        assert_eq!(space.fixed_values().get("trend"), Some(&json!("c")));

        let cps = space.parameters().iter().find(|p| p.name == "cps").unwrap();
        match &cps.param_type {
            ParameterType::Float { low, high, log } => {
                assert!(*log);
                assert!((low - (-4.0f64).exp()).abs() < 1e-12);
                assert!((high - 1.0f64.exp()).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }

        let depth = space.parameters().iter().find(|p| p.name == "max_depth").unwrap();
        assert_eq!(
            depth.param_type,
            ParameterType::Categorical {
                choices: vec![json!(3), Value::Null]
            }
        );
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let space = SearchSpace::from_config(&json!({
            "a": {"type": "gaussian", "mu": 0},
            "b": {"type": "uniform", "min": 2.0, "max": 1.0},
            "c": {"type": "loguniform", "min": 0.0, "max": 1.0},
            "d": [],
            "e": {"min": 1},
            "f": {"type": "randint", "min": 1, "max": 3}
        }));
        assert_eq!(space.len(), 1);
        assert_eq!(space.parameters()[0].name, "f");

        assert!(SearchSpace::from_config(&json!({"trend": "c"})).is_empty());
        assert!(SearchSpace::from_config(&json!([1, 2])).is_empty());
    }

    #[test]
    fn test_samples_stay_in_bounds() {
        let space = SearchSpace::new()
            .int("n", 1, 3)
            .log_float("lr", 0.001, 0.1)
            .quantized("q", 10.0, 50.0, 10.0)
            .categorical("c", vec![json!("a"), json!("b")]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);

        for _ in 0..200 {
            let params = space.sample(&mut rng);
            let n = params["n"].as_int().unwrap();
            assert!((1..=3).contains(&n));
            let lr = params["lr"].as_float().unwrap();
            assert!((0.001..=0.1).contains(&lr));
            let q = params["q"].as_float().unwrap();
            assert_eq!(q % 10.0, 0.0);

            let resolved = space.resolve(&params);
            assert!(resolved["c"] == json!("a") || resolved["c"] == json!("b"));
        }
    }

    #[test]
    fn test_quantized_bounds_off_grid() {
        let param = ParameterType::Quantized { low: 3.0, high: 17.0, q: 5.0 };
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(8);
        for _ in 0..200 {
            let v = param.sample(&mut rng).as_float().unwrap();
            assert!([5.0, 10.0, 15.0].contains(&v), "{}", v);
        }
        // Edges round onto the nearest in-range multiple
        assert_eq!(param.from_numeric(3.0).unwrap().as_float(), Some(5.0));
        assert_eq!(param.from_numeric(17.0).unwrap().as_float(), Some(15.0));

        let space = SearchSpace::from_config(&json!({"q": {"type": "quniform", "min": 1.2, "max": 1.8, "q": 1}}));
        assert!(space.is_empty());
    }
}
