use std::fmt;

use log::warn;
use serde_json::Value;

use crate::error::{BatchError, Result};
use crate::schema;

/// A single parameter value, typed once at sweep-expansion time.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    fn from_json(v: &Value) -> Result<ParamValue> {
        match v {
            Value::String(s) => Ok(ParamValue::Str(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ParamValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ParamValue::Float(f))
                } else {
                    Err(BatchError::Config(format!("unrepresentable number: {n}")))
                }
            }
            other => Err(BatchError::Config(format!(
                "parameter values must be strings or numbers, found: {other}"
            ))),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{s}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Ordered parameter mapping for one job. Key order is the run's fixed
/// key-column order: `replicate` first, then the declared parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    pairs: Vec<(String, ParamValue)>,
}

impl ParamSet {
    pub fn new(pairs: Vec<(String, ParamValue)>) -> Self {
        ParamSet { pairs }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &ParamValue> {
        self.pairs.iter().map(|(_, v)| v)
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Serialized form carried in start/stop log events: `k=v, k=v`.
    pub fn serialized(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Parsed sweep specification: declared parameters in order, each with its
/// candidate-value list, plus the replicate list.
#[derive(Debug, Clone)]
pub struct SweepSpec {
    params: Vec<(String, Vec<ParamValue>)>,
    pub replicates: Vec<ParamValue>,
}

impl SweepSpec {
    /// Parses the sweep-specification document.
    ///
    /// The top level must be an object with a `fio` object mapping parameter
    /// names to a value or list of values; scalars are coerced to singleton
    /// lists. Replicates come from `replicates` (integer, expanded to 1..=N)
    /// or `replicate` (scalar or list); `replicates` wins if both are given.
    pub fn from_json(root: &Value) -> Result<SweepSpec> {
        let obj = root.as_object().ok_or_else(|| {
            BatchError::Config("top level of the parameter file must be an object".into())
        })?;

        let fio = obj
            .get("fio")
            .ok_or_else(|| BatchError::Config("missing 'fio' object in parameter file".into()))?
            .as_object()
            .ok_or_else(|| BatchError::Config("'fio' must be an object".into()))?;

        let mut params = Vec::with_capacity(fio.len());
        for (name, value) in fio {
            if schema::is_terse_column(name) {
                warn!("Parameter {name} conflicts with a fio column. Consider renaming");
            }
            // Coerce scalars to singleton lists
            let candidates = match value {
                Value::Array(items) => items
                    .iter()
                    .map(ParamValue::from_json)
                    .collect::<Result<Vec<_>>>()?,
                scalar => vec![ParamValue::from_json(scalar)?],
            };
            params.push((name.clone(), candidates));
        }

        let replicates = match (obj.get("replicates"), obj.get("replicate")) {
            (Some(n), other) => {
                if other.is_some() {
                    warn!("Both 'replicates' and 'replicate' specified. Using 'replicates' value");
                }
                let n = n
                    .as_i64()
                    .filter(|&n| n >= 0)
                    .ok_or_else(|| BatchError::Config("'replicates' must be an integer".into()))?;
                (1..=n).map(ParamValue::Int).collect()
            }
            (None, Some(Value::Array(items))) => items
                .iter()
                .map(ParamValue::from_json)
                .collect::<Result<Vec<_>>>()?,
            (None, Some(scalar)) => vec![ParamValue::from_json(scalar)?],
            (None, None) => {
                return Err(BatchError::Config(
                    "parameter file needs 'replicates' or 'replicate'".into(),
                ))
            }
        };

        Ok(SweepSpec { params, replicates })
    }

    /// Declared parameter names in their fixed order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(k, _)| k.as_str())
    }

    /// Cartesian product of all candidate lists, in key order. An empty
    /// candidate list for any parameter makes the sweep empty.
    pub fn combinations(&self) -> Vec<Vec<ParamValue>> {
        let mut combos: Vec<Vec<ParamValue>> = vec![Vec::new()];
        for (_, candidates) in &self.params {
            let mut next = Vec::with_capacity(combos.len() * candidates.len());
            for combo in &combos {
                for value in candidates {
                    let mut extended = combo.clone();
                    extended.push(value.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }
        // A parameter with no candidates leaves only incomplete combinations
        if combos.first().map(Vec::len) != Some(self.params.len()) {
            return Vec::new();
        }
        combos
    }

    /// Parameter mappings for one replicate, `replicate` entry first.
    pub fn param_sets(&self, replicate: &ParamValue) -> Vec<ParamSet> {
        self.combinations()
            .into_iter()
            .map(|values| {
                let mut pairs = Vec::with_capacity(values.len() + 1);
                pairs.push(("replicate".to_string(), replicate.clone()));
                for ((key, _), value) in self.params.iter().zip(values) {
                    pairs.push((key.clone(), value));
                }
                ParamSet::new(pairs)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(json: &str) -> SweepSpec {
        SweepSpec::from_json(&serde_json::from_str(json).unwrap()).unwrap()
    }

    #[test]
    fn scalars_become_singleton_lists() {
        let s = spec(r#"{"fio": {"bs": "4k", "iodepth": 32}, "replicates": 1}"#);
        assert_eq!(s.combinations(), vec![vec![
            ParamValue::Str("4k".into()),
            ParamValue::Int(32),
        ]]);
    }

    #[test]
    fn combination_count_is_product_of_list_lengths() {
        let s = spec(r#"{"fio": {"bs": ["4k", "8k"], "rw": ["read", "write", "randread"]}, "replicates": 2}"#);
        assert_eq!(s.combinations().len(), 6);
        assert_eq!(s.replicates.len(), 2);
    }

    #[test]
    fn empty_candidate_list_yields_zero_jobs() {
        let s = spec(r#"{"fio": {"bs": [], "rw": ["read"]}, "replicates": 1}"#);
        assert!(s.combinations().is_empty());
        assert!(s.param_sets(&ParamValue::Int(1)).is_empty());
    }

    #[test]
    fn replicates_expand_from_one() {
        let s = spec(r#"{"fio": {"bs": "4k"}, "replicates": 3}"#);
        assert_eq!(
            s.replicates,
            vec![ParamValue::Int(1), ParamValue::Int(2), ParamValue::Int(3)]
        );
    }

    #[test]
    fn replicates_wins_over_replicate() {
        let s = spec(r#"{"fio": {"bs": "4k"}, "replicates": 2, "replicate": [7, 8, 9]}"#);
        assert_eq!(s.replicates, vec![ParamValue::Int(1), ParamValue::Int(2)]);
    }

    #[test]
    fn explicit_replicate_list_is_kept() {
        let s = spec(r#"{"fio": {"bs": "4k"}, "replicate": [5, 9]}"#);
        assert_eq!(s.replicates, vec![ParamValue::Int(5), ParamValue::Int(9)]);
    }

    #[test]
    fn missing_fio_is_a_config_error() {
        let err = SweepSpec::from_json(&serde_json::from_str(r#"{"replicates": 1}"#).unwrap());
        assert!(matches!(err, Err(BatchError::Config(_))));
    }

    #[test]
    fn non_integer_replicates_is_a_config_error() {
        let err = SweepSpec::from_json(
            &serde_json::from_str(r#"{"fio": {"bs": "4k"}, "replicates": "two"}"#).unwrap(),
        );
        assert!(matches!(err, Err(BatchError::Config(_))));
    }

    #[test]
    fn param_sets_put_replicate_first_in_declared_order() {
        let s = spec(r#"{"fio": {"bs": ["4k"], "iodepth": [1, 2]}, "replicates": 1}"#);
        let sets = s.param_sets(&ParamValue::Int(1));
        assert_eq!(sets.len(), 2);
        let keys: Vec<&str> = sets[0].keys().collect();
        assert_eq!(keys, vec!["replicate", "bs", "iodepth"]);
        assert_eq!(sets[0].serialized(), "replicate=1, bs=4k, iodepth=1");
        assert_eq!(sets[1].serialized(), "replicate=1, bs=4k, iodepth=2");
    }
}
