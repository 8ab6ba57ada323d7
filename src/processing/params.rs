//! Reading method parameters out of loosely typed JSON maps.
//!
//! Saved configurations store parameters either as numbers or as the strings
//! typed into an entry box, so both forms are accepted.

use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

pub type ParamMap = Map<String, Value>;

fn lookup<'a>(params: &'a ParamMap, keys: &[&str]) -> Option<(&'a str, &'a Value)> {
    keys.iter()
        .find_map(|k| params.get_key_value(*k))
        .map(|(k, v)| (k.as_str(), v))
        .filter(|(_, v)| !v.is_null())
}

fn as_f64(key: &str, value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        EngineError::invalid_parameter(format!("parameter '{key}' is not a number: {value}"))
    })
}

/// Float parameter under any of `keys`, or `default` when absent.
pub fn get_f64(params: &ParamMap, keys: &[&str], default: f64) -> Result<f64> {
    match lookup(params, keys) {
        Some((key, value)) => as_f64(key, value),
        None => Ok(default),
    }
}

/// Non-negative integer parameter under any of `keys`, or `default`.
pub fn get_usize(params: &ParamMap, keys: &[&str], default: usize) -> Result<usize> {
    let Some((key, value)) = lookup(params, keys) else {
        return Ok(default);
    };
    let v = as_f64(key, value)?;
    if v < 0.0 || v.fract() != 0.0 || !v.is_finite() {
        return Err(EngineError::invalid_parameter(format!(
            "parameter '{key}' must be a non-negative integer, got {value}"
        )));
    }
    Ok(v as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> ParamMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn numbers_and_strings() {
        let p = map(json!({"window_length": "11", "polyorder": 3, "frac": " 0.25 "}));
        assert_eq!(get_usize(&p, &["window_length"], 5).unwrap(), 11);
        assert_eq!(get_usize(&p, &["polyorder"], 2).unwrap(), 3);
        assert_eq!(get_f64(&p, &["frac"], 0.2).unwrap(), 0.25);
    }

    #[test]
    fn defaults_and_aliases() {
        let p = map(json!({"num_iter": 20, "sigma": null}));
        assert_eq!(get_usize(&p, &["max_iter", "num_iter"], 50).unwrap(), 20);
        assert_eq!(get_f64(&p, &["sigma"], 1.0).unwrap(), 1.0);
        assert_eq!(get_usize(&p, &["missing"], 7).unwrap(), 7);
    }

    #[test]
    fn rejects_garbage() {
        let p = map(json!({"a": "abc", "b": -1, "c": 2.5, "d": [1]}));
        assert!(get_f64(&p, &["a"], 0.0).is_err());
        assert!(get_usize(&p, &["b"], 0).is_err());
        assert!(get_usize(&p, &["c"], 0).is_err());
        assert!(get_f64(&p, &["d"], 0.0).is_err());
    }
}
