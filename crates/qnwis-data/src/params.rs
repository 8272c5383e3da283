//! Parameter binding and deterministic cache keys.
//!
//! Supplied parameters are coerced to their declared types, range-checked,
//! and defaulted before anything reaches the engine. Values are substituted
//! exclusively through the engine's bind facility; this module never splices
//! a value into SQL text.
//!
//! Cache keys are derived from a canonical JSON rendering of the bound
//! parameters (recursively sorted keys, ISO-8601 dates, minimal-form
//! numbers), so `{a:1,b:2}` and `{b:2,a:1}` produce the same key in every
//! process.

use crate::catalog::{ParamType, ParameterSpec, QueryDefinition};
use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Parameters after coercion, defaulting, and range checks.
///
/// The map is ordered so iteration (and therefore hashing) is deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundParams {
    values: BTreeMap<String, Value>,
}

impl BoundParams {
    /// Value of a bound parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Number of bound parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no parameters are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render as a plain JSON object (used for `params_used` in results).
    #[must_use]
    pub fn to_json_map(&self) -> serde_json::Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Coerce, default, and range-check `supplied` against the declaration.
///
/// Rules:
/// - undeclared names are rejected;
/// - missing required parameters are rejected;
/// - missing optional parameters take their declared default;
/// - values are coerced to the declared type (strings holding numbers are
///   accepted, numbers are never silently truncated);
/// - numeric values are checked against declared bounds.
pub fn bind(
    def: &QueryDefinition,
    supplied: &serde_json::Map<String, Value>,
) -> Result<BoundParams> {
    for name in supplied.keys() {
        if def.parameter(name).is_none() {
            return Err(Error::param(
                &def.query_id,
                format!("undeclared parameter '{name}'"),
            ));
        }
    }

    let mut values = BTreeMap::new();
    for spec in &def.parameters {
        let raw = match supplied.get(&spec.name) {
            Some(value) => value.clone(),
            None if spec.required => {
                return Err(Error::param(
                    &def.query_id,
                    format!("missing required parameter '{}'", spec.name),
                ));
            }
            None => match &spec.default {
                Some(default) => default.clone(),
                None => continue,
            },
        };
        let coerced = coerce(&def.query_id, spec, raw)?;
        check_range(&def.query_id, spec, &coerced)?;
        values.insert(spec.name.clone(), coerced);
    }

    Ok(BoundParams { values })
}

fn coerce(query_id: &str, spec: &ParameterSpec, value: Value) -> Result<Value> {
    let fail = |got: &Value| {
        Error::param(
            query_id,
            format!(
                "parameter '{}' expects {:?}, got {got}",
                spec.name, spec.param_type
            ),
        )
    };

    match spec.param_type {
        ParamType::Int => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(n) => {
                // A float that is exactly integral is accepted; 3.5 is not.
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
                    Ok(Value::from(f as i64))
                } else {
                    Err(fail(&value))
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| fail(&value)),
            _ => Err(fail(&value)),
        },
        ParamType::Float => match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| fail(&value)),
            _ => Err(fail(&value)),
        },
        ParamType::Text => match &value {
            Value::String(_) => Ok(value),
            _ => Err(fail(&value)),
        },
        ParamType::Date => match &value {
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .map_err(|_| fail(&value)),
            _ => Err(fail(&value)),
        },
        ParamType::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail(&value)),
            },
            _ => Err(fail(&value)),
        },
    }
}

fn check_range(query_id: &str, spec: &ParameterSpec, value: &Value) -> Result<()> {
    let Some(range) = &spec.range else {
        return Ok(());
    };
    let Some(v) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = range.min {
        if v < min {
            return Err(Error::param(
                query_id,
                format!("parameter '{}' below minimum {min}: {v}", spec.name),
            ));
        }
    }
    if let Some(max) = range.max {
        if v > max {
            return Err(Error::param(
                query_id,
                format!("parameter '{}' above maximum {max}: {v}", spec.name),
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Canonical JSON + cache keys
// ============================================================================

/// Render a JSON value with recursively sorted object keys.
///
/// Numbers keep serde_json's minimal form; dates are already ISO-8601
/// strings after coercion. SHA-256 over this rendering is stable across
/// processes and parameter construction order.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Object keys are plain strings; serde_json handles escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// First 16 hex chars of SHA-256 over the canonical parameter rendering.
#[must_use]
pub fn params_hash16(params: &BoundParams) -> String {
    let value = Value::Object(params.to_json_map());
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&value).as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Deterministic cache key:
/// `{namespace}:qr:{op}:{query_id}:{hash16}:{schema_version}`.
#[must_use]
pub fn cache_key(
    namespace: &str,
    op: &str,
    query_id: &str,
    params: &BoundParams,
    schema_version: u32,
) -> String {
    format!(
        "{namespace}:qr:{op}:{query_id}:{}:{schema_version}",
        params_hash16(params)
    )
}

/// Prefix matching every cached entry of one query, for bulk invalidation
/// after a data load.
#[must_use]
pub fn cache_key_prefix(namespace: &str, op: &str, query_id: &str) -> String {
    format!("{namespace}:qr:{op}:{query_id}:")
}
