//! Tasks and the intent catalog.
//!
//! A [`Task`] is the immutable input to one run. Its `intent` names a
//! registered operation; the [`IntentCatalog`] holds the parameter schema
//! and the deterministic queries prefetched for each intent. Validation
//! happens once at request entry, before any stage runs.

use crate::config::FeatureFlags;
use crate::error::{Error, Result};
use qnwis_data::ParamType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Analysis depth requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Standard turnaround
    #[default]
    Standard,
    /// More scenarios, longer budgets
    Deep,
    /// Full fan-out with the longest budgets
    Legendary,
}

impl Depth {
    /// Number of scenarios generated at this depth.
    #[must_use]
    pub fn scenario_count(self) -> usize {
        match self {
            Self::Standard => 3,
            Self::Deep => 4,
            Self::Legendary => 6,
        }
    }
}

/// Immutable input to one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// The policy question, verbatim
    pub question_text: String,
    /// Registered intent name
    pub intent: String,
    /// Intent parameters
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    /// Caller, when known
    #[serde(default)]
    pub user_id: Option<String>,
    /// Unique id of this run
    pub request_id: String,
    /// Requested depth
    #[serde(default)]
    pub depth: Depth,
    /// Per-task feature flag overrides; `None` uses the service defaults
    #[serde(skip)]
    pub feature_flags: Option<FeatureFlags>,
}

impl Task {
    /// Build a task with a fresh request id.
    #[must_use]
    pub fn new(question_text: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            question_text: question_text.into(),
            intent: intent.into(),
            params: serde_json::Map::new(),
            user_id: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            depth: Depth::default(),
            feature_flags: None,
        }
    }

    /// Attach a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Set the depth.
    #[must_use]
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Override feature flags for this task only.
    #[must_use]
    pub fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = Some(flags);
        self
    }
}

/// One parameter of an intent schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentParam {
    /// Parameter name
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether the caller must supply it
    #[serde(default = "default_true")]
    pub required: bool,
    /// Default for optional parameters
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_true() -> bool {
    true
}

/// A registered intent: schema plus the facts prefetched for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSpec {
    /// Intent name (e.g. `pattern.latest_rate`)
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: String,
    /// Parameter schema, bounded per intent
    #[serde(default)]
    pub params: Vec<IntentParam>,
    /// Registered queries the prefetch stage executes for this intent
    #[serde(default)]
    pub prefetch_queries: Vec<String>,
    /// Routing tags used by agent selection
    #[serde(default)]
    pub tags: Vec<String>,
}

impl IntentSpec {
    /// Validate and normalize task params against this schema.
    ///
    /// Returns the effective params: defaults filled in, everything
    /// type-checked, unknown names rejected.
    pub fn validate_params(
        &self,
        supplied: &serde_json::Map<String, Value>,
    ) -> Result<serde_json::Map<String, Value>> {
        for name in supplied.keys() {
            if !self.params.iter().any(|p| &p.name == name) {
                return Err(Error::ParamValidation(format!(
                    "intent '{}' has no parameter '{name}'",
                    self.name
                )));
            }
        }

        let mut effective = serde_json::Map::new();
        for param in &self.params {
            let value = match supplied.get(&param.name) {
                Some(v) => v.clone(),
                None if param.required => {
                    return Err(Error::ParamValidation(format!(
                        "intent '{}' requires parameter '{}'",
                        self.name, param.name
                    )));
                }
                None => match &param.default {
                    Some(d) => d.clone(),
                    None => continue,
                },
            };
            if !type_matches(param.param_type, &value) {
                return Err(Error::ParamValidation(format!(
                    "parameter '{}' of intent '{}' expects {:?}",
                    param.name, self.name, param.param_type
                )));
            }
            effective.insert(param.name.clone(), value);
        }
        Ok(effective)
    }
}

fn type_matches(ty: ParamType, value: &Value) -> bool {
    match ty {
        ParamType::Int => {
            value.as_i64().is_some()
                || value
                    .as_str()
                    .is_some_and(|s| s.trim().parse::<i64>().is_ok())
        }
        ParamType::Float => {
            value.is_number()
                || value
                    .as_str()
                    .is_some_and(|s| s.trim().parse::<f64>().is_ok())
        }
        ParamType::Text => value.is_string(),
        ParamType::Date => value
            .as_str()
            .is_some_and(|s| chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok()),
        ParamType::Bool => {
            value.is_boolean() || matches!(value.as_str(), Some("true" | "false"))
        }
    }
}

/// Lookup table of registered intents.
#[derive(Debug, Clone, Default)]
pub struct IntentCatalog {
    by_name: HashMap<String, IntentSpec>,
}

impl IntentCatalog {
    /// Build a catalog from specs; duplicate names are rejected.
    pub fn new(specs: Vec<IntentSpec>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(specs.len());
        for spec in specs {
            if by_name.contains_key(&spec.name) {
                return Err(Error::Internal(format!(
                    "duplicate intent '{}'",
                    spec.name
                )));
            }
            by_name.insert(spec.name.clone(), spec);
        }
        Ok(Self { by_name })
    }

    /// Look up an intent.
    pub fn get(&self, name: &str) -> Result<&IntentSpec> {
        self.by_name
            .get(name)
            .ok_or_else(|| Error::UnknownIntent(name.to_string()))
    }

    /// Registered intent names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The standard labour-market intent set the service ships with.
    #[must_use]
    pub fn standard() -> Self {
        let specs = vec![
            IntentSpec {
                name: "pattern.latest_rate".to_string(),
                description: "Latest value of a headline labour-market rate".to_string(),
                params: vec![IntentParam {
                    name: "metric".to_string(),
                    param_type: ParamType::Text,
                    required: true,
                    default: None,
                }],
                prefetch_queries: vec!["unemployment_rate_latest".to_string()],
                tags: vec!["labour".to_string()],
            },
            IntentSpec {
                name: "pattern.sector_breakdown".to_string(),
                description: "Employment distribution across sectors".to_string(),
                params: vec![IntentParam {
                    name: "year".to_string(),
                    param_type: ParamType::Int,
                    required: false,
                    default: Some(Value::from(2024)),
                }],
                prefetch_queries: vec!["employment_by_sector".to_string()],
                tags: vec!["labour".to_string(), "sector".to_string()],
            },
            IntentSpec {
                name: "strategy.policy_analysis".to_string(),
                description: "Full policy analysis across workforce datasets".to_string(),
                params: vec![IntentParam {
                    name: "topic".to_string(),
                    param_type: ParamType::Text,
                    required: true,
                    default: None,
                }],
                prefetch_queries: vec![
                    "unemployment_rate_latest".to_string(),
                    "employment_by_sector".to_string(),
                    "qatarization_by_sector".to_string(),
                ],
                tags: vec![
                    "labour".to_string(),
                    "fiscal".to_string(),
                    "strategy".to_string(),
                ],
            },
            IntentSpec {
                name: "compare.gcc_benchmark".to_string(),
                description: "Benchmark a metric against GCC peers".to_string(),
                params: vec![IntentParam {
                    name: "metric".to_string(),
                    param_type: ParamType::Text,
                    required: true,
                    default: None,
                }],
                prefetch_queries: vec!["gcc_benchmark_rates".to_string()],
                tags: vec!["benchmark".to_string()],
            },
        ];
        #[allow(clippy::expect_used)]
        let catalog = Self::new(specs).expect("standard intent catalog is well-formed");
        catalog
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_intent() {
        let catalog = IntentCatalog::standard();
        assert!(matches!(
            catalog.get("nope"),
            Err(Error::UnknownIntent(_))
        ));
    }

    #[test]
    fn test_validate_params_fills_defaults() {
        let catalog = IntentCatalog::standard();
        let spec = catalog.get("pattern.sector_breakdown").unwrap();
        let effective = spec.validate_params(&serde_json::Map::new()).unwrap();
        assert_eq!(effective.get("year"), Some(&json!(2024)));
    }

    #[test]
    fn test_validate_params_rejects_unknown() {
        let catalog = IntentCatalog::standard();
        let spec = catalog.get("pattern.latest_rate").unwrap();
        let supplied = [("bogus".to_string(), json!(1))].into_iter().collect();
        assert!(matches!(
            spec.validate_params(&supplied),
            Err(Error::ParamValidation(_))
        ));
    }

    #[test]
    fn test_validate_params_rejects_missing_required() {
        let catalog = IntentCatalog::standard();
        let spec = catalog.get("pattern.latest_rate").unwrap();
        assert!(spec.validate_params(&serde_json::Map::new()).is_err());
    }

    #[test]
    fn test_validate_params_type_mismatch() {
        let catalog = IntentCatalog::standard();
        let spec = catalog.get("pattern.latest_rate").unwrap();
        let supplied = [("metric".to_string(), json!(42))].into_iter().collect();
        assert!(spec.validate_params(&supplied).is_err());
    }

    #[test]
    fn test_depth_scenario_counts() {
        assert_eq!(Depth::Standard.scenario_count(), 3);
        assert_eq!(Depth::Legendary.scenario_count(), 6);
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("What is the unemployment rate?", "pattern.latest_rate")
            .with_param("metric", json!("unemployment"))
            .with_depth(Depth::Deep);
        assert_eq!(task.depth, Depth::Deep);
        assert!(!task.request_id.is_empty());
    }
}
