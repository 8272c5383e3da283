//! Scenario types.
//!
//! Scenarios are generated per run and live only for its duration. Each
//! carries assumption overrides that the inner sub-pipeline applies on top
//! of the task parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A policy variant generated at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique within the run
    pub scenario_id: String,
    /// Short name
    pub name: String,
    /// What the scenario assumes
    pub description: String,
    /// Parameter overrides applied by the inner sub-pipeline
    #[serde(default)]
    pub assumptions: serde_json::Map<String, Value>,
}

impl Scenario {
    /// Build a scenario with a derived id.
    #[must_use]
    pub fn new(index: usize, name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            scenario_id: format!("s{index}"),
            name,
            description: description.into(),
            assumptions: serde_json::Map::new(),
        }
    }
}

/// Result of one scenario's inner sub-pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario this result belongs to
    pub scenario_id: String,
    /// Estimated probability the policy succeeds under these assumptions
    pub success_rate: f64,
    /// Confidence in the estimate
    pub confidence: f64,
    /// Key findings
    pub findings: Vec<String>,
    /// Narrative synthesis of the scenario outcome
    pub synthesis_text: String,
    /// Assumptions the outcome is most sensitive to
    pub sensitivity_drivers: Vec<String>,
}

/// A scenario that did not produce a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFailure {
    /// Scenario that failed
    pub scenario_id: String,
    /// Why (`cancelled`, `timeout`, or a sanitized cause)
    pub reason: String,
}

/// What the executor hands back for each input scenario, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    /// The sub-pipeline completed
    Success(ScenarioResult),
    /// The sub-pipeline failed; the rest of the batch continued
    Failure(ScenarioFailure),
}

impl ScenarioOutcome {
    /// Scenario id regardless of outcome.
    #[must_use]
    pub fn scenario_id(&self) -> &str {
        match self {
            Self::Success(r) => &r.scenario_id,
            Self::Failure(f) => &f.scenario_id,
        }
    }

    /// The result, when successful.
    #[must_use]
    pub fn as_success(&self) -> Option<&ScenarioResult> {
        match self {
            Self::Success(r) => Some(r),
            Self::Failure(_) => None,
        }
    }
}
