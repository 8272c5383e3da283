//! The pipeline state machine.
//!
//! States are stage names; transitions are a pure function of the current
//! stage, the classified complexity, and the feature flags. The driver in
//! [`crate::orchestrator`] pumps this function in a tail loop. Failure
//! routing (any stage failure → `done` with error) lives in the driver; this
//! module only encodes the success paths.

use crate::config::FeatureFlags;
use crate::events::Stage;
use serde::{Deserialize, Serialize};

/// Complexity classes assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Single factual lookup
    Simple,
    /// Interpretation across a few datasets
    Medium,
    /// Scenario analysis, single scenario
    Complex,
    /// Full scenario fan-out
    Critical,
}

impl Complexity {
    /// Whether this class runs the scenario sub-pipeline.
    #[must_use]
    pub fn runs_scenarios(self) -> bool {
        matches!(self, Self::Complex | Self::Critical)
    }

    /// Whether this class runs the debate/critique chain.
    #[must_use]
    pub fn runs_debate(self) -> bool {
        matches!(self, Self::Complex | Self::Critical)
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
            Self::Critical => "critical",
        }
    }
}

/// Successor of `current` on the success path; `None` once the run is done.
#[must_use]
pub fn next_stage(
    current: Stage,
    complexity: Complexity,
    flags: &FeatureFlags,
) -> Option<Stage> {
    let after_facts = |complexity: Complexity| match complexity {
        Complexity::Simple => Stage::Synthesize,
        Complexity::Medium => Stage::Agents,
        Complexity::Complex | Complexity::Critical => Stage::ScenarioGen,
    };
    let verify_or_synthesize = |flags: &FeatureFlags| {
        if flags.enable_verification {
            Stage::Verify
        } else {
            Stage::Synthesize
        }
    };

    match current {
        Stage::Classify => Some(Stage::Prefetch),
        Stage::Prefetch => Some(match complexity {
            Complexity::Simple => Stage::Synthesize,
            _ if flags.enable_rag => Stage::Rag,
            other => after_facts(other),
        }),
        Stage::Rag => Some(after_facts(complexity)),
        Stage::ScenarioGen => Some(Stage::ParallelExec),
        Stage::ParallelExec => Some(Stage::MetaSynthesis),
        Stage::MetaSynthesis => Some(Stage::AgentSelection),
        Stage::AgentSelection => Some(Stage::Agents),
        Stage::Agents => Some(if complexity.runs_debate() {
            Stage::Debate
        } else {
            verify_or_synthesize(flags)
        }),
        Stage::Debate => Some(Stage::Critique),
        Stage::Critique => Some(verify_or_synthesize(flags)),
        Stage::Verify => Some(Stage::Synthesize),
        Stage::Synthesize => Some(Stage::Done),
        Stage::Done => None,
    }
}

/// The full success path for a complexity class, starting at `classify`.
///
/// Used by tests and the ops console to preview routing.
#[must_use]
pub fn route(complexity: Complexity, flags: &FeatureFlags) -> Vec<Stage> {
    let mut stages = vec![Stage::Classify];
    let mut current = Stage::Classify;
    while let Some(next) = next_stage(current, complexity, flags) {
        stages.push(next);
        current = next;
    }
    stages
}
