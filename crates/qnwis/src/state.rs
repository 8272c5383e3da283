//! Run state: the single mutable record threaded through the pipeline.
//!
//! The orchestrator exclusively owns the [`RunState`]; fan-out sub-tasks
//! receive a read-only [`StateView`] snapshot and return values the driver
//! merges back. Nothing user-visible survives the run.

use crate::agent::AgentReport;
use crate::graph::Complexity;
use crate::providers::RetrievedSnippet;
use crate::scenario::{Scenario, ScenarioOutcome};
use crate::task::Task;
use crate::verifier::VerificationReport;
use qnwis_data::QueryResult;
use serde_json::Value;
use std::sync::Arc;

/// Mutable state owned by the driver task.
#[derive(Debug)]
pub struct RunState {
    /// The immutable task
    pub task: Task,
    /// Params after intent validation (defaults applied)
    pub effective_params: serde_json::Map<String, Value>,
    /// Set by the classify stage
    pub complexity: Option<Complexity>,
    /// Results of the prefetch stage, in catalog order
    pub prefetched: Vec<QueryResult>,
    /// Context snippets from the rag stage
    pub context: Vec<RetrievedSnippet>,
    /// Scenarios generated this run
    pub scenarios: Vec<Scenario>,
    /// Executor outcomes, in scenario input order
    pub scenario_outcomes: Vec<ScenarioOutcome>,
    /// Cross-scenario synthesis narrative
    pub meta_synthesis: Option<String>,
    /// Agent names chosen by the selection stage
    pub selected_agents: Vec<String>,
    /// Reports from the agent fan-out
    pub agent_reports: Vec<AgentReport>,
    /// Reconciled narrative from the debate stage
    pub debate_narrative: Option<String>,
    /// Revised narrative from the critique stage
    pub critique_narrative: Option<String>,
    /// Aggregate verification outcome
    pub verification: Option<VerificationReport>,
    /// Final briefing narrative from the synthesize stage
    pub synthesis: Option<String>,
    /// Warnings surfaced into the briefing
    pub warnings: Vec<String>,
}

impl RunState {
    /// Fresh state for a task.
    #[must_use]
    pub fn new(task: Task) -> Self {
        Self {
            task,
            effective_params: serde_json::Map::new(),
            complexity: None,
            prefetched: Vec::new(),
            context: Vec::new(),
            scenarios: Vec::new(),
            scenario_outcomes: Vec::new(),
            meta_synthesis: None,
            selected_agents: Vec::new(),
            agent_reports: Vec::new(),
            debate_narrative: None,
            critique_narrative: None,
            verification: None,
            synthesis: None,
            warnings: Vec::new(),
        }
    }

    /// Attach a warning, deduplicated.
    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            tracing::warn!(request_id = %self.task.request_id, %warning, "run warning");
            self.warnings.push(warning);
        }
    }

    /// The narrative the verify stage checks: critique output when the
    /// debate chain ran, otherwise the concatenated agent narratives.
    #[must_use]
    pub fn narrative_to_verify(&self) -> String {
        if let Some(critique) = &self.critique_narrative {
            return critique.clone();
        }
        if let Some(debate) = &self.debate_narrative {
            return debate.clone();
        }
        self.agent_reports
            .iter()
            .map(|r| r.narrative.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Snapshot for fan-out sub-tasks.
    #[must_use]
    pub fn view(&self) -> StateView {
        StateView {
            question_text: Arc::from(self.task.question_text.as_str()),
            intent: Arc::from(self.task.intent.as_str()),
            effective_params: Arc::new(self.effective_params.clone()),
            prefetched: Arc::new(self.prefetched.clone()),
            context: Arc::new(self.context.clone()),
        }
    }
}

/// Read-only snapshot handed to parallel sub-tasks.
///
/// Cloning is cheap; the underlying data is shared and immutable for the
/// lifetime of the fan-out.
#[derive(Debug, Clone)]
pub struct StateView {
    /// The question, verbatim
    pub question_text: Arc<str>,
    /// Intent name
    pub intent: Arc<str>,
    /// Validated parameters
    pub effective_params: Arc<serde_json::Map<String, Value>>,
    /// Prefetched facts
    pub prefetched: Arc<Vec<QueryResult>>,
    /// Retrieved context
    pub context: Arc<Vec<RetrievedSnippet>>,
}
