//! Terminal result types: the briefing or a structured failure.

use crate::error::Error;
use crate::graph::Complexity;
use crate::verifier::VerificationReport;
use qnwis_data::QueryResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One executed query, as recorded in the deterministic fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedQuery {
    /// Registered query id
    pub query_id: String,
    /// Effective parameters the query ran with
    pub params: serde_json::Map<String, Value>,
    /// Rows returned
    pub row_count: usize,
}

/// The reproducible subset of a briefing: identical across reruns of the
/// same task against a pinned registry and cache state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeterministicFields {
    /// Every query observed by the run, ordered by id
    pub executed_queries: Vec<ExecutedQuery>,
    /// Aggregate verification outcome, when verification ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

impl DeterministicFields {
    /// Build from the results a run observed.
    #[must_use]
    pub fn from_results(
        results: &[QueryResult],
        verification: Option<VerificationReport>,
    ) -> Self {
        let mut executed: Vec<ExecutedQuery> = results
            .iter()
            .map(|r| ExecutedQuery {
                query_id: r.query_id.clone(),
                params: r.params_used.clone(),
                row_count: r.row_count,
            })
            .collect();
        executed.sort_by(|a, b| a.query_id.cmp(&b.query_id));
        executed.dedup_by(|a, b| a == b);
        Self {
            executed_queries: executed,
            verification,
        }
    }
}

/// The terminal briefing of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefingResult {
    /// Run this briefing answers
    pub request_id: String,
    /// The briefing narrative
    pub narrative: String,
    /// Complexity the run was routed as
    pub complexity: Complexity,
    /// Aggregate confidence in `[0, 1]`
    pub confidence: f64,
    /// Warnings accumulated along the way
    pub warnings: Vec<String>,
    /// Reproducible evidence trail
    pub deterministic_fields: DeterministicFields,
}

/// Structured failure surfaced to the caller and the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    /// Run that failed
    pub request_id: String,
    /// Stable machine-readable code
    pub code: String,
    /// Sanitized message
    pub message: String,
}

impl FailureReport {
    /// Build from an error.
    #[must_use]
    pub fn from_error(request_id: &str, error: &Error) -> Self {
        Self {
            request_id: request_id.to_string(),
            code: error.public_code().to_string(),
            message: error.public_message(),
        }
    }

    /// Payload for the terminal event.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "code": self.code,
            "message": self.message,
            "request_id": self.request_id,
        })
    }
}
