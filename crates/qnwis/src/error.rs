//! Error taxonomy for the orchestrator.
//!
//! Fatal errors terminate the run with a single `{stage=done, status=error}`
//! event; recoverable conditions (single agent failure, non-strict
//! verification issues, one scenario out of many) surface as warnings in the
//! briefing instead. [`Error::public_code`] / [`Error::public_message`]
//! produce the sanitized payload for the terminal event: no stack traces, no
//! identifiers of unrelated runs.

use crate::events::Stage;
use thiserror::Error;

/// Error type for orchestrator operations
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Task intent is not in the enabled-intents configuration
    #[error("Unknown intent: {0}")]
    UnknownIntent(String),

    /// Task parameters failed validation against the intent schema
    #[error("Parameter validation failed: {0}")]
    ParamValidation(String),

    /// A stage exceeded its time budget
    #[error("Stage '{stage}' timed out after {budget_ms}ms")]
    StageTimeout {
        /// Stage that overran
        stage: Stage,
        /// Budget it overran
        budget_ms: u64,
    },

    /// A stage's inner task failed non-recoverably
    #[error("Stage '{stage}' failed: {cause}")]
    StageFailure {
        /// Stage that failed
        stage: Stage,
        /// Underlying cause
        #[source]
        cause: Box<Error>,
    },

    /// One scenario failed inside the executor
    #[error("Scenario '{scenario_id}' failed: {reason}")]
    ScenarioFailure {
        /// Scenario that failed
        scenario_id: String,
        /// Why
        reason: String,
    },

    /// An agent failed after its retry
    #[error("Agent '{agent}' failed: {reason}")]
    AgentFailure {
        /// Agent name
        agent: String,
        /// Why
        reason: String,
    },

    /// Claim verification failed under strict mode
    #[error("Verification failed: {0} unverified claim(s)")]
    VerificationFailed(usize),

    /// The caller cancelled the run
    #[error("Run cancelled")]
    Cancelled,

    /// Completion provider failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Prompt template failure (a bug, not a user error)
    #[error("Template error: {0}")]
    Template(String),

    /// Data layer error
    #[error(transparent)]
    Data(#[from] qnwis_data::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invariant violation inside the orchestrator
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the terminal event payload.
    #[must_use]
    pub fn public_code(&self) -> &'static str {
        match self {
            Self::UnknownIntent(_) => "UnknownIntent",
            Self::ParamValidation(_) => "ParamValidation",
            Self::StageTimeout { .. } => "StageTimeout",
            // The wrapper adds stage context; the cause carries the code.
            Self::StageFailure { cause, .. } => cause.public_code(),
            Self::ScenarioFailure { .. } => "ScenarioFailure",
            Self::AgentFailure { .. } => "AgentFailure",
            Self::VerificationFailed(_) => "VerificationFailed",
            Self::Cancelled => "Cancelled",
            Self::Provider(_) => "ProviderFailure",
            Self::Template(_) | Self::Json(_) | Self::Internal(_) => "Internal",
            Self::Data(inner) => match inner {
                qnwis_data::Error::UnknownQuery(_) => "UnknownQuery",
                qnwis_data::Error::ParamValidation { .. } => "ParamValidation",
                qnwis_data::Error::ResultTooLarge { .. } => "ResultTooLarge",
                _ => "BackendFailure",
            },
        }
    }

    /// Sanitized human-readable message for the terminal event payload.
    ///
    /// Internal variants collapse to a generic message; everything else is
    /// already free of internals by construction.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Template(_) | Self::Json(_) | Self::Internal(_) => {
                "internal error".to_string()
            }
            Self::StageFailure { stage, cause } => {
                format!("Stage '{stage}' failed: {}", cause.public_message())
            }
            other => other.to_string(),
        }
    }

    /// Whether this error, raised inside a stage, ends the run.
    ///
    /// Verification failure is only fatal under strict mode, which is
    /// decided at the verify stage; by the time it is raised as this
    /// variant it is fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ScenarioFailure { .. } | Self::AgentFailure { .. })
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_code_for_data_errors() {
        let err = Error::from(qnwis_data::Error::UnknownQuery("x".to_string()));
        assert_eq!(err.public_code(), "UnknownQuery");

        let err = Error::from(qnwis_data::Error::Backend("boom".to_string()));
        assert_eq!(err.public_code(), "BackendFailure");
    }

    #[test]
    fn test_internal_message_is_sanitized() {
        let err = Error::Internal("worker pool poisoned at slot 3".to_string());
        assert_eq!(err.public_message(), "internal error");
        assert_eq!(err.public_code(), "Internal");
    }

    #[test]
    fn test_stage_failure_wraps_cause() {
        let err = Error::StageFailure {
            stage: Stage::Prefetch,
            cause: Box::new(Error::from(qnwis_data::Error::Backend("down".to_string()))),
        };
        assert!(err.to_string().contains("prefetch"));
        assert_eq!(err.public_code(), "BackendFailure");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_stage_failure_sanitizes_internal_cause() {
        let err = Error::StageFailure {
            stage: Stage::Agents,
            cause: Box::new(Error::Internal("slot table corrupt".to_string())),
        };
        assert_eq!(err.public_message(), "Stage 'agents' failed: internal error");
        assert_eq!(err.public_code(), "Internal");
    }

    #[test]
    fn test_agent_failure_not_fatal() {
        let err = Error::AgentFailure {
            agent: "economist".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(!err.is_fatal());
    }
}
