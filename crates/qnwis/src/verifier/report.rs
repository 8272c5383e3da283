//! Verification report types.

use serde::{Deserialize, Serialize};

/// Issue codes raised by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueCode {
    /// A claim had no citation prefix while citations are required
    ClaimUncited,
    /// A claim matched nothing in the prefetched results
    ClaimNotFound,
    /// A claim's unit cannot be reconciled with any candidate value
    UnitMismatch,
    /// A bullet group of percentages does not sum to 100
    MathInconsistent,
    /// A claim only matches a stored value after rounding
    RoundingMismatch,
    /// A cited source family matched no prefetched result
    AmbiguousSource,
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fails verification (fatal under strict mode)
    Error,
    /// Reported but does not fail verification
    Warning,
}

/// One verification issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationIssue {
    /// What went wrong
    pub code: IssueCode,
    /// How bad it is
    pub severity: Severity,
    /// Human-readable detail, including the offending text
    pub message: String,
    /// Character span of the offending claim in the narrative, when tied
    /// to a single claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
}

/// Outcome of the percent-group math checks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MathChecks {
    /// Bullet groups of percentages inspected
    pub groups_checked: usize,
    /// Groups whose sum missed 100 beyond tolerance
    pub groups_failed: usize,
}

/// Result of verifying one narrative against prefetched results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// No error-severity issues were found
    pub ok: bool,
    /// Claims extracted
    pub claims_total: usize,
    /// Claims bound to a stored value
    pub claims_matched: usize,
    /// All issues, errors first
    pub issues: Vec<VerificationIssue>,
    /// Math-consistency outcome
    pub math_checks: MathChecks,
}

impl VerificationReport {
    /// Report for a narrative with nothing to check.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ok: true,
            claims_total: 0,
            claims_matched: 0,
            issues: Vec::new(),
            math_checks: MathChecks::default(),
        }
    }

    /// Number of error-severity issues.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    /// Messages of error-severity issues, for the agent retry prompt.
    #[must_use]
    pub fn offending_claims(&self) -> Vec<String> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(|i| i.message.clone())
            .collect()
    }

    /// One-line summary for logs and briefing warnings.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}/{} claims verified, {} issue(s)",
            self.claims_matched,
            self.claims_total,
            self.issues.len()
        )
    }
}
