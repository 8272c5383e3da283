//! Claim verification: holding agent narratives to the prefetched facts.
//!
//! Every numeric claim in a narrative must either appear in the provided
//! [`QueryResult`]s within tolerance, or be a trivial arithmetic combination
//! of two values that do. The verifier is deterministic: the same narrative,
//! results, and tolerances always produce the same report.

pub mod binding;
pub mod claims;
pub mod report;

pub use binding::{bind_claims, ClaimBinding};
pub use claims::{extract, ClaimUnit, NumericClaim};
pub use report::{IssueCode, MathChecks, Severity, VerificationIssue, VerificationReport};

use crate::config::VerificationConfig;
use qnwis_data::QueryResult;

/// The claim verifier.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: VerificationConfig,
}

impl Verifier {
    /// Build a verifier with the given tolerances.
    #[must_use]
    pub fn new(config: VerificationConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Verify one narrative against the prefetched results.
    pub fn verify(&self, narrative: &str, results: &[QueryResult]) -> VerificationReport {
        let extracted = claims::extract(narrative, &self.config);
        if extracted.is_empty() {
            let mut report = VerificationReport::empty();
            self.apply_math_checks(narrative, &mut report);
            report.ok = report.error_count() == 0;
            return report;
        }

        let bindings = binding::bind_claims(extracted, results, &self.config);
        let claims_total = bindings.len();
        let claims_matched = bindings.iter().filter(|b| b.matched).count();
        let mut issues: Vec<VerificationIssue> =
            bindings.into_iter().filter_map(|b| b.issue).collect();

        let mut report = VerificationReport {
            ok: true,
            claims_total,
            claims_matched,
            issues: Vec::new(),
            math_checks: MathChecks::default(),
        };
        self.apply_math_checks(narrative, &mut report);
        issues.extend(report.issues.drain(..));
        issues.sort_by_key(|i| match i.severity {
            Severity::Error => 0,
            Severity::Warning => 1,
        });
        report.issues = issues;
        report.ok = report.error_count() == 0;
        report
    }

    /// Sum bullet groups of percentages; each group must reach 100 within
    /// `epsilon_pct`.
    fn apply_math_checks(&self, narrative: &str, report: &mut VerificationReport) {
        if !self.config.sum_to_100 {
            return;
        }
        let groups = claims::percent_bullet_groups(narrative, &self.config);
        report.math_checks.groups_checked = groups.len();
        for group in groups {
            let sum: f64 = group.iter().sum();
            if (sum - 100.0).abs() > self.config.epsilon_pct {
                report.math_checks.groups_failed += 1;
                report.issues.push(VerificationIssue {
                    code: IssueCode::MathInconsistent,
                    severity: Severity::Error,
                    message: format!(
                        "percentage breakdown sums to {sum}, expected 100 (±{})",
                        self.config.epsilon_pct
                    ),
                    span: None,
                });
            }
        }
    }
}
