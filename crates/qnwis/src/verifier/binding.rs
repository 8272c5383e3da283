//! Binding claims to prefetched query results.
//!
//! For each claim the binder restricts the candidate results (QID
//! annotation, then source family, then everything prefetched), checks
//! `row_count` for count claims, then searches numeric cells under the
//! configured tolerances. Percent claims are tried in both the `[0,1]` and
//! `[0,100]` representations. A claim that fails direct matching may still
//! bind as a trivial arithmetic combination (sum, difference, product,
//! ratio) of two stored values.

use crate::config::VerificationConfig;
use crate::verifier::claims::{ClaimUnit, NumericClaim};
use crate::verifier::report::{IssueCode, Severity, VerificationIssue};
use qnwis_data::QueryResult;
use serde::{Deserialize, Serialize};

/// Cap on the numeric pool scanned for derived-value matches. Keeps the
/// pairwise search bounded on wide results.
const DERIVED_POOL_CAP: usize = 128;

/// Outcome of binding one claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimBinding {
    /// The claim
    pub claim: NumericClaim,
    /// Whether it bound to a stored value
    pub matched: bool,
    /// Query the match came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_query_id: Option<String>,
    /// Where in the result it matched (`row_count`, a column name, or a
    /// derived-value description)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_location: Option<String>,
    /// Issue raised while binding, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<VerificationIssue>,
}

/// Bind every claim against the prefetched results.
pub fn bind_claims(
    claims: Vec<NumericClaim>,
    results: &[QueryResult],
    config: &VerificationConfig,
) -> Vec<ClaimBinding> {
    claims
        .into_iter()
        .map(|claim| bind_one(claim, results, config))
        .collect()
}

fn bind_one(
    claim: NumericClaim,
    results: &[QueryResult],
    config: &VerificationConfig,
) -> ClaimBinding {
    if config.require_citation_first
        && claim.citation_prefix.is_none()
        && claim.query_id.is_none()
    {
        let issue = VerificationIssue {
            code: IssueCode::ClaimUncited,
            severity: Severity::Error,
            message: format!("uncited claim '{}' in: {}", claim_text(&claim), claim.sentence),
            span: Some(claim.span),
        };
        return ClaimBinding {
            claim,
            matched: false,
            matched_query_id: None,
            matched_location: None,
            issue: Some(issue),
        };
    }

    let (candidates, restriction_issue) = restrict_candidates(&claim, results, config);

    // Count claims check row_count before cell values.
    if claim.unit == ClaimUnit::Count {
        for result in &candidates {
            if (claim.value - result.row_count as f64).abs() <= config.abs_epsilon {
                return bound(claim, result.query_id.clone(), "row_count".to_string(), restriction_issue);
            }
        }
    }

    for result in &candidates {
        for (column, value) in result.numeric_values() {
            if value_matches(claim.value, claim.unit, value, config) {
                return bound(
                    claim,
                    result.query_id.clone(),
                    column.to_string(),
                    restriction_issue,
                );
            }
        }
    }

    if let Some((query_id, description)) = derived_match(&claim, &candidates, config) {
        return bound(claim, query_id, description, restriction_issue);
    }

    if let Some((query_id, column)) = rounding_match(&claim, &candidates) {
        let issue = VerificationIssue {
            code: IssueCode::RoundingMismatch,
            severity: Severity::Warning,
            message: format!(
                "claim '{}' only matches {query_id}.{column} after rounding",
                claim_text(&claim)
            ),
            span: Some(claim.span),
        };
        return ClaimBinding {
            claim,
            matched: true,
            matched_query_id: Some(query_id),
            matched_location: Some(column),
            issue: Some(issue),
        };
    }

    // Percent claims outside both representations cannot be a percentage.
    let code = if claim.unit == ClaimUnit::Percent
        && claim.value > 100.0 + config.epsilon_pct
    {
        IssueCode::UnitMismatch
    } else {
        IssueCode::ClaimNotFound
    };
    let issue = VerificationIssue {
        code,
        severity: Severity::Error,
        message: format!(
            "unverified claim '{}' in: {}",
            claim_text(&claim),
            claim.sentence
        ),
        span: Some(claim.span),
    };
    ClaimBinding {
        claim,
        matched: false,
        matched_query_id: None,
        matched_location: None,
        issue: Some(issue),
    }
}

fn bound(
    claim: NumericClaim,
    query_id: String,
    location: String,
    restriction_issue: Option<VerificationIssue>,
) -> ClaimBinding {
    ClaimBinding {
        claim,
        matched: true,
        matched_query_id: Some(query_id),
        matched_location: Some(location),
        issue: restriction_issue,
    }
}

/// Narrow the candidate results per the claim's annotations.
///
/// An annotation that names nothing prefetched yields an `AmbiguousSource`
/// warning and falls back to the full set, so a typo in a citation degrades
/// rather than auto-failing the claim.
fn restrict_candidates<'a>(
    claim: &NumericClaim,
    results: &'a [QueryResult],
    config: &VerificationConfig,
) -> (Vec<&'a QueryResult>, Option<VerificationIssue>) {
    if config.prefer_query_id {
        if let Some(qid) = &claim.query_id {
            let narrowed: Vec<&QueryResult> =
                results.iter().filter(|r| &r.query_id == qid).collect();
            if !narrowed.is_empty() {
                return (narrowed, None);
            }
            return (
                results.iter().collect(),
                Some(ambiguous(claim, &format!("QID:{qid}"))),
            );
        }
    }
    if let Some(family) = &claim.source_family {
        let narrowed: Vec<&QueryResult> = results
            .iter()
            .filter(|r| r.provenance.dataset.eq_ignore_ascii_case(family))
            .collect();
        if !narrowed.is_empty() {
            return (narrowed, None);
        }
        return (results.iter().collect(), Some(ambiguous(claim, family)));
    }
    (results.iter().collect(), None)
}

fn ambiguous(claim: &NumericClaim, source: &str) -> VerificationIssue {
    VerificationIssue {
        code: IssueCode::AmbiguousSource,
        severity: Severity::Warning,
        message: format!(
            "citation '{source}' matches no prefetched result; searched all sources"
        ),
        span: Some(claim.span),
    }
}

fn value_matches(claim: f64, unit: ClaimUnit, stored: f64, config: &VerificationConfig) -> bool {
    match unit {
        ClaimUnit::Percent => {
            let eps = config.epsilon_pct;
            (claim - stored).abs() <= eps
                || (claim - stored * 100.0).abs() <= eps
                || (claim * 100.0 - stored).abs() <= eps
        }
        ClaimUnit::Count | ClaimUnit::Currency => {
            (claim - stored).abs() <= config.abs_epsilon
                || (claim - stored).abs() <= config.rel_epsilon * claim.abs()
        }
    }
}

/// Try `a+b`, `a-b`, `a*b`, `a/b` over the candidate numeric pool.
fn derived_match(
    claim: &NumericClaim,
    candidates: &[&QueryResult],
    config: &VerificationConfig,
) -> Option<(String, String)> {
    let mut pool: Vec<(String, f64)> = Vec::new();
    'outer: for result in candidates {
        for (_, value) in result.numeric_values() {
            pool.push((result.query_id.clone(), value));
            if pool.len() >= DERIVED_POOL_CAP {
                break 'outer;
            }
        }
    }

    for (i, (qa, a)) in pool.iter().enumerate() {
        for (qb, b) in pool.iter().skip(i + 1) {
            let combos: [(f64, &str); 6] = [
                (a + b, "+"),
                (a - b, "-"),
                (b - a, "-"),
                (a * b, "*"),
                (if *b != 0.0 { a / b } else { f64::NAN }, "/"),
                (if *a != 0.0 { b / a } else { f64::NAN }, "/"),
            ];
            for (derived, op) in combos {
                if derived.is_finite()
                    && value_matches(claim.value, claim.unit, derived, config)
                {
                    let query_id = if qa == qb {
                        qa.clone()
                    } else {
                        format!("{qa},{qb}")
                    };
                    return Some((query_id, format!("derived({a} {op} {b})")));
                }
            }
        }
    }
    None
}

/// A value that equals the claim when rounded to the claim's printed
/// precision, outside the configured tolerances.
fn rounding_match(claim: &NumericClaim, candidates: &[&QueryResult]) -> Option<(String, String)> {
    let scale = 10f64.powi(i32::from(claim.decimals));
    for result in candidates {
        for (column, value) in result.numeric_values() {
            let rounded = (value * scale).round() / scale;
            if (rounded - claim.value).abs() < f64::EPSILON * scale {
                return Some((result.query_id.clone(), column.to_string()));
            }
        }
    }
    None
}

fn claim_text(claim: &NumericClaim) -> String {
    let unit = match claim.unit {
        ClaimUnit::Percent => "%",
        ClaimUnit::Currency => " (currency)",
        ClaimUnit::Count => "",
    };
    format!("{}{unit}", claim.value)
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::claims::extract;
    use qnwis_data::{Freshness, Provenance, Row};
    use serde_json::json;

    fn result(query_id: &str, dataset: &str, rows: Vec<Row>) -> QueryResult {
        let row_count = rows.len();
        QueryResult {
            query_id: query_id.to_string(),
            params_used: serde_json::Map::new(),
            rows,
            provenance: Provenance {
                dataset: dataset.to_string(),
                source: "direct".to_string(),
            },
            freshness: Freshness::now(),
            row_count,
        }
    }

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn config() -> VerificationConfig {
        VerificationConfig::default()
    }

    #[test]
    fn test_exact_cell_match() {
        let results = vec![result(
            "unemployment_rate_latest",
            "LMIS",
            vec![row(&[("rate_pct", json!(3.9))])],
        )];
        let claims = extract("Per LMIS: the rate is 3.9%.", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(bindings[0].matched);
        assert_eq!(
            bindings[0].matched_query_id.as_deref(),
            Some("unemployment_rate_latest")
        );
        assert_eq!(bindings[0].matched_location.as_deref(), Some("rate_pct"));
    }

    #[test]
    fn test_row_count_match_for_counts() {
        let rows: Vec<Row> = (0..12).map(|i| row(&[("sector", json!(i.to_string()))])).collect();
        let results = vec![result("employment_by_sector", "LMIS", rows)];
        let claims = extract("Per LMIS: 12 sectors reported.", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(bindings[0].matched);
        assert_eq!(bindings[0].matched_location.as_deref(), Some("row_count"));
    }

    #[test]
    fn test_percent_dual_representation() {
        let results = vec![result(
            "qatarization_by_sector",
            "LMIS",
            vec![row(&[("share", json!(0.45))])],
        )];
        // Stored as a fraction, claimed in [0,100].
        let claims = extract("Per LMIS: qatarization reached 45%.", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(bindings[0].matched);
    }

    #[test]
    fn test_uncited_claim_fails_before_binding() {
        let results = vec![result(
            "unemployment_rate_latest",
            "LMIS",
            vec![row(&[("rate_pct", json!(3.9))])],
        )];
        let claims = extract("The rate is 3.9%.", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(!bindings[0].matched);
        assert_eq!(
            bindings[0].issue.as_ref().unwrap().code,
            IssueCode::ClaimUncited
        );
    }

    #[test]
    fn test_uncited_ok_when_not_required() {
        let mut cfg = config();
        cfg.require_citation_first = false;
        let results = vec![result(
            "unemployment_rate_latest",
            "LMIS",
            vec![row(&[("rate_pct", json!(3.9))])],
        )];
        let claims = extract("The rate is 3.9%.", &cfg);
        let bindings = bind_claims(claims, &results, &cfg);
        assert!(bindings[0].matched);
    }

    #[test]
    fn test_not_found_outside_tolerance() {
        let results = vec![result(
            "employment_by_sector",
            "LMIS",
            vec![row(&[("headcount", json!(1234))])],
        )];
        let claims = extract("Per LMIS: 1,500 employees.", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(!bindings[0].matched);
        assert_eq!(
            bindings[0].issue.as_ref().unwrap().code,
            IssueCode::ClaimNotFound
        );
    }

    #[test]
    fn test_qid_restriction_wins() {
        let results = vec![
            result("a", "LMIS", vec![row(&[("v", json!(100))])]),
            result("b", "LMIS", vec![row(&[("v", json!(200))])]),
        ];
        let claims = extract("Per LMIS: 200 units (QID:b).", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(bindings[0].matched);
        assert_eq!(bindings[0].matched_query_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_unknown_family_is_ambiguous_but_still_searched() {
        let results = vec![result("a", "LMIS", vec![row(&[("v", json!(200))])])];
        let claims = extract("Per MYSTERY: 200 units.", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(bindings[0].matched);
        assert_eq!(
            bindings[0].issue.as_ref().unwrap().code,
            IssueCode::AmbiguousSource
        );
    }

    #[test]
    fn test_derived_sum() {
        let results = vec![result(
            "employment_by_sector",
            "LMIS",
            vec![
                row(&[("headcount", json!(1000))]),
                row(&[("headcount", json!(234))]),
            ],
        )];
        let claims = extract("Per LMIS: 1,234 employees in total.", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(bindings[0].matched);
        assert!(bindings[0]
            .matched_location
            .as_deref()
            .unwrap()
            .starts_with("derived"));
    }

    #[test]
    fn test_rounding_mismatch_is_warning_match() {
        let mut cfg = config();
        cfg.abs_epsilon = 0.001;
        cfg.rel_epsilon = 0.0;
        cfg.epsilon_pct = 0.001;
        let results = vec![result(
            "unemployment_rate_latest",
            "LMIS",
            vec![row(&[("rate_pct", json!(3.94))])],
        )];
        let claims = extract("Per LMIS: the rate is 3.9%.", &cfg);
        let bindings = bind_claims(claims, &results, &cfg);
        assert!(bindings[0].matched);
        assert_eq!(
            bindings[0].issue.as_ref().unwrap().code,
            IssueCode::RoundingMismatch
        );
    }

    #[test]
    fn test_unit_mismatch_for_impossible_percent() {
        let results = vec![result("a", "LMIS", vec![row(&[("v", json!(1.5))])])];
        let claims = extract("Per LMIS: growth of 250%.", &config());
        let bindings = bind_claims(claims, &results, &config());
        assert!(!bindings[0].matched);
        assert_eq!(
            bindings[0].issue.as_ref().unwrap().code,
            IssueCode::UnitMismatch
        );
    }
}
