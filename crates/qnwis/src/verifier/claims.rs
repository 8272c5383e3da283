//! Lexical numeric-claim extraction.
//!
//! The scan is deliberately lexical: it matches number tokens and their
//! adjacent unit markers, never natural-language qualifiers. Determinism
//! beats coverage here — the same narrative always yields the same claims.

use crate::config::VerificationConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Unit class of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimUnit {
    /// Plain quantity
    Count,
    /// Percentage (`%`, `percent`, `pp`, `bps`)
    Percent,
    /// Currency (`QAR`, `USD`)
    Currency,
}

/// One numeric claim found in a narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericClaim {
    /// Parsed value; basis points are normalized to percentage points
    pub value: f64,
    /// Unit class
    pub unit: ClaimUnit,
    /// Character span of the number token in the narrative
    pub span: (usize, usize),
    /// The enclosing sentence, trimmed
    pub sentence: String,
    /// Citation prefix found earlier in the sentence, when present
    pub citation_prefix: Option<String>,
    /// `QID:<id>` annotation, when present
    pub query_id: Option<String>,
    /// Source family named by the citation prefix
    pub source_family: Option<String>,
    /// Decimal places the number was written with
    pub decimals: u8,
}

#[allow(clippy::expect_used)]
fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[-+]?\d{1,3}(?:,\d{3})+(?:\.\d+)?|[-+]?\d+(?:\.\d+)?")
            .expect("number regex is valid")
    })
}

#[allow(clippy::expect_used)]
fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:per|according to|source:?)\s+([A-Za-z][A-Za-z0-9_\-]*)\s*:",
        )
        .expect("citation regex is valid")
    })
}

#[allow(clippy::expect_used)]
fn qid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"QID:([A-Za-z0-9_.\-]+)").expect("qid regex is valid")
    })
}

/// Split a narrative into sentence spans.
///
/// Boundaries are newlines and `.`/`!`/`?` followed by whitespace, which
/// keeps decimals like `3.9` intact.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let boundary = match bytes[i] {
            b'\n' => true,
            b'.' | b'!' | b'?' => i + 1 >= bytes.len() || bytes[i + 1].is_ascii_whitespace(),
            _ => false,
        };
        if boundary {
            spans.push((start, i + 1));
            start = i + 1;
        }
        i += 1;
    }
    if start < bytes.len() {
        spans.push((start, bytes.len()));
    }
    spans
}

fn decimals_in_token(token: &str) -> u8 {
    token
        .split('.')
        .nth(1)
        .map_or(0, |frac| frac.len().min(u8::MAX as usize) as u8)
}

/// Classify the unit marker following a number token; returns the matched
/// marker (if any) and the unit class.
fn unit_after(text: &str, end: usize) -> (Option<&'static str>, ClaimUnit) {
    let rest = text[end..].trim_start_matches([' ', '\t']);
    for (marker, unit) in [
        ("%", ClaimUnit::Percent),
        ("percent", ClaimUnit::Percent),
        ("pp", ClaimUnit::Percent),
        ("bps", ClaimUnit::Percent),
        ("QAR", ClaimUnit::Currency),
        ("USD", ClaimUnit::Currency),
    ] {
        if let Some(after) = rest.strip_prefix(marker) {
            // Word markers must end at a word boundary; '%' never needs one.
            let boundary_ok = marker == "%"
                || after
                    .chars()
                    .next()
                    .map_or(true, |c| !c.is_ascii_alphanumeric());
            if boundary_ok {
                return (Some(marker), unit);
            }
        }
    }
    (None, ClaimUnit::Count)
}

fn looks_like_year(token: &str, value: f64) -> bool {
    token.len() == 4
        && !token.contains(['.', ','])
        && value.fract() == 0.0
        && (1900.0..=2100.0).contains(&value)
}

/// Extract every numeric claim from a narrative.
pub fn extract(narrative: &str, config: &VerificationConfig) -> Vec<NumericClaim> {
    let spans = sentence_spans(narrative);
    let mut claims = Vec::new();

    for mat in number_regex().find_iter(narrative) {
        let (start, end) = (mat.start(), mat.end());
        let token = mat.as_str();

        // Numbers glued to an identifier (QID:2024, mv_2024) are not claims.
        if start > 0 {
            let before = narrative[..start].chars().next_back().unwrap_or(' ');
            if before.is_ascii_alphanumeric() || matches!(before, '_' | ':' | '/' | '.') {
                continue;
            }
        }

        let cleaned: String = token.chars().filter(|c| *c != ',').collect();
        let Ok(mut value) = cleaned.parse::<f64>() else {
            continue;
        };

        let (marker, unit) = unit_after(narrative, end);
        if marker == Some("bps") {
            value /= 100.0;
        }

        if config.ignore_years && unit == ClaimUnit::Count && looks_like_year(token, value) {
            continue;
        }
        if unit == ClaimUnit::Count && value.abs() < config.ignore_numbers_below {
            continue;
        }

        let (s_start, s_end) = spans
            .iter()
            .copied()
            .find(|(a, b)| *a <= start && start < *b)
            .unwrap_or((0, narrative.len()));
        let sentence = &narrative[s_start..s_end];
        let before_claim = &narrative[s_start..start];

        let citation = citation_regex()
            .captures_iter(before_claim)
            .last()
            .map(|cap| (cap[0].trim().to_string(), cap[1].to_string()));
        let query_id = qid_regex()
            .captures_iter(sentence)
            .last()
            .map(|cap| cap[1].to_string());

        claims.push(NumericClaim {
            value,
            unit,
            span: (start, end),
            sentence: sentence.trim().to_string(),
            citation_prefix: citation.as_ref().map(|(full, _)| full.clone()),
            query_id,
            source_family: citation.map(|(_, family)| family),
            decimals: decimals_in_token(&cleaned),
        });
    }

    claims
}

/// Consecutive bullet lines that each carry at least one percent claim.
///
/// Returns, per group, the first percent value of each line. The math check
/// sums these against 100.
pub fn percent_bullet_groups(
    narrative: &str,
    config: &VerificationConfig,
) -> Vec<Vec<f64>> {
    let claims = extract(narrative, config);
    let mut groups: Vec<Vec<f64>> = Vec::new();
    let mut current: Vec<f64> = Vec::new();
    let mut offset = 0;

    for line in narrative.split_inclusive('\n') {
        let line_start = offset;
        let line_end = offset + line.len();
        offset = line_end;

        let trimmed = line.trim_start();
        let is_bullet = trimmed.starts_with('-')
            || trimmed.starts_with('*')
            || trimmed.starts_with('\u{2022}');

        let first_pct = if is_bullet {
            claims
                .iter()
                .find(|c| {
                    c.unit == ClaimUnit::Percent
                        && c.span.0 >= line_start
                        && c.span.0 < line_end
                })
                .map(|c| c.value)
        } else {
            None
        };

        match first_pct {
            Some(value) => current.push(value),
            None => {
                if current.len() >= 2 {
                    groups.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
        }
    }
    if current.len() >= 2 {
        groups.push(current);
    }
    groups
}
