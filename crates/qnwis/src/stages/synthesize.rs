//! Briefing synthesis.
//!
//! Simple runs render a deterministic narrative straight from the
//! prefetched facts — no model in the loop, so the numbers are correct by
//! construction. Everything else streams a provider-written briefing built
//! from the verified material, then verifies the synthesized text itself so
//! a model that invents numbers at the last step is still caught.

use crate::error::{Error, Result};
use crate::events::{Stage, StageStatus};
use crate::graph::Complexity;
use crate::prompts::{self, names};
use crate::stages::StageContext;
use crate::state::RunState;
use crate::verifier::Verifier;
use futures::StreamExt;
use serde_json::{json, Value};

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let narrative = match state.complexity {
        Some(Complexity::Simple) => deterministic_narrative(state),
        _ => provider_narrative(ctx, state).await?,
    };

    if ctx.flags.enable_verification {
        let verifier = Verifier::new(ctx.config.verification.clone());
        let report = verifier.verify(&narrative, &state.prefetched);
        if !report.ok {
            if ctx.config.verification.strict {
                let errors = report.error_count();
                state.verification = Some(report);
                return Err(Error::VerificationFailed(errors));
            }
            state.warn(format!("verification_failed: {}", report.summary()));
        }
        state.verification = Some(report);
    } else {
        state.warn("verification disabled by feature flag".to_string());
    }

    let payload = json!({
        "narrative_chars": narrative.len(),
        "warnings": state.warnings.len(),
    });
    state.synthesis = Some(narrative);
    Ok(payload)
}

/// One sentence per numeric fact, each carrying its source prefix and QID
/// so the verifier binds every claim.
fn deterministic_narrative(state: &RunState) -> String {
    let mut lines = Vec::new();
    for result in &state.prefetched {
        let Some(first) = result.rows.first() else {
            lines.push(format!(
                "Per {}: no rows for {} under the supplied parameters.",
                result.provenance.dataset, result.query_id
            ));
            continue;
        };
        for (column, value) in first {
            if !value.is_number() {
                continue;
            }
            let unit = if is_percent_column(column) { "%" } else { "" };
            lines.push(format!(
                "Per {}: {} is {}{} (QID:{}).",
                result.provenance.dataset, column, value, unit, result.query_id
            ));
        }
    }
    if lines.is_empty() {
        "No deterministic facts were available for this question.".to_string()
    } else {
        lines.join("\n")
    }
}

fn is_percent_column(column: &str) -> bool {
    column.ends_with("_pct")
        || column.ends_with("_rate")
        || column.contains("share")
        || column.contains("percent")
}

/// Stream the briefing from the provider; fall back to the already-verified
/// material when the provider fails.
async fn provider_narrative(ctx: &StageContext, state: &mut RunState) -> Result<String> {
    let material = assemble_material(state);

    let mut context = tera::Context::new();
    context.insert("question", &state.task.question_text);
    context.insert("material", &material);
    context.insert("warnings", &state.warnings);
    let prompt = prompts::render(names::SYNTHESIZE, &context)?;

    match ctx.provider.complete_streaming(&prompt, 2048, None).await {
        Ok(mut stream) => {
            let mut assembled = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(text) => {
                        ctx.sink.emit(
                            Stage::Synthesize,
                            StageStatus::Streaming,
                            json!({ "chunk": text }),
                        );
                        assembled.push_str(&text);
                    }
                    Err(e) => {
                        state.warn(format!("synthesis stream broke: {}", e.public_message()));
                        break;
                    }
                }
            }
            if assembled.trim().is_empty() {
                state.warn("synthesis produced no text; using verified material".to_string());
                Ok(material)
            } else {
                Ok(assembled)
            }
        }
        Err(e) => {
            state.warn(format!("synthesis degraded: {}", e.public_message()));
            Ok(material)
        }
    }
}

/// The most refined narrative the pipeline produced so far, plus findings.
fn assemble_material(state: &RunState) -> String {
    let mut sections = Vec::new();
    if let Some(critique) = &state.critique_narrative {
        sections.push(critique.clone());
    } else if let Some(debate) = &state.debate_narrative {
        sections.push(debate.clone());
    }
    if let Some(meta) = &state.meta_synthesis {
        sections.push(meta.clone());
    }
    if sections.is_empty() {
        for report in &state.agent_reports {
            sections.push(report.narrative.clone());
        }
    }
    let findings: Vec<String> = state
        .agent_reports
        .iter()
        .flat_map(|r| r.findings.iter().cloned())
        .collect();
    if !findings.is_empty() {
        sections.push(format!("Key findings:\n{}", findings.join("\n")));
    }
    sections.join("\n\n")
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use qnwis_data::{Freshness, Provenance, QueryResult, Row};
    use serde_json::json;

    #[test]
    fn test_deterministic_narrative_carries_values_and_citations() {
        let mut state = RunState::new(Task::new("q", "pattern.latest_rate"));
        let mut row = Row::new();
        row.insert("rate_pct".to_string(), json!(3.9));
        state.prefetched.push(QueryResult {
            query_id: "unemployment_rate_latest".to_string(),
            params_used: serde_json::Map::new(),
            rows: vec![row],
            provenance: Provenance {
                dataset: "LMIS".to_string(),
                source: "direct".to_string(),
            },
            freshness: Freshness::now(),
            row_count: 1,
        });

        let narrative = deterministic_narrative(&state);
        assert!(narrative.contains("3.9%"));
        assert!(narrative.contains("Per LMIS:"));
        assert!(narrative.contains("QID:unemployment_rate_latest"));

        // The narrative it generates always verifies against its own facts.
        let verifier = Verifier::default();
        let report = verifier.verify(&narrative, &state.prefetched);
        assert!(report.ok, "{report:?}");
        assert!(report.claims_total >= 1);
        assert_eq!(report.claims_matched, report.claims_total);
    }

    #[test]
    fn test_empty_prefetch_has_placeholder() {
        let state = RunState::new(Task::new("q", "pattern.latest_rate"));
        let narrative = deterministic_narrative(&state);
        assert!(narrative.contains("No deterministic facts"));
    }
}
