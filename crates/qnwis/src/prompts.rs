//! Prompt templates for every model-facing stage.
//!
//! Templates are registered once at startup; a render failure is a bug in
//! the template, not a user error, and surfaces as [`Error::Template`].
//! All prompts instruct the model to ground numbers in the prefetched
//! facts and to prefix them with their source, which is what the claim
//! verifier later enforces.

use crate::error::{Error, Result};
use std::sync::OnceLock;
use tera::{Context, Tera};

/// Template names, used with [`render`].
pub mod names {
    /// Complexity classification
    pub const CLASSIFIER: &str = "classifier";
    /// Scenario generation
    pub const SCENARIO_GEN: &str = "scenario_gen";
    /// Specialist agent invocation
    pub const AGENT: &str = "agent";
    /// Agent retry with offending claims enumerated
    pub const AGENT_RETRY: &str = "agent_retry";
    /// Reconciliation debate
    pub const DEBATE: &str = "debate";
    /// Critique of the debate outcome
    pub const CRITIQUE: &str = "critique";
    /// Cross-scenario synthesis
    pub const META_SYNTHESIS: &str = "meta_synthesis";
    /// Final briefing synthesis
    pub const SYNTHESIZE: &str = "synthesize";
}

const CLASSIFIER_TEMPLATE: &str = r#"You are the routing classifier for a ministerial decision-support system.
Classify the question below into exactly one complexity level.

Levels:
- simple: a single factual lookup answerable from one statistic
- medium: requires interpretation across a few datasets
- complex: requires scenario analysis of a policy option
- critical: requires full scenario fan-out across competing policy options

Question: {{ question }}
Intent: {{ intent }}

Respond with JSON only: {"complexity": "<level>", "rationale": "<one sentence>"}"#;

const SCENARIO_GEN_TEMPLATE: &str = r#"Generate {{ count }} policy scenarios for the question below.
Each scenario varies one assumption; together they span the plausible range.

Question: {{ question }}

Facts available:
{{ facts }}

Respond with JSON only:
{"scenarios": [{"name": "...", "description": "...", "assumptions": {"<param>": <value>}}]}"#;

const AGENT_TEMPLATE: &str = r#"You are {{ agent_name }}, a specialist analyst advising the minister.
{{ agent_charter }}

Question: {{ question }}

Verified facts (the only numbers you may use):
{{ facts }}

Rules:
- Every number must come from the facts above, prefixed with its source
  (e.g. "Per LMIS: 1,234 employees").
- Cite the query id inline as QID:<id> where precision matters.
- Do not invent or extrapolate figures.

Respond with JSON only:
{"narrative": "...", "findings": ["..."], "citations": [{"query_id": "...", "note": "..."}], "confidence": 0.0}"#;

const AGENT_RETRY_TEMPLATE: &str = r#"Your previous answer contained numbers that could not be verified against
the provided facts:
{% for claim in offending_claims %}- {{ claim }}
{% endfor %}
Rewrite your answer. Use only numbers present in the facts, each prefixed
with its source. Keep the same JSON shape.

{{ original_prompt }}"#;

const DEBATE_TEMPLATE: &str = r#"You are moderating a panel of specialist analysts. Reconcile their reports
into a single position, noting where they disagree and which evidence wins.

Question: {{ question }}

Reports:
{{ reports }}

Every number in your reconciliation must carry its source prefix. Respond
with the reconciled narrative as plain text."#;

const CRITIQUE_TEMPLATE: &str = r#"You are the red-team reviewer. Critique the draft below for unsupported
leaps, missing caveats, and overconfidence, then produce a revised draft.

Draft:
{{ draft }}

Facts:
{{ facts }}

Respond with the revised draft as plain text; keep source prefixes on all numbers."#;

const META_SYNTHESIS_TEMPLATE: &str = r#"Synthesize the scenario results below into a comparative assessment:
which scenario is most robust, what drives the differences, and what the
sensitivity levers are.

Question: {{ question }}

Scenario results:
{{ scenario_results }}

Respond with plain text; keep source prefixes on all numbers."#;

const SYNTHESIZE_TEMPLATE: &str = r#"Write the final ministerial briefing for the question below.
Structure: headline answer, supporting evidence, risks, recommended next steps.
{% if warnings %}
Flag these caveats prominently:
{% for warning in warnings %}- {{ warning }}
{% endfor %}{% endif %}
Question: {{ question }}

Verified material:
{{ material }}

Every number must keep its source prefix. Respond with plain text."#;

fn engine() -> &'static Tera {
    static TERA: OnceLock<Tera> = OnceLock::new();
    TERA.get_or_init(|| {
        let mut tera = Tera::default();
        #[allow(clippy::expect_used)]
        tera.add_raw_templates(vec![
            (names::CLASSIFIER, CLASSIFIER_TEMPLATE),
            (names::SCENARIO_GEN, SCENARIO_GEN_TEMPLATE),
            (names::AGENT, AGENT_TEMPLATE),
            (names::AGENT_RETRY, AGENT_RETRY_TEMPLATE),
            (names::DEBATE, DEBATE_TEMPLATE),
            (names::CRITIQUE, CRITIQUE_TEMPLATE),
            (names::META_SYNTHESIS, META_SYNTHESIS_TEMPLATE),
            (names::SYNTHESIZE, SYNTHESIZE_TEMPLATE),
        ])
        .expect("built-in prompt templates are well-formed");
        tera
    })
}

/// Render a registered template.
pub fn render(name: &str, context: &Context) -> Result<String> {
    engine()
        .render(name, context)
        .map_err(|e| Error::Template(format!("{name}: {e}")))
}

/// Render the prefetched facts into the compact block agents see.
///
/// One line per query: id, dataset, row count, and the first row as a
/// sample so small lookups are fully visible to the model.
#[must_use]
pub fn facts_block(results: &[qnwis_data::QueryResult]) -> String {
    let mut out = String::new();
    for result in results {
        out.push_str(&format!(
            "[{}] dataset={} rows={}",
            result.query_id, result.provenance.dataset, result.row_count
        ));
        if let Some(first) = result.rows.first() {
            out.push_str(&format!(
                " first_row={}",
                serde_json::Value::Object(first.clone())
            ));
        }
        out.push('\n');
        for row in result.rows.iter().skip(1).take(24) {
            out.push_str(&format!("  {}\n", serde_json::Value::Object(row.clone())));
        }
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_render() {
        let mut ctx = Context::new();
        ctx.insert("question", "What is the unemployment rate?");
        ctx.insert("intent", "pattern.latest_rate");
        ctx.insert("count", &3);
        ctx.insert("facts", "[unemployment_rate_latest] rows=1");
        ctx.insert("agent_name", "economist");
        ctx.insert("agent_charter", "You analyse macro trends.");
        ctx.insert("offending_claims", &vec!["1,500 employees".to_string()]);
        ctx.insert("original_prompt", "...");
        ctx.insert("reports", "...");
        ctx.insert("draft", "...");
        ctx.insert("scenario_results", "...");
        ctx.insert("material", "...");
        ctx.insert("warnings", &vec!["verification_failed".to_string()]);

        for name in [
            names::CLASSIFIER,
            names::SCENARIO_GEN,
            names::AGENT,
            names::AGENT_RETRY,
            names::DEBATE,
            names::CRITIQUE,
            names::META_SYNTHESIS,
            names::SYNTHESIZE,
        ] {
            let rendered = render(name, &ctx).unwrap();
            assert!(!rendered.is_empty(), "{name} rendered empty");
        }
    }

    #[test]
    fn test_missing_variable_is_template_error() {
        let err = render(names::CLASSIFIER, &Context::new()).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn test_facts_block_shows_first_row() {
        let mut row = qnwis_data::Row::new();
        row.insert("rate_pct".to_string(), serde_json::json!(3.9));
        let result = qnwis_data::QueryResult {
            query_id: "unemployment_rate_latest".to_string(),
            params_used: serde_json::Map::new(),
            rows: vec![row],
            provenance: qnwis_data::Provenance {
                dataset: "LMIS".to_string(),
                source: "direct".to_string(),
            },
            freshness: qnwis_data::Freshness::now(),
            row_count: 1,
        };
        let block = facts_block(&[result]);
        assert!(block.contains("unemployment_rate_latest"));
        assert!(block.contains("3.9"));
    }
}
