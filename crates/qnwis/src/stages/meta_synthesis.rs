//! Cross-scenario synthesis.
//!
//! Consumes whatever subset of scenarios succeeded and produces a
//! comparative narrative. Provider failure degrades to a deterministic
//! summary with a warning rather than failing the stage.

use crate::error::Result;
use crate::prompts::{self, names};
use crate::stages::StageContext;
use crate::state::RunState;
use serde_json::{json, Value};

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let successes: Vec<&crate::scenario::ScenarioResult> = state
        .scenario_outcomes
        .iter()
        .filter_map(|o| o.as_success())
        .collect();

    let results_block = successes
        .iter()
        .map(|r| {
            format!(
                "## {} (success {:.2}, confidence {:.2})\n{}",
                r.scenario_id, r.success_rate, r.confidence, r.synthesis_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let successes_count = successes.len();

    let mut context = tera::Context::new();
    context.insert("question", &state.task.question_text);
    context.insert("scenario_results", &results_block);
    let prompt = prompts::render(names::META_SYNTHESIS, &context)?;

    let narrative = match ctx.provider.complete(&prompt, 1536, None).await {
        Ok(completion) => completion.text,
        Err(e) => {
            state.warn(format!("meta-synthesis degraded: {}", e.public_message()));
            results_block
        }
    };

    let payload = json!({ "scenarios_considered": successes_count });
    state.meta_synthesis = Some(narrative);
    Ok(payload)
}
