//! Critique pass over the debate outcome.
//!
//! A red-team review of the reconciled narrative against the prefetched
//! facts. The revision replaces the draft; when the provider fails the
//! draft stands, with a warning.

use crate::error::Result;
use crate::prompts::{self, names};
use crate::stages::StageContext;
use crate::state::RunState;
use serde_json::{json, Value};

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let draft = state
        .debate_narrative
        .clone()
        .or_else(|| state.meta_synthesis.clone())
        .unwrap_or_default();

    let mut context = tera::Context::new();
    context.insert("draft", &draft);
    context.insert("facts", &prompts::facts_block(&state.prefetched));
    let prompt = prompts::render(names::CRITIQUE, &context)?;

    let revised = match ctx.provider.complete(&prompt, 1536, None).await {
        Ok(completion) if !completion.text.trim().is_empty() => completion.text,
        Ok(_) => draft.clone(),
        Err(e) => {
            state.warn(format!("critique degraded: {}", e.public_message()));
            draft.clone()
        }
    };

    let payload = json!({ "revised": revised != draft });
    state.critique_narrative = Some(revised);
    Ok(payload)
}
