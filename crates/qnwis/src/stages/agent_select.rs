//! Specialist agent selection.
//!
//! Deterministic: agents are chosen by intent tag overlap, never by the
//! provider. The fan-out stage honors whatever is selected here.

use crate::error::Result;
use crate::stages::StageContext;
use crate::state::RunState;
use serde_json::{json, Value};

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let intent = ctx.intents.get(&state.task.intent)?;
    let selected: Vec<String> = ctx
        .agents
        .select(&intent.tags)
        .into_iter()
        .map(|spec| spec.name.clone())
        .collect();

    let payload = json!({
        "agents": selected,
        "concurrency": ctx.config.agent_concurrency(selected.len()),
    });
    state.selected_agents = selected;
    Ok(payload)
}
