//! Reconciliation debate.
//!
//! A moderator pass consumes the agent reports and emits one reconciled
//! narrative, streamed to the subscriber chunk by chunk. The reconciled
//! text is itself verified downstream, so a degraded (concatenated)
//! fallback is safe when the provider fails.

use crate::error::Result;
use crate::events::{Stage, StageStatus};
use crate::prompts::{self, names};
use crate::stages::StageContext;
use crate::state::RunState;
use futures::StreamExt;
use serde_json::{json, Value};

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let reports_block = state
        .agent_reports
        .iter()
        .map(|r| {
            let warnings = if r.warnings.is_empty() {
                "none".to_string()
            } else {
                r.warnings.join("; ")
            };
            format!(
                "## {} (confidence {:.2})\n{}\nWarnings: {}",
                r.agent_name, r.confidence, r.narrative, warnings
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut context = tera::Context::new();
    context.insert("question", &state.task.question_text);
    context.insert("reports", &reports_block);
    let prompt = prompts::render(names::DEBATE, &context)?;

    let narrative = match ctx.provider.complete_streaming(&prompt, 1536, None).await {
        Ok(mut stream) => {
            let mut assembled = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(text) => {
                        ctx.sink.emit(
                            Stage::Debate,
                            StageStatus::Streaming,
                            json!({ "chunk": text }),
                        );
                        assembled.push_str(&text);
                    }
                    Err(e) => {
                        state.warn(format!("debate stream broke: {}", e.public_message()));
                        break;
                    }
                }
            }
            if assembled.is_empty() {
                reports_block
            } else {
                assembled
            }
        }
        Err(e) => {
            state.warn(format!("debate degraded: {}", e.public_message()));
            reports_block
        }
    };

    let payload = json!({ "reports_considered": state.agent_reports.len() });
    state.debate_narrative = Some(narrative);
    Ok(payload)
}
