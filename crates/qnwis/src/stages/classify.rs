//! Complexity classification.
//!
//! The classifier asks the provider for a complexity level and falls back
//! to a deterministic heuristic when the reply does not parse or the
//! provider is down — classification itself never fails a run. Routing
//! decisions are based purely on this stage's output, never on provider
//! identity.

use crate::agent::extract_json;
use crate::error::Result;
use crate::graph::Complexity;
use crate::prompts::{self, names};
use crate::stages::StageContext;
use crate::state::RunState;
use crate::task::Depth;
use serde_json::{json, Value};

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let mut context = tera::Context::new();
    context.insert("question", &state.task.question_text);
    context.insert("intent", &state.task.intent);
    let prompt = prompts::render(names::CLASSIFIER, &context)?;

    let (mut complexity, source) = match ctx.provider.complete(&prompt, 128, None).await {
        Ok(completion) => match parse_complexity(&completion.text) {
            Some(level) => (level, "model"),
            None => (heuristic(state), "heuristic"),
        },
        Err(e) => {
            tracing::debug!(error = %e, "classifier provider unavailable; using heuristic");
            (heuristic(state), "heuristic")
        }
    };

    // Legendary depth always gets the full fan-out.
    if state.task.depth == Depth::Legendary && complexity.runs_scenarios() {
        complexity = Complexity::Critical;
    }

    state.complexity = Some(complexity);
    tracing::info!(
        request_id = %state.task.request_id,
        complexity = complexity.as_str(),
        source,
        "classified"
    );
    Ok(json!({ "complexity": complexity.as_str(), "source": source }))
}

fn parse_complexity(reply: &str) -> Option<Complexity> {
    let value = extract_json(reply)?;
    match value.get("complexity")?.as_str()? {
        "simple" => Some(Complexity::Simple),
        "medium" => Some(Complexity::Medium),
        "complex" => Some(Complexity::Complex),
        "critical" => Some(Complexity::Critical),
        _ => None,
    }
}

/// Deterministic fallback: intent family plus prefetch breadth.
fn heuristic(state: &RunState) -> Complexity {
    let intent = state.task.intent.as_str();
    if intent.starts_with("strategy.") {
        return if state.task.depth == Depth::Standard {
            Complexity::Complex
        } else {
            Complexity::Critical
        };
    }
    if intent.starts_with("compare.") {
        return Complexity::Medium;
    }
    let question = state.task.question_text.to_lowercase();
    if question.contains("scenario") || question.contains("should we") {
        return Complexity::Complex;
    }
    Complexity::Simple
}
