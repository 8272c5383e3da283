//! Scenario generation.
//!
//! Complex runs analyse a single scenario; critical runs generate a set
//! sized by the requested depth. When the provider is down or replies with
//! something unparseable, a deterministic assumption sweep stands in so the
//! pipeline keeps moving, with a warning attached.

use crate::agent::extract_json;
use crate::error::Result;
use crate::graph::Complexity;
use crate::prompts::{self, names};
use crate::scenario::Scenario;
use crate::stages::StageContext;
use crate::state::RunState;
use serde_json::{json, Value};

#[derive(serde::Deserialize)]
struct RawScenario {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    assumptions: serde_json::Map<String, Value>,
}

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let count = match state.complexity {
        Some(Complexity::Critical) => state.task.depth.scenario_count(),
        _ => 1,
    };

    let mut context = tera::Context::new();
    context.insert("question", &state.task.question_text);
    context.insert("count", &count);
    context.insert("facts", &prompts::facts_block(&state.prefetched));
    let prompt = prompts::render(names::SCENARIO_GEN, &context)?;

    let generated = match ctx.provider.complete(&prompt, 2048, None).await {
        Ok(completion) => parse_scenarios(&completion.text),
        Err(e) => {
            state.warn(format!(
                "scenario generation degraded: {}",
                e.public_message()
            ));
            None
        }
    };

    let mut scenarios: Vec<Scenario> = match generated {
        Some(raw) => raw
            .into_iter()
            .enumerate()
            .map(|(i, r)| Scenario {
                scenario_id: format!("s{i}"),
                name: r.name,
                description: r.description,
                assumptions: r.assumptions,
            })
            .collect(),
        None => fallback_scenarios(count),
    };
    scenarios.truncate(count);
    while scenarios.len() < count {
        let next = scenarios.len();
        scenarios.push(fallback_scenario(next));
    }

    let payload = json!({
        "count": scenarios.len(),
        "names": scenarios.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
    });
    state.scenarios = scenarios;
    Ok(payload)
}

fn parse_scenarios(reply: &str) -> Option<Vec<RawScenario>> {
    let value = extract_json(reply)?;
    let raw: Vec<RawScenario> =
        serde_json::from_value(value.get("scenarios")?.clone()).ok()?;
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

/// Deterministic assumption sweep used when generation degrades.
fn fallback_scenarios(count: usize) -> Vec<Scenario> {
    (0..count).map(fallback_scenario).collect()
}

fn fallback_scenario(index: usize) -> Scenario {
    let (name, description, delta) = match index % 3 {
        0 => ("baseline", "Current policy settings continue unchanged.", 0.0),
        1 => ("accelerated", "Policy levers applied at the upper bound.", 0.2),
        _ => ("constrained", "Budget and uptake at the lower bound.", -0.2),
    };
    let mut assumptions = serde_json::Map::new();
    assumptions.insert("uptake_delta".to_string(), json!(delta));
    Scenario {
        scenario_id: format!("s{index}"),
        name: format!("{name}-{index}"),
        description: description.to_string(),
        assumptions,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenarios() {
        let reply = r#"{"scenarios": [{"name": "baseline", "description": "d", "assumptions": {"x": 1}}]}"#;
        let parsed = parse_scenarios(reply).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "baseline");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(parse_scenarios(r#"{"scenarios": []}"#).is_none());
        assert!(parse_scenarios("not json").is_none());
    }

    #[test]
    fn test_fallback_ids_are_sequential() {
        let scenarios = fallback_scenarios(4);
        for (i, s) in scenarios.iter().enumerate() {
            assert_eq!(s.scenario_id, format!("s{i}"));
        }
    }
}
