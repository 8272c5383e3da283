//! Parallel scenario execution.
//!
//! Each scenario runs the inner "agents → debate → critique" sub-pipeline
//! in isolation, under the bounded executor with affinity slots. One
//! scenario failing leaves the rest running; only a batch with zero
//! successes fails the stage.

use crate::agent::{AgentHarness, AgentReport, AgentSpec};
use crate::config::ScenarioSettings;
use crate::error::{Error, Result};
use crate::executor::{ScenarioExecutor, ScenarioProgress};
use crate::graph::Complexity;
use crate::prompts::{self, names};
use crate::providers::CompletionProvider;
use crate::scenario::{Scenario, ScenarioResult};
use crate::stages::StageContext;
use crate::state::{RunState, StateView};
use qnwis_data::RequestContext;
use serde_json::{json, Value};
use std::sync::Arc;

/// How many specialists run inside each scenario. The top-level agent
/// stage runs the full roster; scenarios keep their inner pipeline lean.
const AGENTS_PER_SCENARIO: usize = 2;

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let serial = state.complexity == Some(Complexity::Complex)
        || !ctx.flags.enable_parallel_scenarios;
    let settings = if serial {
        ScenarioSettings {
            parallelism: 1,
            affinity_pool_size: ctx.config.scenarios.affinity_pool_size.max(1),
        }
    } else {
        ctx.config.scenarios.clone()
    };
    let executor = ScenarioExecutor::new(&settings, ctx.config.timeouts.scenario)?;

    let intent_tags = ctx.intents.get(&state.task.intent)?.tags.clone();
    let specs: Vec<AgentSpec> = ctx
        .agents
        .select(&intent_tags)
        .into_iter()
        .take(AGENTS_PER_SCENARIO)
        .cloned()
        .collect();

    let view = state.view();
    let provider = Arc::clone(&ctx.provider);
    let harness = Arc::new(AgentHarness::new(
        Arc::clone(&ctx.provider),
        Arc::clone(&ctx.data),
        ctx.config.verification.clone(),
        ctx.config.timeouts.agent,
    ));
    let request_ctx = ctx.request_ctx.clone();

    let work_fn = move |scenario: Scenario, _slot: usize, progress: ScenarioProgress| {
        let view = view.clone();
        let provider = Arc::clone(&provider);
        let harness = Arc::clone(&harness);
        let specs = specs.clone();
        let request_ctx = request_ctx.clone();
        async move {
            run_scenario_pipeline(scenario, &view, provider, &harness, &specs, &request_ctx, &progress)
                .await
        }
    };

    let outcomes = executor
        .execute(
            state.scenarios.clone(),
            work_fn,
            ctx.cancel.clone(),
            &ctx.sink,
        )
        .await;

    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let succeeded = outcomes.iter().filter(|o| o.as_success().is_some()).count();
    let failed = outcomes.len() - succeeded;
    if succeeded == 0 {
        return Err(Error::ScenarioFailure {
            scenario_id: "*".to_string(),
            reason: format!("all {} scenario(s) failed", outcomes.len()),
        });
    }
    for outcome in &outcomes {
        if let crate::scenario::ScenarioOutcome::Failure(failure) = outcome {
            state.warn(format!(
                "scenario '{}' failed: {}",
                failure.scenario_id, failure.reason
            ));
        }
    }

    let payload = json!({
        "total": outcomes.len(),
        "succeeded": succeeded,
        "failed": failed,
        "parallelism": settings.parallelism,
    });
    state.scenario_outcomes = outcomes;
    Ok(payload)
}

/// The inner sub-pipeline: specialists analyse the scenario, a debate
/// reconciles them, a critique pass tightens the result.
async fn run_scenario_pipeline(
    scenario: Scenario,
    view: &StateView,
    provider: Arc<dyn CompletionProvider>,
    harness: &AgentHarness,
    specs: &[AgentSpec],
    request_ctx: &RequestContext,
    progress: &ScenarioProgress,
) -> Result<ScenarioResult> {
    // Scenario assumptions overlay the task parameters.
    let mut params = (*view.effective_params).clone();
    for (key, value) in &scenario.assumptions {
        params.insert(key.clone(), value.clone());
    }

    let question = format!(
        "{}\nScenario '{}': {}",
        view.question_text, scenario.name, scenario.description
    );

    progress.publish("agents", 20);
    let mut reports: Vec<AgentReport> = Vec::new();
    for spec in specs {
        match harness
            .run(request_ctx, spec, &question, &params, &view.prefetched)
            .await
        {
            Ok(report) => reports.push(report),
            Err(e) => {
                tracing::warn!(
                    scenario_id = %scenario.scenario_id,
                    agent = %spec.name,
                    error = %e,
                    "scenario agent failed"
                );
            }
        }
    }
    if reports.is_empty() {
        return Err(Error::ScenarioFailure {
            scenario_id: scenario.scenario_id,
            reason: "no agent produced a report".to_string(),
        });
    }

    progress.publish("debate", 60);
    let reports_block = reports_block(&reports);
    let debate = {
        let mut context = tera::Context::new();
        context.insert("question", &question);
        context.insert("reports", &reports_block);
        let prompt = prompts::render(names::DEBATE, &context)?;
        match provider.complete(&prompt, 1024, None).await {
            Ok(completion) => completion.text,
            Err(_) => reports_block.clone(),
        }
    };

    progress.publish("critique", 80);
    let synthesis_text = {
        let mut context = tera::Context::new();
        context.insert("draft", &debate);
        context.insert("facts", &prompts::facts_block(&view.prefetched));
        let prompt = prompts::render(names::CRITIQUE, &context)?;
        match provider.complete(&prompt, 1024, None).await {
            Ok(completion) => completion.text,
            Err(_) => debate.clone(),
        }
    };

    let mean_confidence =
        reports.iter().map(|r| r.confidence).sum::<f64>() / reports.len() as f64;
    let findings = reports
        .iter()
        .flat_map(|r| r.findings.iter().cloned())
        .collect();

    Ok(ScenarioResult {
        scenario_id: scenario.scenario_id,
        success_rate: mean_confidence.clamp(0.0, 1.0),
        confidence: mean_confidence.clamp(0.0, 1.0),
        findings,
        synthesis_text,
        sensitivity_drivers: scenario.assumptions.keys().cloned().collect(),
    })
}

fn reports_block(reports: &[AgentReport]) -> String {
    reports
        .iter()
        .map(|r| format!("## {} (confidence {:.2})\n{}", r.agent_name, r.confidence, r.narrative))
        .collect::<Vec<_>>()
        .join("\n\n")
}
