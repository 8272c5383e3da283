//! Specialist agent fan-out.
//!
//! Agents run in parallel under a per-run concurrency cap, each against the
//! same prefetched facts. Individual failures become warnings; the stage
//! only fails when no agent produces a report. Before the fan-out, every
//! selected agent's selectable queries are folded into the run's fact set
//! so the verify stage judges narratives against exactly what agents saw.

use crate::agent::{AgentHarness, AgentSpec};
use crate::error::{Error, Result};
use crate::stages::StageContext;
use crate::state::RunState;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let intent = ctx.intents.get(&state.task.intent)?;
    let specs: Vec<AgentSpec> = if state.selected_agents.is_empty() {
        ctx.agents.select(&intent.tags).into_iter().cloned().collect()
    } else {
        state
            .selected_agents
            .iter()
            .filter_map(|name| ctx.agents.get(name))
            .cloned()
            .collect()
    };
    if specs.is_empty() {
        return Err(Error::Internal("no agents selected".to_string()));
    }

    extend_facts(ctx, state, &specs).await;

    let harness = Arc::new(AgentHarness::new(
        Arc::clone(&ctx.provider),
        Arc::clone(&ctx.data),
        ctx.config.verification.clone(),
        ctx.config.timeouts.agent,
    ));
    let limit = ctx.config.agent_concurrency(specs.len());
    let semaphore = Arc::new(Semaphore::new(limit));
    let view = state.view();

    let mut handles = Vec::with_capacity(specs.len());
    for spec in specs {
        let harness = Arc::clone(&harness);
        let semaphore = Arc::clone(&semaphore);
        let view = view.clone();
        let request_ctx = ctx.request_ctx.clone();
        let mut cancel = ctx.cancel.clone();
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return Err(Error::Cancelled);
            };
            tokio::select! {
                report = harness.run(
                    &request_ctx,
                    &spec,
                    &view.question_text,
                    &view.effective_params,
                    &view.prefetched,
                ) => report,
                () = crate::executor::cancelled_signal(&mut cancel) => Err(Error::Cancelled),
            }
        }));
    }

    let mut reports = Vec::new();
    let mut failures = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                if matches!(e, Error::VerificationFailed(_)) {
                    // Strict verification propagates immediately.
                    return Err(e);
                }
                failures.push(e.public_message());
            }
            Err(join_err) => failures.push(format!("agent task aborted: {join_err}")),
        }
    }

    if reports.is_empty() {
        return Err(Error::AgentFailure {
            agent: "*".to_string(),
            reason: format!("all agents failed ({})", failures.join("; ")),
        });
    }
    for failure in &failures {
        state.warn(format!("agent failed: {failure}"));
    }

    let payload = json!({
        "agents": reports.iter().map(|r| r.agent_name.clone()).collect::<Vec<_>>(),
        "failed": failures.len(),
    });
    state.agent_reports = reports;
    Ok(payload)
}

/// Fetch any selectable query not already prefetched, so agents and the
/// verifier share one fact set.
async fn extend_facts(ctx: &StageContext, state: &mut RunState, specs: &[AgentSpec]) {
    let mut have: HashSet<String> = state
        .prefetched
        .iter()
        .map(|r| r.query_id.clone())
        .collect();

    for spec in specs {
        for query_id in &spec.selectable_query_ids {
            if have.contains(query_id) {
                continue;
            }
            let Ok(def) = ctx.data.registry().get(query_id) else {
                continue;
            };
            let forwarded: serde_json::Map<String, Value> = state
                .effective_params
                .iter()
                .filter(|(name, _)| def.parameter(name).is_some())
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            match ctx.data.execute(&ctx.request_ctx, query_id, &forwarded).await {
                Ok(result) => {
                    have.insert(query_id.clone());
                    state.prefetched.push(result);
                }
                Err(e) => {
                    state.warn(format!(
                        "agent evidence '{query_id}' unavailable: {}",
                        Error::from(e).public_message()
                    ));
                }
            }
        }
    }
}
