//! Deterministic fact prefetch.
//!
//! Executes every query the intent declares, before any agent runs. A
//! backend failure here is fatal: the rest of the pipeline is meaningless
//! without ground truth. Results past their freshness SLA attach a warning
//! instead of failing.

use crate::error::Result;
use crate::stages::StageContext;
use crate::state::RunState;
use serde_json::{json, Value};

pub(super) async fn run(ctx: &StageContext, state: &mut RunState) -> Result<Value> {
    let intent = ctx.intents.get(&state.task.intent)?;

    let mut fetched = Vec::with_capacity(intent.prefetch_queries.len());
    for query_id in &intent.prefetch_queries {
        let def = ctx.data.registry().get(query_id)?;
        let forwarded: serde_json::Map<String, Value> = state
            .effective_params
            .iter()
            .filter(|(name, _)| def.parameter(name).is_some())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let result = ctx.data.execute(&ctx.request_ctx, query_id, &forwarded).await?;
        if result.freshness.age_seconds > def.freshness_sla_seconds as i64 {
            state.warn(format!(
                "stale data: '{query_id}' is {}s old (SLA {}s)",
                result.freshness.age_seconds, def.freshness_sla_seconds
            ));
        }
        fetched.push(result);
    }

    let payload = json!({
        "query_ids": fetched.iter().map(|r| r.query_id.clone()).collect::<Vec<_>>(),
        "total_rows": fetched.iter().map(|r| r.row_count).sum::<usize>(),
    });
    state.prefetched = fetched;
    Ok(payload)
}
