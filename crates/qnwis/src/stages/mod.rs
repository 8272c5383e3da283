//! Pipeline stages.
//!
//! Each stage is an async function over the shared [`StageContext`] and the
//! driver-owned [`RunState`]. Stages return the payload for their
//! `complete` event; the driver owns event emission, time budgets, and
//! failure routing.

mod agent_select;
mod agents;
mod classify;
mod critique;
mod debate;
mod meta_synthesis;
mod parallel_exec;
mod prefetch;
mod rag;
mod scenario_gen;
mod synthesize;
mod verify;

use crate::agent::AgentCatalog;
use crate::config::{FeatureFlags, OrchestratorConfig};
use crate::error::{Error, Result};
use crate::events::{EventSink, Stage};
use crate::providers::{CompletionProvider, ContextRetriever};
use crate::state::RunState;
use crate::task::IntentCatalog;
use qnwis_data::{DataClient, RequestContext};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Everything a stage needs besides the run state.
#[derive(Clone)]
pub struct StageContext {
    /// Service configuration
    pub config: Arc<OrchestratorConfig>,
    /// Completion provider
    pub provider: Arc<dyn CompletionProvider>,
    /// Context retriever
    pub retriever: Arc<dyn ContextRetriever>,
    /// Deterministic data client
    pub data: Arc<DataClient>,
    /// Specialist agent roster
    pub agents: Arc<AgentCatalog>,
    /// Intent catalog
    pub intents: Arc<IntentCatalog>,
    /// This run's event sink
    pub sink: EventSink,
    /// This run's cancel signal
    pub cancel: watch::Receiver<bool>,
    /// Audit identity for data accesses
    pub request_ctx: RequestContext,
    /// Effective feature flags (task override applied)
    pub flags: FeatureFlags,
}

impl StageContext {
    /// Whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Execute one stage.
pub async fn run_stage(
    stage: Stage,
    ctx: &StageContext,
    state: &mut RunState,
) -> Result<Value> {
    match stage {
        Stage::Classify => classify::run(ctx, state).await,
        Stage::Prefetch => prefetch::run(ctx, state).await,
        Stage::Rag => rag::run(ctx, state).await,
        Stage::ScenarioGen => scenario_gen::run(ctx, state).await,
        Stage::ParallelExec => parallel_exec::run(ctx, state).await,
        Stage::MetaSynthesis => meta_synthesis::run(ctx, state).await,
        Stage::AgentSelection => agent_select::run(ctx, state).await,
        Stage::Agents => agents::run(ctx, state).await,
        Stage::Debate => debate::run(ctx, state).await,
        Stage::Critique => critique::run(ctx, state).await,
        Stage::Verify => verify::run(ctx, state).await,
        Stage::Synthesize => synthesize::run(ctx, state).await,
        Stage::Done => Err(Error::Internal("done is not an executable stage".to_string())),
    }
}
