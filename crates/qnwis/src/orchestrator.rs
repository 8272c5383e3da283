//! The pipeline orchestrator.
//!
//! One driver task per request pumps the state machine in a tail loop:
//! emit `running`, execute the stage under its budget, emit
//! `complete`/`error`, and route. Failure routing is uniform — any stage
//! error transitions straight to `done` with a sanitized payload — and the
//! event stream always terminates with exactly one `done` event.
//!
//! Cancellation is cooperative: `cancel(request_id)` flips a per-run watch
//! flag that every sub-task observes at its next suspension point.

use crate::agent::AgentCatalog;
use crate::briefing::{BriefingResult, DeterministicFields, FailureReport};
use crate::config::{FeatureFlags, OrchestratorConfig};
use crate::error::{Error, Result};
use crate::events::{EventSink, ProgressStream, Stage, StageStatus};
use crate::executor::cancelled_signal;
use crate::graph::{next_stage, Complexity};
use crate::providers::{CompletionProvider, ContextRetriever, NullRetriever};
use crate::stages::{self, StageContext};
use crate::state::RunState;
use crate::task::{IntentCatalog, Task};
use dashmap::DashMap;
use qnwis_data::{DataClient, RequestContext};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to one in-flight run.
pub struct RunHandle {
    request_id: String,
    events: Option<ProgressStream>,
    result: JoinHandle<std::result::Result<BriefingResult, FailureReport>>,
}

impl RunHandle {
    /// The run's request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Take the progress stream; consumable once, concurrently with
    /// [`RunHandle::outcome`].
    pub fn take_events(&mut self) -> Option<ProgressStream> {
        self.events.take()
    }

    /// Await the terminal result.
    pub async fn outcome(self) -> std::result::Result<BriefingResult, FailureReport> {
        let request_id = self.request_id.clone();
        match self.result.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                tracing::error!(request_id = %request_id, error = %join_err, "driver task died");
                Err(FailureReport::from_error(
                    &request_id,
                    &Error::Internal(join_err.to_string()),
                ))
            }
        }
    }
}

/// The orchestrator service.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    provider: Arc<dyn CompletionProvider>,
    retriever: Arc<dyn ContextRetriever>,
    data: Arc<DataClient>,
    agents: Arc<AgentCatalog>,
    intents: Arc<IntentCatalog>,
    runs: Arc<DashMap<String, watch::Sender<bool>>>,
}

impl Orchestrator {
    /// Build an orchestrator over its collaborators. The retriever defaults
    /// to null (rag completes empty) and the rosters to the standard sets.
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn CompletionProvider>,
        data: Arc<DataClient>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            provider,
            retriever: Arc::new(NullRetriever),
            data,
            agents: Arc::new(AgentCatalog::standard()),
            intents: Arc::new(IntentCatalog::standard()),
            runs: Arc::new(DashMap::new()),
        })
    }

    /// Use a real context retriever.
    #[must_use]
    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    /// Replace the agent roster.
    #[must_use]
    pub fn with_agents(mut self, agents: AgentCatalog) -> Self {
        self.agents = Arc::new(agents);
        self
    }

    /// Replace the intent catalog.
    #[must_use]
    pub fn with_intents(mut self, intents: IntentCatalog) -> Self {
        self.intents = Arc::new(intents);
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a run. Returns immediately; progress flows on the handle's
    /// event stream and the terminal result resolves when the run ends.
    ///
    /// Entry validation happens here, before any stage is scheduled: a task
    /// with an unknown intent or bad parameters yields a stream holding the
    /// single terminal event and touches nothing else.
    pub fn run(&self, task: Task) -> RunHandle {
        let request_id = task.request_id.clone();
        let (sink, stream) = EventSink::channel();

        let flags = task
            .feature_flags
            .clone()
            .unwrap_or_else(|| self.config.feature_flags.clone());
        let mut state = RunState::new(task);

        if let Err(e) = self.admit(&mut state) {
            let failure = FailureReport::from_error(&request_id, &e);
            sink.emit(Stage::Done, StageStatus::Error, failure.to_payload());
            tracing::warn!(request_id = %request_id, code = %failure.code, "task rejected");
            let result =
                tokio::spawn(async move { Err::<BriefingResult, FailureReport>(failure) });
            return RunHandle {
                request_id,
                events: Some(stream),
                result,
            };
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.runs.insert(request_id.clone(), cancel_tx);

        let ctx = StageContext {
            config: Arc::clone(&self.config),
            provider: Arc::clone(&self.provider),
            retriever: Arc::clone(&self.retriever),
            data: Arc::clone(&self.data),
            agents: Arc::clone(&self.agents),
            intents: Arc::clone(&self.intents),
            sink: sink.clone(),
            cancel: cancel_rx.clone(),
            request_ctx: RequestContext {
                request_id: request_id.clone(),
                user_id: state.task.user_id.clone(),
            },
            flags: flags.clone(),
        };

        let runs = Arc::clone(&self.runs);
        let driver_request_id = request_id.clone();
        let result = tokio::spawn(async move {
            let outcome =
                drive(ctx, state, flags, sink, cancel_rx, &driver_request_id).await;
            runs.remove(&driver_request_id);
            outcome
        });

        RunHandle {
            request_id,
            events: Some(stream),
            result,
        }
    }

    /// Cancel a run. Idempotent; unknown ids are a no-op.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.runs.get(request_id) {
            Some(entry) => entry.send(true).is_ok(),
            None => false,
        }
    }

    /// Entry validation: intent registered and enabled, params valid.
    fn admit(&self, state: &mut RunState) -> Result<()> {
        let intent_name = state.task.intent.clone();
        if !self.config.enabled_intents.is_empty()
            && !self.config.enabled_intents.contains(&intent_name)
        {
            return Err(Error::UnknownIntent(intent_name));
        }
        let intent = self.intents.get(&intent_name)?;
        state.effective_params = intent.validate_params(&state.task.params)?;
        Ok(())
    }
}

/// The driver loop: pump stages until `done`, enforcing budgets and the
/// exactly-one-terminal-event contract.
async fn drive(
    ctx: StageContext,
    mut state: RunState,
    flags: FeatureFlags,
    sink: EventSink,
    mut cancel: watch::Receiver<bool>,
    request_id: &str,
) -> std::result::Result<BriefingResult, FailureReport> {
    let run_started = Instant::now();
    let mut current = Stage::Classify;

    loop {
        if *cancel.borrow() {
            return Err(finish_error(&sink, request_id, &Error::Cancelled));
        }

        sink.emit(current, StageStatus::Running, json!({}));
        let stage_started = Instant::now();
        // Fan-out stages are budgeted by their inner timeouts, which already
        // bound each unit of work; everything else gets the per-stage budget.
        let budget = match current {
            Stage::ParallelExec => ctx.config.timeouts.scenario + ctx.config.timeouts.stage,
            Stage::Agents => ctx.config.timeouts.stage + ctx.config.timeouts.agent * 2,
            _ => ctx.config.timeouts.stage,
        };

        let stage_result = tokio::select! {
            outcome = tokio::time::timeout(budget, stages::run_stage(current, &ctx, &mut state)) => {
                match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::StageTimeout {
                        stage: current,
                        budget_ms: budget.as_millis() as u64,
                    }),
                }
            }
            () = cancelled_signal(&mut cancel) => Err(Error::Cancelled),
        };
        let latency_ms = stage_started.elapsed().as_millis() as u64;

        match stage_result {
            Ok(payload) => {
                sink.emit_with_latency(current, StageStatus::Complete, payload, latency_ms);
            }
            Err(e) => {
                let reason = match &e {
                    Error::StageTimeout { .. } => "timeout",
                    Error::Cancelled => "cancelled",
                    _ => "failure",
                };
                sink.emit_with_latency(
                    current,
                    StageStatus::Error,
                    json!({ "reason": reason, "code": e.public_code() }),
                    latency_ms,
                );
                let terminal = match e {
                    Error::Cancelled
                    | Error::StageTimeout { .. }
                    | Error::VerificationFailed(_) => e,
                    other => Error::StageFailure {
                        stage: current,
                        cause: Box::new(other),
                    },
                };
                return Err(finish_error(&sink, request_id, &terminal));
            }
        }

        let complexity = state.complexity.unwrap_or(Complexity::Simple);
        match next_stage(current, complexity, &flags) {
            Some(Stage::Done) | None => break,
            Some(next) => current = next,
        }
    }

    let briefing = build_briefing(&state);
    sink.emit_with_latency(
        Stage::Done,
        StageStatus::Complete,
        json!({
            "request_id": request_id,
            "complexity": state.complexity.map(Complexity::as_str),
            "warnings": briefing.warnings.len(),
        }),
        run_started.elapsed().as_millis() as u64,
    );
    tracing::info!(
        request_id = %request_id,
        elapsed_ms = run_started.elapsed().as_millis() as u64,
        warnings = briefing.warnings.len(),
        "run complete"
    );
    Ok(briefing)
}

fn finish_error(sink: &EventSink, request_id: &str, error: &Error) -> FailureReport {
    let failure = FailureReport::from_error(request_id, error);
    sink.emit(Stage::Done, StageStatus::Error, failure.to_payload());
    tracing::warn!(
        request_id = %request_id,
        code = %failure.code,
        "run failed"
    );
    failure
}

fn build_briefing(state: &RunState) -> BriefingResult {
    let complexity = state.complexity.unwrap_or(Complexity::Simple);
    let confidence = if state.agent_reports.is_empty() {
        match complexity {
            Complexity::Simple => 0.95,
            _ => 0.6,
        }
    } else {
        let mean = state.agent_reports.iter().map(|r| r.confidence).sum::<f64>()
            / state.agent_reports.len() as f64;
        mean.clamp(0.0, 1.0)
    };

    BriefingResult {
        request_id: state.task.request_id.clone(),
        narrative: state.synthesis.clone().unwrap_or_default(),
        complexity,
        confidence,
        warnings: state.warnings.clone(),
        deterministic_fields: DeterministicFields::from_results(
            &state.prefetched,
            state.verification.clone(),
        ),
    }
}
