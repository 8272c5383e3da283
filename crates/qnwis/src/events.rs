//! Progress events: the orchestrator's live wire to its subscriber.
//!
//! Every run owns one ordered event channel. Stages emit at least
//! `running` on entry and `complete`/`error` on exit; streaming stages
//! additionally emit `streaming` events with chunked payloads. The stream
//! always terminates with exactly one `{stage: done, ...}` event and nothing
//! follows it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Pipeline stages, in nominal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Complexity classification of the question
    Classify,
    /// Deterministic fact prefetch
    Prefetch,
    /// Context retrieval
    Rag,
    /// Scenario generation
    ScenarioGen,
    /// Parallel scenario execution
    ParallelExec,
    /// Cross-scenario synthesis
    MetaSynthesis,
    /// Specialist agent selection
    AgentSelection,
    /// Specialist agent fan-out
    Agents,
    /// Reconciliation debate
    Debate,
    /// Critique of the debate outcome
    Critique,
    /// Claim verification
    Verify,
    /// Briefing synthesis
    Synthesize,
    /// Terminal marker
    Done,
}

impl Stage {
    /// Wire name of the stage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Prefetch => "prefetch",
            Self::Rag => "rag",
            Self::ScenarioGen => "scenario_gen",
            Self::ParallelExec => "parallel_exec",
            Self::MetaSynthesis => "meta_synthesis",
            Self::AgentSelection => "agent_selection",
            Self::Agents => "agents",
            Self::Debate => "debate",
            Self::Critique => "critique",
            Self::Verify => "verify",
            Self::Synthesize => "synthesize",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage is scheduled but not yet running
    Ready,
    /// Stage entered
    Running,
    /// Incremental output chunk
    Streaming,
    /// Stage exited successfully
    Complete,
    /// Stage exited with a failure
    Error,
}

/// One progress event, shaped per the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Stage the event belongs to
    pub stage: Stage,
    /// Status
    pub status: StageStatus,
    /// Stage-specific payload
    #[serde(default)]
    pub payload: Value,
    /// Wall time the stage spent, present on exit events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Build an event stamped now.
    #[must_use]
    pub fn new(stage: Stage, status: StageStatus, payload: Value) -> Self {
        Self {
            stage,
            status,
            payload,
            latency_ms: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a latency measurement.
    #[must_use]
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Whether this is the terminal event of a run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stage == Stage::Done
    }
}

/// Order-preserving per-run event emitter.
///
/// Cloned into every sub-task of a run; the underlying channel serializes
/// emission so subscribers observe events in emission order. The first
/// terminal event closes the sink — a straggling sub-task that publishes
/// after the run ended is dropped, so nothing ever follows `done`. A send
/// after the subscriber hung up is likewise dropped silently: progress is
/// advisory, the terminal result is what callers rely on.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    /// Create a sink and its subscriber end.
    #[must_use]
    pub fn channel() -> (Self, ProgressStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            ProgressStream {
                rx,
                terminated: false,
            },
        )
    }

    /// Emit one event.
    pub fn emit(&self, stage: Stage, status: StageStatus, payload: Value) {
        self.send(ProgressEvent::new(stage, status, payload));
    }

    /// Emit a stage-exit event with its latency.
    pub fn emit_with_latency(
        &self,
        stage: Stage,
        status: StageStatus,
        payload: Value,
        latency_ms: u64,
    ) {
        self.send(ProgressEvent::new(stage, status, payload).with_latency(latency_ms));
    }

    fn send(&self, event: ProgressEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if event.is_terminal() {
            self.closed.store(true, Ordering::Release);
        }
        if self.tx.send(event).is_err() {
            tracing::debug!("progress subscriber gone; dropping event");
        }
    }
}

/// Subscriber end of a run's event channel.
///
/// The stream ends at the first terminal event regardless of what may
/// still sit in the channel, so the wire contract holds even against
/// stragglers racing the terminal emission.
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    terminated: bool,
}

impl ProgressStream {
    /// Receive the next event; `None` after the terminal event or once the
    /// run has shut its sink.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if self.terminated {
            return None;
        }
        let event = self.rx.recv().await?;
        if event.is_terminal() {
            self.terminated = true;
        }
        Some(event)
    }

    /// Adapt into a [`futures::Stream`] for combinator pipelines.
    pub fn into_stream(self) -> impl futures::Stream<Item = ProgressEvent> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|event| (event, stream))
        })
    }

    /// Drain every remaining event, up to and including the terminal one.
    pub async fn collect_all(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }
}
