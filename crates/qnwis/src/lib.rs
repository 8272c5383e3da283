//! # QNWIS Decision-Support Orchestrator
//!
//! Drives a policy question through a staged analysis pipeline — classify,
//! prefetch deterministic facts, retrieve context, generate and execute
//! scenarios, run specialist agents, debate, critique, verify, synthesize —
//! streaming typed progress events along the way and terminating with a
//! briefing or a structured failure.
//!
//! The split of responsibilities:
//!
//! - **Deterministic data** lives in the `qnwis-data` crate; agents never
//!   query it directly. Facts are prefetched and handed to agents as text.
//! - **Non-deterministic agents** produce narratives; the claim verifier
//!   binds every number in those narratives back to the prefetched facts.
//! - **The orchestrator** owns the state machine, budgets, cancellation,
//!   and the event stream contract (exactly one terminal `done` event).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use qnwis::prelude::*;
//! use std::sync::Arc;
//!
//! let orchestrator = Arc::new(Orchestrator::new(config, provider, data)?);
//! let mut handle = orchestrator.run(Task::new(
//!     "What is the latest unemployment rate?",
//!     "pattern.latest_rate",
//! ).with_param("metric", "unemployment".into()));
//!
//! let mut events = handle.take_events().unwrap();
//! while let Some(event) = events.recv().await {
//!     println!("{} {:?}", event.stage, event.status);
//! }
//! let briefing = handle.outcome().await?;
//! ```

pub mod agent;
pub mod briefing;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod scenario;
pub mod stages;
pub mod state;
pub mod task;
pub mod verifier;

pub use agent::{AgentCatalog, AgentHarness, AgentReport, AgentSpec, Citation};
pub use briefing::{BriefingResult, DeterministicFields, ExecutedQuery, FailureReport};
pub use config::{
    CacheSettings, FeatureFlags, OrchestratorConfig, ScenarioSettings, Timeouts,
    VerificationConfig,
};
pub use error::{Error, Result};
pub use events::{EventSink, ProgressEvent, ProgressStream, Stage, StageStatus};
pub use executor::{ScenarioExecutor, ScenarioProgress};
pub use graph::{next_stage, route, Complexity};
pub use orchestrator::{Orchestrator, RunHandle};
pub use providers::{
    Completion, CompletionProvider, CompletionStream, ContextRetriever, NullRetriever,
    RetrievedSnippet, Usage,
};
pub use scenario::{Scenario, ScenarioFailure, ScenarioOutcome, ScenarioResult};
pub use state::{RunState, StateView};
pub use task::{Depth, IntentCatalog, IntentParam, IntentSpec, Task};
pub use verifier::{
    ClaimBinding, ClaimUnit, IssueCode, NumericClaim, Severity, VerificationIssue,
    VerificationReport, Verifier,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AgentCatalog, BriefingResult, Complexity, CompletionProvider, ContextRetriever,
        FailureReport, FeatureFlags, IntentCatalog, Orchestrator, OrchestratorConfig,
        ProgressEvent, RunHandle, Stage, StageStatus, Task, VerificationReport, Verifier,
    };
}
