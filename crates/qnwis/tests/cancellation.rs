//! Cancellation semantics: prompt termination, terminal event shape, and
//! no post-terminal events.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use qnwis::prelude::*;
use qnwis::Depth;
use qnwis_testing::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn slow_critical_provider() -> MockProvider {
    let scenarios: Vec<serde_json::Value> = (0..6)
        .map(|i| {
            json!({
                "name": format!("variant-{i}"),
                "description": "assumption sweep",
                "assumptions": {}
            })
        })
        .collect();
    MockProvider::new()
        .on("routing classifier", classifier_reply("critical"))
        .on("Generate", json!({ "scenarios": scenarios }).to_string())
        .on("advising the minister", verified_agent_reply())
        .with_delay(Duration::from_millis(150))
}

#[tokio::test]
async fn test_cancel_during_scenarios_terminates_promptly() {
    let (data, _audit) = standard_data_client(standard_engine());
    let orchestrator = Arc::new(
        Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(slow_critical_provider()),
            data,
        )
        .unwrap(),
    );

    let task = Task::new(
        "Should we accelerate qatarization across sectors?",
        "strategy.policy_analysis",
    )
    .with_param("topic", json!("qatarization"))
    .with_depth(Depth::Legendary);
    let request_id = task.request_id.clone();

    let mut handle = orchestrator.run(task);
    let mut events = handle.take_events().unwrap();

    // Wait until the fan-out is underway, then cancel.
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        let reached_fanout =
            event.stage == Stage::ParallelExec && event.status == StageStatus::Streaming;
        seen.push(event);
        if reached_fanout {
            break;
        }
    }
    assert!(orchestrator.cancel(&request_id));
    // Cancelling twice is a no-op, not an error.
    orchestrator.cancel(&request_id);

    let failure = tokio::time::timeout(Duration::from_secs(2), handle.outcome())
        .await
        .expect("run did not terminate within the grace window")
        .unwrap_err();
    assert_eq!(failure.code, "Cancelled");

    // Drain what is left; the stream must end with the single terminal event.
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    let last = seen.last().unwrap();
    assert_eq!(last.stage, Stage::Done);
    assert_eq!(last.status, StageStatus::Error);
    assert_eq!(last.payload["code"], "Cancelled");
    assert_eq!(
        seen.iter().filter(|e| e.stage == Stage::Done).count(),
        1,
        "exactly one terminal event"
    );
}

#[tokio::test]
async fn test_cancel_unknown_run_is_noop() {
    let (data, _audit) = standard_data_client(standard_engine());
    let orchestrator = Arc::new(
        Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(MockProvider::new()),
            data,
        )
        .unwrap(),
    );
    assert!(!orchestrator.cancel("no-such-run"));
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let provider = MockProvider::new().on("routing classifier", classifier_reply("simple"));
    let (data, _audit) = standard_data_client(standard_engine());
    let orchestrator = Arc::new(
        Orchestrator::new(OrchestratorConfig::default(), Arc::new(provider), data).unwrap(),
    );

    let task = Task::new("What is the latest unemployment rate?", "pattern.latest_rate")
        .with_param("metric", json!("unemployment"));
    let request_id = task.request_id.clone();

    let handle = orchestrator.run(task);
    handle.outcome().await.unwrap();
    assert!(!orchestrator.cancel(&request_id), "run registry entry removed");
}
