//! Parallel scenario executor.
//!
//! A pool of W workers pulls scenarios from a bounded queue (capacity 2·W,
//! so generation throttles to executor throughput). Each worker claims an
//! exclusive affinity slot for the duration of one scenario — the slot is an
//! opaque integer; the executor guarantees mutual exclusion but does not
//! know what it maps to. Results come back in input order regardless of
//! completion order, with failures in place so the batch shape is stable.

use crate::config::ScenarioSettings;
use crate::error::{Error, Result};
use crate::events::{EventSink, Stage, StageStatus};
use crate::scenario::{Scenario, ScenarioFailure, ScenarioOutcome, ScenarioResult};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Pool of exclusive affinity slots.
#[derive(Clone)]
struct AffinityPool {
    free: Arc<Mutex<VecDeque<usize>>>,
}

impl AffinityPool {
    fn new(size: usize) -> Self {
        Self {
            free: Arc::new(Mutex::new((0..size).collect())),
        }
    }

    /// Claim a slot. With `W ≤ |P|` a worker always finds one free.
    fn acquire(&self) -> Result<AffinityGuard> {
        let slot = self
            .free
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Internal("affinity pool exhausted".to_string()))?;
        Ok(AffinityGuard {
            slot,
            pool: Arc::clone(&self.free),
        })
    }
}

/// Exclusive hold on one affinity slot; returns it on drop.
struct AffinityGuard {
    slot: usize,
    pool: Arc<Mutex<VecDeque<usize>>>,
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        self.pool.lock().push_back(self.slot);
    }
}

/// Per-scenario progress publisher handed to the work function.
///
/// Publishes phase markers only; semantic content never flows through the
/// executor.
#[derive(Clone)]
pub struct ScenarioProgress {
    sink: EventSink,
    scenario_id: String,
}

impl ScenarioProgress {
    /// Publish a phase marker.
    pub fn publish(&self, phase: &str, percent: u8) {
        self.sink.emit(
            Stage::ParallelExec,
            StageStatus::Streaming,
            json!({
                "scenario_id": self.scenario_id,
                "phase": phase,
                "percent": percent.min(100),
            }),
        );
    }
}

/// The bounded scenario executor.
pub struct ScenarioExecutor {
    parallelism: usize,
    affinity_pool_size: usize,
    queue_capacity: usize,
    per_scenario_timeout: Duration,
}

impl ScenarioExecutor {
    /// Build an executor; rejects `W > |P|`.
    pub fn new(settings: &ScenarioSettings, per_scenario_timeout: Duration) -> Result<Self> {
        if settings.parallelism == 0 {
            return Err(Error::Internal("parallelism must be positive".to_string()));
        }
        if settings.parallelism > settings.affinity_pool_size {
            return Err(Error::Internal(format!(
                "parallelism ({}) exceeds affinity pool size ({})",
                settings.parallelism, settings.affinity_pool_size
            )));
        }
        Ok(Self {
            parallelism: settings.parallelism,
            affinity_pool_size: settings.affinity_pool_size,
            queue_capacity: settings.queue_capacity(),
            per_scenario_timeout,
        })
    }

    /// Run `work_fn` over all scenarios under bounded parallelism.
    ///
    /// The returned vector has one entry per input scenario, in input
    /// order. Individual failures do not stop the batch; cancelled
    /// scenarios come back as `ScenarioFailure { reason: "cancelled" }`.
    pub async fn execute<F, Fut>(
        &self,
        scenarios: Vec<Scenario>,
        work_fn: F,
        cancel: watch::Receiver<bool>,
        sink: &EventSink,
    ) -> Vec<ScenarioOutcome>
    where
        F: Fn(Scenario, usize, ScenarioProgress) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<ScenarioResult>> + Send + 'static,
    {
        let total = scenarios.len();
        if total == 0 {
            return Vec::new();
        }

        let (queue_tx, queue_rx) = mpsc::channel::<(usize, Scenario)>(self.queue_capacity);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, ScenarioOutcome)>();
        let pool = AffinityPool::new(self.affinity_pool_size);

        // The enqueuer blocks when the queue is full; that is the
        // backpressure contract with scenario generation.
        let enqueuer = tokio::spawn(async move {
            for (index, scenario) in scenarios.into_iter().enumerate() {
                if queue_tx.send((index, scenario)).await.is_err() {
                    break;
                }
            }
        });

        let mut workers = Vec::with_capacity(self.parallelism);
        for _ in 0..self.parallelism {
            let queue_rx = Arc::clone(&queue_rx);
            let done_tx = done_tx.clone();
            let pool = pool.clone();
            let work_fn = work_fn.clone();
            let sink = sink.clone();
            let mut cancel = cancel.clone();
            let timeout = self.per_scenario_timeout;

            workers.push(tokio::spawn(async move {
                loop {
                    let next = queue_rx.lock().await.recv().await;
                    let Some((index, scenario)) = next else {
                        break;
                    };
                    let outcome =
                        run_scenario(&work_fn, scenario, &pool, &sink, &mut cancel, timeout)
                            .await;
                    if done_tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(done_tx);

        let mut outcomes: Vec<Option<ScenarioOutcome>> = (0..total).map(|_| None).collect();
        let mut received = 0;
        while let Some((index, outcome)) = done_rx.recv().await {
            outcomes[index] = Some(outcome);
            received += 1;
            if received == total {
                break;
            }
        }

        let _ = enqueuer.await;
        for worker in workers {
            let _ = worker.await;
        }

        outcomes
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    ScenarioOutcome::Failure(ScenarioFailure {
                        scenario_id: format!("s{i}"),
                        reason: "cancelled".to_string(),
                    })
                })
            })
            .collect()
    }
}

async fn run_scenario<F, Fut>(
    work_fn: &F,
    scenario: Scenario,
    pool: &AffinityPool,
    sink: &EventSink,
    cancel: &mut watch::Receiver<bool>,
    timeout: Duration,
) -> ScenarioOutcome
where
    F: Fn(Scenario, usize, ScenarioProgress) -> Fut,
    Fut: Future<Output = Result<ScenarioResult>> + Send + 'static,
{
    let scenario_id = scenario.scenario_id.clone();
    if *cancel.borrow() {
        return ScenarioOutcome::Failure(ScenarioFailure {
            scenario_id,
            reason: "cancelled".to_string(),
        });
    }

    let guard = match pool.acquire() {
        Ok(guard) => guard,
        Err(e) => {
            return ScenarioOutcome::Failure(ScenarioFailure {
                scenario_id,
                reason: e.public_message(),
            });
        }
    };

    let progress = ScenarioProgress {
        sink: sink.clone(),
        scenario_id: scenario_id.clone(),
    };
    progress.publish("started", 0);

    let work = work_fn(scenario, guard.slot, progress.clone());
    let outcome = tokio::select! {
        result = tokio::time::timeout(timeout, work) => match result {
            Ok(Ok(result)) => {
                progress.publish("complete", 100);
                ScenarioOutcome::Success(result)
            }
            Ok(Err(Error::ScenarioFailure { reason, .. })) => {
                ScenarioOutcome::Failure(ScenarioFailure {
                    scenario_id,
                    reason,
                })
            }
            Ok(Err(e)) => ScenarioOutcome::Failure(ScenarioFailure {
                scenario_id,
                reason: e.public_message(),
            }),
            Err(_) => ScenarioOutcome::Failure(ScenarioFailure {
                scenario_id,
                reason: "timeout".to_string(),
            }),
        },
        () = cancelled_signal(cancel) => ScenarioOutcome::Failure(ScenarioFailure {
            scenario_id,
            reason: "cancelled".to_string(),
        }),
    };

    drop(guard);
    outcome
}

/// Resolves when the cancel flag flips to `true`. A dropped sender is not a
/// cancellation; the run simply finishes on its own terms.
pub(crate) async fn cancelled_signal(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(parallelism: usize, pool: usize) -> ScenarioSettings {
        ScenarioSettings {
            parallelism,
            affinity_pool_size: pool,
        }
    }

    fn scenarios(n: usize) -> Vec<Scenario> {
        (0..n)
            .map(|i| Scenario::new(i, format!("scenario-{i}"), "test"))
            .collect()
    }

    fn ok_result(scenario: &Scenario) -> ScenarioResult {
        ScenarioResult {
            scenario_id: scenario.scenario_id.clone(),
            success_rate: 0.8,
            confidence: 0.7,
            findings: vec![],
            synthesis_text: format!("outcome of {}", scenario.name),
            sensitivity_drivers: vec![],
        }
    }

    #[test]
    fn test_rejects_oversized_parallelism() {
        assert!(ScenarioExecutor::new(&settings(8, 6), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_results_in_input_order() {
        let executor = ScenarioExecutor::new(&settings(4, 4), Duration::from_secs(5)).unwrap();
        let (sink, _stream) = EventSink::channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        // Later scenarios finish first.
        let outcomes = executor
            .execute(
                scenarios(6),
                |scenario, _slot, _progress| async move {
                    let index: u64 = scenario.scenario_id[1..].parse().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(60 - index * 10)).await;
                    Ok(ok_result(&scenario))
                },
                cancel_rx,
                &sink,
            )
            .await;

        assert_eq!(outcomes.len(), 6);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.scenario_id(), format!("s{i}"));
            assert!(outcome.as_success().is_some());
        }
    }

    #[tokio::test]
    async fn test_partial_failure_continues() {
        let executor = ScenarioExecutor::new(&settings(3, 3), Duration::from_secs(5)).unwrap();
        let (sink, _stream) = EventSink::channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let outcomes = executor
            .execute(
                scenarios(6),
                |scenario, _slot, _progress| async move {
                    if scenario.scenario_id == "s2" {
                        Err(Error::Provider("agent call raised".to_string()))
                    } else {
                        Ok(ok_result(&scenario))
                    }
                },
                cancel_rx,
                &sink,
            )
            .await;

        assert_eq!(outcomes.len(), 6);
        let failures: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.as_success().is_none())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(failures, vec![2]);
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure() {
        let executor =
            ScenarioExecutor::new(&settings(2, 2), Duration::from_millis(30)).unwrap();
        let (sink, _stream) = EventSink::channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let outcomes = executor
            .execute(
                scenarios(1),
                |scenario, _slot, _progress| async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(ok_result(&scenario))
                },
                cancel_rx,
                &sink,
            )
            .await;

        match &outcomes[0] {
            ScenarioOutcome::Failure(f) => assert_eq!(f.reason, "timeout"),
            ScenarioOutcome::Success(_) => panic!("expected timeout failure"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_drains_queue() {
        let executor = ScenarioExecutor::new(&settings(2, 2), Duration::from_secs(30)).unwrap();
        let (sink, _stream) = EventSink::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let started = Arc::new(AtomicUsize::new(0));
        let started_clone = Arc::clone(&started);

        let handle = tokio::spawn(async move {
            executor
                .execute(
                    scenarios(6),
                    move |scenario, _slot, _progress| {
                        let started = Arc::clone(&started_clone);
                        async move {
                            started.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_secs(10)).await;
                            Ok(ok_result(&scenario))
                        }
                    },
                    cancel_rx,
                    &sink,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();

        let outcomes = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("executor did not observe cancellation promptly")
            .unwrap();

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| matches!(
            o,
            ScenarioOutcome::Failure(f) if f.reason == "cancelled"
        )));
    }

    #[tokio::test]
    async fn test_affinity_slots_are_exclusive() {
        let executor = ScenarioExecutor::new(&settings(4, 4), Duration::from_secs(5)).unwrap();
        let (sink, _stream) = EventSink::channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let in_use = Arc::new(Mutex::new(std::collections::HashSet::new()));
        let in_use_clone = Arc::clone(&in_use);

        let outcomes = executor
            .execute(
                scenarios(12),
                move |scenario, slot, _progress| {
                    let in_use = Arc::clone(&in_use_clone);
                    async move {
                        assert!(in_use.lock().insert(slot), "slot {slot} double-claimed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_use.lock().remove(&slot);
                        Ok(ok_result(&scenario))
                    }
                },
                cancel_rx,
                &sink,
            )
            .await;

        assert!(outcomes.iter().all(|o| o.as_success().is_some()));
    }

    #[tokio::test]
    async fn test_progress_phase_markers_emitted() {
        let executor = ScenarioExecutor::new(&settings(1, 1), Duration::from_secs(5)).unwrap();
        let (sink, stream) = EventSink::channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let outcomes = executor
            .execute(
                scenarios(1),
                |scenario, _slot, progress| async move {
                    progress.publish("agents", 40);
                    Ok(ok_result(&scenario))
                },
                cancel_rx,
                &sink,
            )
            .await;
        drop(sink);
        assert_eq!(outcomes.len(), 1);

        let events = stream.collect_all().await;
        let phases: Vec<String> = events
            .iter()
            .filter(|e| e.stage == Stage::ParallelExec)
            .map(|e| e.payload["phase"].as_str().unwrap_or("").to_string())
            .collect();
        assert_eq!(phases, vec!["started", "agents", "complete"]);
    }
}
