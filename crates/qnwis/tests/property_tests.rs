#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property-based tests for the verifier and the scenario executor.
//!
//! These pin the algebraic invariants: percent representation equivalence,
//! verifier determinism, and input-order preservation under arbitrary
//! completion timing.

use proptest::prelude::*;
use qnwis::config::ScenarioSettings;
use qnwis::{
    EventSink, Scenario, ScenarioExecutor, ScenarioOutcome, ScenarioResult,
    VerificationConfig, Verifier,
};
use qnwis_data::{Freshness, Provenance, QueryResult, Row};
use serde_json::json;
use std::time::Duration;

fn single_cell_result(column: &str, value: f64) -> QueryResult {
    let mut row = Row::new();
    row.insert(column.to_string(), json!(value));
    QueryResult {
        query_id: "series".to_string(),
        params_used: serde_json::Map::new(),
        rows: vec![row],
        provenance: Provenance {
            dataset: "LMIS".to_string(),
            source: "direct".to_string(),
        },
        freshness: Freshness::now(),
        row_count: 1,
    }
}

fn lenient_config() -> VerificationConfig {
    VerificationConfig {
        require_citation_first: false,
        ..VerificationConfig::default()
    }
}

proptest! {
    /// A share stored as a fraction binds a claim written in [0,100], and
    /// the same share stored in [0,100] binds a claim written as written.
    #[test]
    fn percent_representations_are_equivalent(raw in 1u32..9999u32) {
        let fraction = f64::from(raw) / 10_000.0;          // in (0, 1)
        let percent = fraction * 100.0;                    // in (0, 100)
        let narrative = format!("The share reached {percent:.2}%.");
        let verifier = Verifier::new(lenient_config());

        let vs_fraction = verifier.verify(&narrative, &[single_cell_result("share", fraction)]);
        prop_assert!(vs_fraction.ok, "claim {percent:.2}% vs fraction {fraction}");
        prop_assert_eq!(vs_fraction.claims_matched, vs_fraction.claims_total);

        let vs_percent = verifier.verify(&narrative, &[single_cell_result("share", percent)]);
        prop_assert!(vs_percent.ok, "claim {percent:.2}% vs percent {percent}");
    }

    /// Same narrative, same results, same tolerances: identical report.
    #[test]
    fn verifier_is_deterministic(value in 0.0f64..10_000.0, text in "[a-z ]{0,32}") {
        let narrative = format!("Per LMIS: {text} measured {value:.2} units.");
        let results = [single_cell_result("measure", value)];
        let verifier = Verifier::new(VerificationConfig::default());

        let a = verifier.verify(&narrative, &results);
        let b = verifier.verify(&narrative, &results);
        prop_assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    /// A value that appears verbatim (with a citation) always verifies.
    #[test]
    fn verbatim_cited_values_verify(raw in 1u32..1_000_000u32) {
        let value = f64::from(raw);
        let narrative = format!("Per LMIS: the total stands at {value} units.");
        let verifier = Verifier::new(VerificationConfig::default());
        let report = verifier.verify(&narrative, &[single_cell_result("total", value)]);
        prop_assert!(report.ok, "value {value}: {report:?}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Results come back in input order whatever the completion order.
    #[test]
    fn executor_preserves_input_order(delays in prop::collection::vec(0u64..20, 1..8)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let settings = ScenarioSettings { parallelism: 4, affinity_pool_size: 4 };
            let executor = ScenarioExecutor::new(&settings, Duration::from_secs(5)).unwrap();
            let (sink, _stream) = EventSink::channel();
            let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

            let scenarios: Vec<Scenario> = delays
                .iter()
                .enumerate()
                .map(|(i, _)| Scenario::new(i, format!("v{i}"), "prop"))
                .collect();
            let delays_clone = delays.clone();

            let outcomes = executor
                .execute(
                    scenarios,
                    move |scenario, _slot, _progress| {
                        let delays = delays_clone.clone();
                        async move {
                            let index: usize = scenario.scenario_id[1..].parse().unwrap_or(0);
                            tokio::time::sleep(Duration::from_millis(delays[index])).await;
                            Ok(ScenarioResult {
                                scenario_id: scenario.scenario_id.clone(),
                                success_rate: 0.5,
                                confidence: 0.5,
                                findings: vec![],
                                synthesis_text: String::new(),
                                sensitivity_drivers: vec![],
                            })
                        }
                    },
                    cancel_rx,
                    &sink,
                )
                .await;

            assert_eq!(outcomes.len(), delays.len());
            for (i, outcome) in outcomes.iter().enumerate() {
                assert_eq!(outcome.scenario_id(), format!("s{i}"));
                assert!(matches!(outcome, ScenarioOutcome::Success(_)));
            }
        });
    }
}
