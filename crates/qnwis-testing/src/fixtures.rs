//! Standard labour-market fixtures shared across integration tests.
//!
//! The catalog matches the ids referenced by the standard intent and agent
//! rosters, and the engine tables hold small, hand-checkable numbers
//! (unemployment at 3.9%, six employment sectors, GCC peer rates).

use crate::memory_engine::MemoryEngine;
use qnwis_data::{
    AuditLog, ClientSettings, ColumnSpec, ColumnType, DataClient, InMemoryCacheStore,
    MemoryAuditLog, ParamType, ParameterSpec, QueryDefinition, QueryRegistry, Row,
};
use serde_json::json;
use std::sync::Arc;

fn column(name: &str, column_type: ColumnType) -> ColumnSpec {
    ColumnSpec {
        name: name.to_string(),
        column_type,
    }
}

/// The standard test catalog.
#[must_use]
pub fn standard_catalog() -> Vec<QueryDefinition> {
    vec![
        QueryDefinition {
            query_id: "unemployment_rate_latest".to_string(),
            description: "Latest national unemployment rate".to_string(),
            dataset: "LMIS".to_string(),
            sql: "SELECT period, rate_pct FROM lmis.unemployment ORDER BY period DESC LIMIT 1"
                .to_string(),
            parameters: vec![],
            output_schema: vec![
                column("period", ColumnType::Date),
                column("rate_pct", ColumnType::Float),
            ],
            cache_ttl_seconds: 3600,
            freshness_sla_seconds: 86_400,
            access_level: Default::default(),
            tags: vec!["labour".to_string(), "headline".to_string()],
            materialized_view: None,
        },
        QueryDefinition {
            query_id: "employment_by_sector".to_string(),
            description: "Employment headcount by sector".to_string(),
            dataset: "LMIS".to_string(),
            sql: "SELECT sector, headcount FROM lmis.employment WHERE year = :year".to_string(),
            parameters: vec![ParameterSpec {
                name: "year".to_string(),
                param_type: ParamType::Int,
                required: false,
                default: Some(json!(2024)),
                range: None,
            }],
            output_schema: vec![
                column("sector", ColumnType::Text),
                column("headcount", ColumnType::Int),
            ],
            cache_ttl_seconds: 3600,
            freshness_sla_seconds: 86_400,
            access_level: Default::default(),
            tags: vec!["labour".to_string(), "sector".to_string()],
            materialized_view: None,
        },
        QueryDefinition {
            query_id: "qatarization_by_sector".to_string(),
            description: "Qatarization share by sector".to_string(),
            dataset: "LMIS".to_string(),
            sql: "SELECT sector, share FROM lmis.qatarization".to_string(),
            parameters: vec![],
            output_schema: vec![
                column("sector", ColumnType::Text),
                column("share", ColumnType::Float),
            ],
            cache_ttl_seconds: 3600,
            freshness_sla_seconds: 86_400,
            access_level: Default::default(),
            tags: vec!["labour".to_string()],
            materialized_view: None,
        },
        QueryDefinition {
            query_id: "gcc_benchmark_rates".to_string(),
            description: "Unemployment rates across GCC members".to_string(),
            dataset: "GCC-STAT".to_string(),
            sql: "SELECT country, rate_pct FROM gcc.benchmark_rates WHERE metric = :metric"
                .to_string(),
            parameters: vec![ParameterSpec {
                name: "metric".to_string(),
                param_type: ParamType::Text,
                required: false,
                default: Some(json!("unemployment")),
                range: None,
            }],
            output_schema: vec![
                column("country", ColumnType::Text),
                column("rate_pct", ColumnType::Float),
            ],
            cache_ttl_seconds: 3600,
            freshness_sla_seconds: 86_400,
            access_level: Default::default(),
            tags: vec!["benchmark".to_string()],
            materialized_view: None,
        },
    ]
}

fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Engine loaded with the standard tables.
#[must_use]
pub fn standard_engine() -> Arc<MemoryEngine> {
    Arc::new(standard_engine_inner())
}

/// Standard engine with simulated per-query latency, for cache-hit timing
/// assertions.
#[must_use]
pub fn standard_engine_with_latency(latency: std::time::Duration) -> Arc<MemoryEngine> {
    Arc::new(standard_engine_inner().with_latency(latency))
}

fn standard_engine_inner() -> MemoryEngine {
    MemoryEngine::new()
        .with_table(
            "lmis.unemployment",
            vec![row(&[("period", json!("2024-06-30")), ("rate_pct", json!(3.9))])],
        )
        .with_table(
            "lmis.employment",
            vec![
                row(&[("sector", json!("construction")), ("headcount", json!(1000))]),
                row(&[("sector", json!("services")), ("headcount", json!(800))]),
                row(&[("sector", json!("energy")), ("headcount", json!(600))]),
                row(&[("sector", json!("finance")), ("headcount", json!(400))]),
                row(&[("sector", json!("education")), ("headcount", json!(300))]),
                row(&[("sector", json!("health")), ("headcount", json!(200))]),
            ],
        )
        .with_table(
            "lmis.qatarization",
            vec![
                row(&[("sector", json!("construction")), ("share", json!(0.12))]),
                row(&[("sector", json!("services")), ("share", json!(0.31))]),
                row(&[("sector", json!("energy")), ("share", json!(0.45))]),
            ],
        )
        .with_table(
            "gcc.benchmark_rates",
            vec![
                row(&[("country", json!("QA")), ("rate_pct", json!(3.9))]),
                row(&[("country", json!("SA")), ("rate_pct", json!(5.5))]),
                row(&[("country", json!("AE")), ("rate_pct", json!(2.9))]),
            ],
        )
}

/// Data client over the standard catalog, with an in-memory audit log for
/// assertions.
#[must_use]
pub fn standard_data_client(engine: Arc<MemoryEngine>) -> (Arc<DataClient>, Arc<MemoryAuditLog>) {
    let audit = MemoryAuditLog::new();
    #[allow(clippy::expect_used)]
    let registry =
        Arc::new(QueryRegistry::new(standard_catalog()).expect("standard catalog is valid"));
    let client = Arc::new(DataClient::new(
        registry,
        engine,
        Arc::new(InMemoryCacheStore::default_config()),
        Arc::clone(&audit) as Arc<dyn AuditLog>,
        ClientSettings::default(),
    ));
    (client, audit)
}

/// A classifier reply for a given complexity level.
#[must_use]
pub fn classifier_reply(complexity: &str) -> String {
    format!(r#"{{"complexity": "{complexity}", "rationale": "scripted"}}"#)
}

/// A well-cited agent reply that verifies against the standard fixtures.
#[must_use]
pub fn verified_agent_reply() -> String {
    json!({
        "narrative": "Per LMIS: the unemployment rate is 3.9%. Per LMIS: 1,000 employees work in construction (QID:employment_by_sector).",
        "findings": ["Headline unemployment remains below 4 percent."],
        "citations": [
            {"query_id": "unemployment_rate_latest", "note": "headline rate"},
            {"query_id": "employment_by_sector", "note": "sector headcounts"}
        ],
        "confidence": 0.82
    })
    .to_string()
}

/// An agent reply whose headline number is fabricated.
#[must_use]
pub fn fabricating_agent_reply() -> String {
    json!({
        "narrative": "Per LMIS: 1,500 employees work in construction (QID:employment_by_sector).",
        "findings": [],
        "citations": [{"query_id": "employment_by_sector", "note": "sector headcounts"}],
        "confidence": 0.9
    })
    .to_string()
}
