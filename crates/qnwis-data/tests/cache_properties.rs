#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property-based tests for cache-key determinism and the TTL contract.

use proptest::prelude::*;
use qnwis_data::{
    cache_key, canonical_json, CacheConfig, CacheStore, InMemoryCacheStore,
};
use qnwis_data::{ColumnSpec, ColumnType, ParamType, ParameterSpec, QueryDefinition};
use serde_json::{json, Value};
use std::time::Duration;

fn definition(params: &[(&str, ParamType)]) -> QueryDefinition {
    let placeholders: Vec<String> =
        params.iter().map(|(name, _)| format!(":{name}")).collect();
    QueryDefinition {
        query_id: "prop_query".to_string(),
        description: String::new(),
        dataset: "LMIS".to_string(),
        sql: format!("SELECT x FROM t WHERE y IN ({})", placeholders.join(", ")),
        parameters: params
            .iter()
            .map(|(name, param_type)| ParameterSpec {
                name: (*name).to_string(),
                param_type: *param_type,
                required: true,
                default: None,
                range: None,
            })
            .collect(),
        output_schema: vec![ColumnSpec {
            name: "x".to_string(),
            column_type: ColumnType::Int,
        }],
        cache_ttl_seconds: 60,
        freshness_sla_seconds: 60,
        access_level: Default::default(),
        tags: vec![],
        materialized_view: None,
    }
}

proptest! {
    /// Construction order of the parameter map never changes the key.
    #[test]
    fn cache_key_is_order_independent(
        a in -1_000_000i64..1_000_000,
        b in "[a-zA-Z0-9 ]{0,24}",
        c in proptest::bool::ANY,
    ) {
        let def = definition(&[
            ("alpha", ParamType::Int),
            ("beta", ParamType::Text),
            ("gamma", ParamType::Bool),
        ]);

        let forward: serde_json::Map<String, Value> = [
            ("alpha".to_string(), json!(a)),
            ("beta".to_string(), json!(b)),
            ("gamma".to_string(), json!(c)),
        ]
        .into_iter()
        .collect();
        let backward: serde_json::Map<String, Value> = [
            ("gamma".to_string(), json!(c)),
            ("beta".to_string(), json!(b)),
            ("alpha".to_string(), json!(a)),
        ]
        .into_iter()
        .collect();

        let p1 = qnwis_data::params::bind(&def, &forward).unwrap();
        let p2 = qnwis_data::params::bind(&def, &backward).unwrap();
        prop_assert_eq!(
            cache_key("qnwis", "query", "prop_query", &p1, 1),
            cache_key("qnwis", "query", "prop_query", &p2, 1)
        );
    }

    /// Canonical JSON sorts keys recursively and round-trips values.
    #[test]
    fn canonical_json_is_sorted_and_parseable(
        entries in prop::collection::btree_map("[a-z]{1,8}", -1000i64..1000, 0..8)
    ) {
        let object: serde_json::Map<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        let rendered = canonical_json(&Value::Object(object.clone()));

        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        prop_assert_eq!(parsed, Value::Object(object));

        // Keys appear in sorted order in the rendering.
        let mut last_index = 0;
        for key in entries.keys() {
            let quoted = format!("\"{key}\"");
            let index = rendered.find(&quoted).unwrap();
            prop_assert!(index >= last_index);
            last_index = index;
        }
    }
}

#[tokio::test]
async fn test_cache_round_trip_within_ttl() {
    let cache = InMemoryCacheStore::new(CacheConfig {
        default_ttl: Duration::from_secs(60),
        max_entries: 100,
        track_stats: true,
    });
    cache
        .set("k", b"payload", Some(Duration::from_millis(80)))
        .await
        .unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(b"payload".to_vec()));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.get("k").await.unwrap(), None, "expired after ttl");
}
