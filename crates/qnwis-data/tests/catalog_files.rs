#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! The shipped catalog files must always load: these tests keep the
//! repository's `catalog/` directory and the loader honest together.

use qnwis_data::{catalog, materialize, QueryRegistry};
use std::path::PathBuf;

fn repo_dir(sub: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(sub)
}

#[test]
fn test_shipped_queries_load_into_a_registry() {
    let defs = catalog::load_dir(repo_dir("catalog/queries")).unwrap();
    assert!(defs.len() >= 4, "expected the standard query set");

    let registry = QueryRegistry::new(defs).unwrap();
    for id in [
        "unemployment_rate_latest",
        "employment_by_sector",
        "qatarization_by_sector",
        "gcc_benchmark_rates",
    ] {
        let def = registry.get(id).unwrap();
        assert!(def.cache_ttl_seconds > 0);
        assert!(!def.output_schema.is_empty());
    }

    // Datasets are the source families citation prefixes resolve against.
    assert!(!registry.by_dataset("LMIS").is_empty());
    assert!(!registry.by_dataset("gcc-stat").is_empty());
}

#[test]
fn test_shipped_views_reference_registered_queries() {
    let registry = QueryRegistry::load_dir(repo_dir("catalog/queries")).unwrap();
    let specs = materialize::load_specs(repo_dir("catalog/views")).unwrap();
    assert!(!specs.is_empty());
    for spec in &specs {
        assert!(
            registry.contains(&spec.query_id),
            "view '{}' references unknown query '{}'",
            spec.name,
            spec.query_id
        );
        assert!(spec.refresh_interval_seconds > 0);
    }
}
