//! Scheduled materialized-view refresh.
//!
//! Views are declared in YAML alongside the query catalog:
//!
//! ```yaml
//! name: mv_employment_by_sector
//! query_id: employment_by_sector
//! fixed_params:
//!   year: 2024
//! indexes:
//!   - { name: mv_employment_by_sector_pk, columns: [sector], unique: true }
//! refresh_interval_seconds: 3600
//! ```
//!
//! Each tick applies create-if-absent, concurrent refresh, then
//! ensure-indexes, recording one audit row per view. Refresh failures are
//! logged and retried at the next tick; they never propagate to user
//! requests, which keep reading the previous snapshot.

use crate::audit::{AuditLog, AuditRecord, AuditStatus};
use crate::engine::{DataEngine, IndexDef};
use crate::error::{Error, Result};
use crate::params;
use crate::registry::QueryRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Declarative materialized-view spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializationSpec {
    /// View name
    pub name: String,
    /// Registered query the view is built from
    pub query_id: String,
    /// Parameter values pinned at refresh time
    #[serde(default)]
    pub fixed_params: serde_json::Map<String, Value>,
    /// Indexes kept on the view
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Refresh cadence
    pub refresh_interval_seconds: u64,
}

/// Load every view spec under `dir` (`*.yml` / `*.yaml`), sorted by path.
pub fn load_specs(dir: impl AsRef<Path>) -> Result<Vec<MaterializationSpec>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yml" | "yaml")
            )
        })
        .collect();
    paths.sort();

    let mut specs = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)?;
        let spec: MaterializationSpec = serde_yml::from_str(&text)?;
        if spec.refresh_interval_seconds == 0 {
            return Err(Error::Catalog(format!(
                "view '{}': refresh_interval_seconds must be positive",
                spec.name
            )));
        }
        specs.push(spec);
    }
    Ok(specs)
}

/// Render a template with fixed parameters inlined as SQL literals.
///
/// DDL statements cannot carry bind parameters, so view definitions inline
/// their pinned values. Fixed params come from operator-reviewed spec files
/// loaded at startup, never from request input; strings are still quoted
/// defensively.
fn render_literal_sql(
    sql: &str,
    query_id: &str,
    bound: &params::BoundParams,
) -> Result<String> {
    let (positional, order) = crate::engine::to_positional(&crate::engine::BoundQuery {
        sql: sql.to_string(),
        params: bound.clone(),
    })?;

    let mut out = positional;
    for (i, name) in order.iter().enumerate().rev() {
        let value = bound
            .get(name)
            .ok_or_else(|| Error::param(query_id, format!("missing fixed param '{name}'")))?;
        let literal = match value {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            other => {
                return Err(Error::param(
                    query_id,
                    format!("fixed param '{name}' has unsupported literal {other}"),
                ))
            }
        };
        out = out.replace(&format!("${}", i + 1), &literal);
    }
    Ok(out)
}

/// Applies view specs on a schedule.
pub struct Refresher {
    registry: Arc<QueryRegistry>,
    engine: Arc<dyn DataEngine>,
    audit: Arc<dyn AuditLog>,
    specs: Vec<MaterializationSpec>,
}

impl Refresher {
    /// Assemble a refresher. Specs referencing unknown query ids are
    /// rejected here rather than at the first tick.
    pub fn new(
        registry: Arc<QueryRegistry>,
        engine: Arc<dyn DataEngine>,
        audit: Arc<dyn AuditLog>,
        specs: Vec<MaterializationSpec>,
    ) -> Result<Self> {
        for spec in &specs {
            registry.get(&spec.query_id)?;
        }
        Ok(Self {
            registry,
            engine,
            audit,
            specs,
        })
    }

    /// Refresh one view now: create-if-absent, concurrent refresh,
    /// ensure-indexes. Idempotent.
    pub async fn refresh_once(&self, spec: &MaterializationSpec) -> Result<()> {
        let started = Instant::now();
        let outcome = self.apply(spec).await;

        self.audit.record(AuditRecord {
            timestamp: chrono::Utc::now(),
            request_id: "materialization".to_string(),
            user_id: None,
            query_id: spec.query_id.clone(),
            params_hash: String::new(),
            row_count: 0,
            elapsed_ms: started.elapsed().as_millis() as u64,
            cache_hit: false,
            status: if outcome.is_ok() {
                AuditStatus::Ok
            } else {
                AuditStatus::Error
            },
            error: outcome.as_ref().err().map(ToString::to_string),
        });
        outcome
    }

    async fn apply(&self, spec: &MaterializationSpec) -> Result<()> {
        let def = self.registry.get(&spec.query_id)?;
        let bound = params::bind(def, &spec.fixed_params)?;
        let select_sql = render_literal_sql(&def.sql, &def.query_id, &bound)?;

        self.engine
            .create_materialized_view(&spec.name, &select_sql)
            .await?;
        self.engine.refresh_materialized_view(&spec.name).await?;
        for index in &spec.indexes {
            self.engine.ensure_index(&spec.name, index).await?;
        }
        Ok(())
    }

    /// Run the schedule until `cancel` flips to `true`.
    ///
    /// One timer task per view; a failing refresh logs and waits for the
    /// next tick. The first refresh happens immediately so a cold start has
    /// views before the first interval elapses.
    pub async fn run(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        let mut handles = Vec::with_capacity(self.specs.len());
        for spec in self.specs.clone() {
            let refresher = Arc::clone(&self);
            let mut cancel_rx = cancel.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(spec.refresh_interval_seconds));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = refresher.refresh_once(&spec).await {
                                tracing::warn!(
                                    view = %spec.name,
                                    error = %e,
                                    "materialization refresh failed; will retry next tick"
                                );
                            }
                        }
                        _ = cancel_rx.changed() => {
                            if *cancel_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        // Hold until cancelled, then let the timer tasks wind down.
        while cancel.changed().await.is_ok() {
            if *cancel.borrow() {
                break;
            }
        }
        for handle in handles {
            handle.abort();
        }
    }

    /// The declared specs.
    #[must_use]
    pub fn specs(&self) -> &[MaterializationSpec] {
        &self.specs
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::catalog::{
        ColumnSpec, ColumnType, ParamType, ParameterSpec, QueryDefinition,
    };
    use crate::engine::BoundQuery;
    use crate::types::Row;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingEngine {
        ddl: Mutex<Vec<String>>,
        fail_refresh: bool,
    }

    #[async_trait]
    impl DataEngine for RecordingEngine {
        async fn execute(
            &self,
            _query: &BoundQuery,
            _timeout: Duration,
            _row_cap: usize,
        ) -> Result<Vec<Row>> {
            Ok(vec![])
        }

        async fn create_materialized_view(&self, name: &str, select_sql: &str) -> Result<()> {
            self.ddl
                .lock()
                .push(format!("create {name}: {select_sql}"));
            Ok(())
        }

        async fn refresh_materialized_view(&self, name: &str) -> Result<()> {
            if self.fail_refresh {
                return Err(Error::Materialization {
                    view: name.to_string(),
                    reason: "lock conflict".to_string(),
                });
            }
            self.ddl.lock().push(format!("refresh {name}"));
            Ok(())
        }

        async fn ensure_index(&self, view: &str, index: &IndexDef) -> Result<()> {
            self.ddl
                .lock()
                .push(format!("index {view}.{}", index.name));
            Ok(())
        }
    }

    fn registry() -> Arc<QueryRegistry> {
        Arc::new(
            QueryRegistry::new(vec![QueryDefinition {
                query_id: "employment_by_sector".to_string(),
                description: String::new(),
                dataset: "LMIS".to_string(),
                sql: "SELECT sector, headcount FROM lmis.employment WHERE year = :year"
                    .to_string(),
                parameters: vec![ParameterSpec {
                    name: "year".to_string(),
                    param_type: ParamType::Int,
                    required: true,
                    default: None,
                    range: None,
                }],
                output_schema: vec![
                    ColumnSpec {
                        name: "sector".to_string(),
                        column_type: ColumnType::Text,
                    },
                    ColumnSpec {
                        name: "headcount".to_string(),
                        column_type: ColumnType::Int,
                    },
                ],
                cache_ttl_seconds: 3600,
                freshness_sla_seconds: 86_400,
                access_level: Default::default(),
                tags: vec![],
                materialized_view: Some("mv_employment_by_sector".to_string()),
            }])
            .unwrap(),
        )
    }

    fn spec() -> MaterializationSpec {
        MaterializationSpec {
            name: "mv_employment_by_sector".to_string(),
            query_id: "employment_by_sector".to_string(),
            fixed_params: [("year".to_string(), json!(2024))].into_iter().collect(),
            indexes: vec![IndexDef {
                name: "mv_employment_pk".to_string(),
                columns: vec!["sector".to_string()],
                unique: true,
            }],
            refresh_interval_seconds: 3600,
        }
    }

    #[tokio::test]
    async fn test_refresh_once_applies_full_sequence() {
        let engine = Arc::new(RecordingEngine::default());
        let audit = MemoryAuditLog::new();
        let refresher =
            Refresher::new(registry(), engine.clone(), audit.clone(), vec![spec()]).unwrap();

        refresher.refresh_once(&spec()).await.unwrap();

        let ddl = engine.ddl.lock().clone();
        assert_eq!(ddl.len(), 3);
        assert!(ddl[0].contains("WHERE year = 2024"));
        assert!(ddl[1].starts_with("refresh"));
        assert!(ddl[2].starts_with("index"));
        assert_eq!(audit.records()[0].status, AuditStatus::Ok);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_audited_not_fatal() {
        let engine = Arc::new(RecordingEngine {
            fail_refresh: true,
            ..Default::default()
        });
        let audit = MemoryAuditLog::new();
        let refresher =
            Refresher::new(registry(), engine, audit.clone(), vec![spec()]).unwrap();

        let err = refresher.refresh_once(&spec()).await.unwrap_err();
        assert!(matches!(err, Error::Materialization { .. }));
        assert_eq!(audit.records()[0].status, AuditStatus::Error);
    }

    #[tokio::test]
    async fn test_unknown_query_rejected_at_build() {
        let mut bad = spec();
        bad.query_id = "missing".to_string();
        let engine = Arc::new(RecordingEngine::default());
        let err = Refresher::new(registry(), engine, MemoryAuditLog::new(), vec![bad]);
        assert!(err.is_err());
    }

    #[test]
    fn test_render_literal_sql_quotes_strings() {
        let def = QueryDefinition {
            query_id: "q".to_string(),
            description: String::new(),
            dataset: "LMIS".to_string(),
            sql: "SELECT * FROM t WHERE name = :name AND year = :year".to_string(),
            parameters: vec![
                ParameterSpec {
                    name: "name".to_string(),
                    param_type: ParamType::Text,
                    required: true,
                    default: None,
                    range: None,
                },
                ParameterSpec {
                    name: "year".to_string(),
                    param_type: ParamType::Int,
                    required: true,
                    default: None,
                    range: None,
                },
            ],
            output_schema: vec![ColumnSpec {
                name: "x".to_string(),
                column_type: ColumnType::Int,
            }],
            cache_ttl_seconds: 60,
            freshness_sla_seconds: 60,
            access_level: Default::default(),
            tags: vec![],
            materialized_view: None,
        };
        let supplied = [
            ("name".to_string(), json!("O'Neill")),
            ("year".to_string(), json!(2024)),
        ]
        .into_iter()
        .collect();
        let bound = params::bind(&def, &supplied).unwrap();
        let sql = render_literal_sql(&def.sql, &def.query_id, &bound).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE name = 'O''Neill' AND year = 2024"
        );
    }
}
