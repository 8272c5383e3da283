//! Deterministic data client: `(query_id, params)` in, [`QueryResult`] out.
//!
//! The client is the single runtime entry point to registered data. It
//! composes registry lookup, parameter binding, the cache middleware, engine
//! execution with a bounded retry, and audit logging. Nothing downstream of
//! this client can influence the rendered query beyond declared bindings.

use crate::audit::{AuditLog, AuditRecord, AuditStatus};
use crate::cache::{cache_get_json, cache_set_json, CacheStore};
use crate::engine::{BoundQuery, DataEngine};
use crate::error::{Error, Result};
use crate::params;
use crate::registry::QueryRegistry;
use crate::types::{Freshness, Provenance, QueryResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Operation tag used in cache keys for registered query reads.
const CACHE_OP: &str = "query";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Cache key namespace
    pub namespace: String,
    /// Bumped when the result wire shape changes; part of every cache key
    pub schema_version: u32,
    /// Statement timeout per query
    pub query_timeout: Duration,
    /// In-memory row cap per query
    pub row_cap: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            namespace: "qnwis".to_string(),
            schema_version: 1,
            query_timeout: Duration::from_secs(5),
            row_cap: 50_000,
        }
    }
}

/// Identity of the run a data access belongs to, threaded into audit rows.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Run request id
    pub request_id: String,
    /// Caller, when known
    pub user_id: Option<String>,
}

impl RequestContext {
    /// Context for a request id with no user attribution.
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: None,
        }
    }
}

/// The deterministic data client.
pub struct DataClient {
    registry: Arc<QueryRegistry>,
    engine: Arc<dyn DataEngine>,
    cache: Arc<dyn CacheStore>,
    audit: Arc<dyn AuditLog>,
    settings: ClientSettings,
}

impl DataClient {
    /// Assemble a client from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<QueryRegistry>,
        engine: Arc<dyn DataEngine>,
        cache: Arc<dyn CacheStore>,
        audit: Arc<dyn AuditLog>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            registry,
            engine,
            cache,
            audit,
            settings,
        }
    }

    /// The registry this client reads from.
    #[must_use]
    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    /// Execute a registered query.
    ///
    /// Read path: cache lookup by deterministic key, then engine execution
    /// with one retry on backend failure. Cache writes are best-effort. One
    /// audit row is appended per call, with `cache_hit` reflecting where the
    /// result came from.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        query_id: &str,
        supplied: &serde_json::Map<String, Value>,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let def = self.registry.get(query_id)?;
        let bound = params::bind(def, supplied)?;
        let key = params::cache_key(
            &self.settings.namespace,
            CACHE_OP,
            query_id,
            &bound,
            self.settings.schema_version,
        );
        let params_hash = params::params_hash16(&bound);

        match cache_get_json::<QueryResult>(self.cache.as_ref(), &key).await {
            Ok(Some(mut cached)) => {
                cached.freshness = cached.freshness.aged();
                self.audit(ctx, query_id, &params_hash, Some(&cached), started, true, None);
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => {
                // A broken cache read degrades to a miss.
                tracing::warn!(query_id, error = %e, "cache read failed");
            }
        }

        let query = BoundQuery {
            sql: self.effective_sql(def),
            params: bound.clone(),
        };
        let rows = match self.execute_with_retry(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                let err = match e {
                    Error::ResultTooLarge { cap, .. } => Error::ResultTooLarge {
                        query_id: query_id.to_string(),
                        cap,
                    },
                    other => other,
                };
                self.audit(ctx, query_id, &params_hash, None, started, false, Some(&err));
                return Err(err);
            }
        };

        let result = QueryResult {
            query_id: query_id.to_string(),
            params_used: bound.to_json_map(),
            row_count: rows.len(),
            rows,
            provenance: Provenance {
                dataset: def.dataset.clone(),
                source: def
                    .materialized_view
                    .clone()
                    .unwrap_or_else(|| "direct".to_string()),
            },
            freshness: Freshness::now(),
        };

        let ttl = Duration::from_secs(def.cache_ttl_seconds);
        if let Err(e) = cache_set_json(self.cache.as_ref(), &key, &result, Some(ttl)).await {
            tracing::warn!(query_id, error = %e, "cache write failed");
        }

        self.audit(ctx, query_id, &params_hash, Some(&result), started, false, None);
        Ok(result)
    }

    /// Drop every cached entry of one query, regardless of parameters.
    ///
    /// Called on data-load events; TTLs remain the primary invalidation
    /// mechanism.
    pub async fn invalidate_query(&self, query_id: &str) -> Result<usize> {
        let prefix =
            params::cache_key_prefix(&self.settings.namespace, CACHE_OP, query_id);
        self.cache.delete_prefix(&prefix).await
    }

    /// Queries mapped to a materialized view read the view when the call
    /// carries no parameters; parameterized calls always run the template.
    fn effective_sql(&self, def: &crate::catalog::QueryDefinition) -> String {
        match &def.materialized_view {
            Some(view) if def.parameters.is_empty() => format!("SELECT * FROM {view}"),
            _ => def.sql.clone(),
        }
    }

    async fn execute_with_retry(&self, query: &BoundQuery) -> Result<Vec<crate::types::Row>> {
        let first = self
            .engine
            .execute(query, self.settings.query_timeout, self.settings.row_cap)
            .await;
        match first {
            Err(Error::Backend(reason)) => {
                tracing::warn!(error = %reason, "backend failure, retrying once");
                self.engine
                    .execute(query, self.settings.query_timeout, self.settings.row_cap)
                    .await
            }
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn audit(
        &self,
        ctx: &RequestContext,
        query_id: &str,
        params_hash: &str,
        result: Option<&QueryResult>,
        started: Instant,
        cache_hit: bool,
        error: Option<&Error>,
    ) {
        self.audit.record(AuditRecord {
            timestamp: chrono::Utc::now(),
            request_id: ctx.request_id.clone(),
            user_id: ctx.user_id.clone(),
            query_id: query_id.to_string(),
            params_hash: params_hash.to_string(),
            row_count: result.map_or(0, |r| r.row_count),
            elapsed_ms: started.elapsed().as_millis() as u64,
            cache_hit,
            status: if error.is_none() {
                AuditStatus::Ok
            } else {
                AuditStatus::Error
            },
            error: error.map(ToString::to_string),
        });
    }
}
