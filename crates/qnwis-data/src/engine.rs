//! Engine abstraction: the seam to the underlying SQL engine.
//!
//! The layer renders a [`BoundQuery`] (template text plus named values) and
//! hands it to a [`DataEngine`]. The engine substitutes values exclusively
//! through its bind facility; templates reach it verbatim. The
//! sqlx-backed implementation is feature-gated the same way the database
//! features are gated elsewhere in the workspace; tests run against an
//! in-memory engine.

use crate::error::{Error, Result};
use crate::params::BoundParams;
use crate::types::Row;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A template plus the values to bind into it.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    /// SQL template with `:name` placeholders
    pub sql: String,
    /// Values for every placeholder, already coerced
    pub params: BoundParams,
}

/// Index declaration for a materialized view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name
    pub name: String,
    /// Columns, in order
    pub columns: Vec<String>,
    /// Unique index (required for concurrent refresh on at least one index)
    #[serde(default)]
    pub unique: bool,
}

/// Abstract data engine.
///
/// `execute` must honor the statement timeout and stop reading past
/// `row_cap`, surfacing [`Error::ResultTooLarge`]. The materialization
/// methods are only invoked by the refresher with operator-declared DDL.
#[async_trait]
pub trait DataEngine: Send + Sync {
    /// Execute a bound template and collect rows.
    async fn execute(
        &self,
        query: &BoundQuery,
        timeout: Duration,
        row_cap: usize,
    ) -> Result<Vec<Row>>;

    /// Create a materialized view if it does not exist.
    async fn create_materialized_view(&self, name: &str, select_sql: &str) -> Result<()>;

    /// Refresh a materialized view; readers keep the previous snapshot
    /// while the refresh runs.
    async fn refresh_materialized_view(&self, name: &str) -> Result<()>;

    /// Ensure an index exists on a materialized view.
    async fn ensure_index(&self, view: &str, index: &IndexDef) -> Result<()>;
}

/// Rewrite `:name` placeholders to positional `$1..$n` binds.
///
/// Returns the rewritten SQL and the parameter names in positional order
/// (a name appearing twice binds the same value twice). `::type` casts are
/// left untouched.
pub fn to_positional(query: &BoundQuery) -> Result<(String, Vec<String>)> {
    let sql = &query.sql;
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut order: Vec<String> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b':' {
            // '::' is a cast, not a placeholder
            if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                out.push_str("::");
                i += 2;
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }
            if end > start && !bytes[start].is_ascii_digit() {
                let name = &sql[start..end];
                if query.params.get(name).is_none() {
                    return Err(Error::Backend(format!(
                        "placeholder ':{name}' has no bound value"
                    )));
                }
                order.push(name.to_string());
                out.push('$');
                out.push_str(&order.len().to_string());
                i = end;
                continue;
            }
        }
        let ch = sql[i..].chars().next().unwrap_or('\0');
        out.push(ch);
        i += ch.len_utf8();
    }

    Ok((out, order))
}

#[cfg(feature = "postgres")]
pub use postgres::SqlxEngine;

#[cfg(feature = "postgres")]
mod postgres {
    use super::{BoundQuery, DataEngine, IndexDef};
    use crate::error::{Error, Result};
    use crate::types::Row;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::{Column, Row as SqlxRow, TypeInfo};
    use std::time::Duration;

    /// sqlx/Postgres-backed engine with a bounded shared pool.
    pub struct SqlxEngine {
        pool: sqlx::PgPool,
    }

    impl SqlxEngine {
        /// Connect with a bounded pool. `acquire_timeout` failures surface
        /// as [`Error::Backend`], matching the shared-resource policy.
        pub async fn connect(
            url: &str,
            max_connections: u32,
            acquire_timeout: Duration,
        ) -> Result<Self> {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(acquire_timeout)
                .connect(url)
                .await
                .map_err(|e| Error::Backend(format!("connect failed: {e}")))?;
            Ok(Self { pool })
        }

        /// Wrap an existing pool.
        #[must_use]
        pub fn from_pool(pool: sqlx::PgPool) -> Self {
            Self { pool }
        }

        fn bind_values<'q>(
            mut q: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
            query: &'q BoundQuery,
            order: &'q [String],
        ) -> Result<sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>>
        {
            for name in order {
                let value = query
                    .params
                    .get(name)
                    .ok_or_else(|| Error::Backend(format!("missing bind '{name}'")))?;
                q = match value {
                    JsonValue::Bool(b) => q.bind(*b),
                    JsonValue::Number(n) if n.is_i64() => q.bind(n.as_i64()),
                    JsonValue::Number(n) => q.bind(n.as_f64()),
                    JsonValue::String(s) => q.bind(s.as_str()),
                    other => {
                        return Err(Error::Backend(format!(
                            "unsupported bind value for '{name}': {other}"
                        )))
                    }
                };
            }
            Ok(q)
        }

        fn row_to_json(row: &sqlx::postgres::PgRow) -> Row {
            let mut obj = Row::new();
            for (i, col) in row.columns().iter().enumerate() {
                let col_type = col.type_info().name();
                let value: JsonValue = match col_type {
                    "TEXT" | "VARCHAR" | "CHAR" | "NAME" => row
                        .try_get::<String, _>(i)
                        .map(JsonValue::String)
                        .unwrap_or(JsonValue::Null),
                    "INT2" | "INT4" | "SERIAL" => row
                        .try_get::<i32, _>(i)
                        .map(|v| JsonValue::Number(v.into()))
                        .unwrap_or(JsonValue::Null),
                    "INT8" | "BIGSERIAL" => row
                        .try_get::<i64, _>(i)
                        .map(|v| JsonValue::Number(v.into()))
                        .unwrap_or(JsonValue::Null),
                    "FLOAT4" => row
                        .try_get::<f32, _>(i)
                        .ok()
                        .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null),
                    "FLOAT8" | "NUMERIC" => row
                        .try_get::<f64, _>(i)
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null),
                    "BOOL" => row
                        .try_get::<bool, _>(i)
                        .map(JsonValue::Bool)
                        .unwrap_or(JsonValue::Null),
                    "DATE" => row
                        .try_get::<chrono::NaiveDate, _>(i)
                        .map(|d| JsonValue::String(d.format("%Y-%m-%d").to_string()))
                        .unwrap_or(JsonValue::Null),
                    _ => row
                        .try_get::<String, _>(i)
                        .map(JsonValue::String)
                        .unwrap_or(JsonValue::Null),
                };
                obj.insert(col.name().to_string(), value);
            }
            obj
        }
    }

    #[async_trait]
    impl DataEngine for SqlxEngine {
        async fn execute(
            &self,
            query: &BoundQuery,
            timeout: Duration,
            row_cap: usize,
        ) -> Result<Vec<Row>> {
            let (sql, order) = super::to_positional(query)?;
            let bound = Self::bind_values(sqlx::query(&sql), query, &order)?;

            let fetched = tokio::time::timeout(timeout, bound.fetch_all(&self.pool))
                .await
                .map_err(|_| {
                    Error::Backend(format!("statement timeout after {}ms", timeout.as_millis()))
                })?
                .map_err(|e| Error::Backend(format!("query failed: {e}")))?;

            if fetched.len() > row_cap {
                return Err(Error::ResultTooLarge {
                    query_id: String::new(),
                    cap: row_cap,
                });
            }

            Ok(fetched.iter().map(Self::row_to_json).collect())
        }

        async fn create_materialized_view(&self, name: &str, select_sql: &str) -> Result<()> {
            let ddl =
                format!("CREATE MATERIALIZED VIEW IF NOT EXISTS {name} AS {select_sql}");
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Materialization {
                    view: name.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(())
        }

        async fn refresh_materialized_view(&self, name: &str) -> Result<()> {
            let ddl = format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {name}");
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Materialization {
                    view: name.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(())
        }

        async fn ensure_index(&self, view: &str, index: &IndexDef) -> Result<()> {
            let unique = if index.unique { "UNIQUE " } else { "" };
            let ddl = format!(
                "CREATE {unique}INDEX IF NOT EXISTS {} ON {view} ({})",
                index.name,
                index.columns.join(", ")
            );
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Materialization {
                    view: view.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(())
        }
    }
}
