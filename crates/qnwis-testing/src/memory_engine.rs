//! In-memory data engine backed by named tables.
//!
//! Queries are routed by table name: the engine serves the rows of the
//! first registered table whose name appears in the rendered SQL. Failure
//! injection covers the client's retry path; DDL calls are recorded for
//! materialization tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use qnwis_data::{BoundQuery, DataEngine, Error, IndexDef, Result, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A [`DataEngine`] over static in-memory tables.
#[derive(Default)]
pub struct MemoryEngine {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    fail_next: AtomicUsize,
    ddl_log: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl MemoryEngine {
    /// Empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table.
    #[must_use]
    pub fn with_table(self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.lock().insert(name.into(), rows);
        self
    }

    /// Simulate latency per query.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `n` executions fail with a backend error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// DDL statements seen so far.
    #[must_use]
    pub fn ddl_log(&self) -> Vec<String> {
        self.ddl_log.lock().clone()
    }

    fn rows_for(&self, sql: &str) -> Result<Vec<Row>> {
        let tables = self.tables.lock();
        for (name, rows) in tables.iter() {
            if sql.contains(name.as_str()) {
                return Ok(rows.clone());
            }
        }
        Err(Error::Backend(format!("no table matches query: {sql}")))
    }
}

#[async_trait]
impl DataEngine for MemoryEngine {
    async fn execute(
        &self,
        query: &BoundQuery,
        _timeout: Duration,
        row_cap: usize,
    ) -> Result<Vec<Row>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Backend("injected failure".to_string()));
        }
        let rows = self.rows_for(&query.sql)?;
        if rows.len() > row_cap {
            return Err(Error::ResultTooLarge {
                query_id: String::new(),
                cap: row_cap,
            });
        }
        Ok(rows)
    }

    async fn create_materialized_view(&self, name: &str, select_sql: &str) -> Result<()> {
        self.ddl_log.lock().push(format!("create {name} as {select_sql}"));
        Ok(())
    }

    async fn refresh_materialized_view(&self, name: &str) -> Result<()> {
        self.ddl_log.lock().push(format!("refresh {name}"));
        Ok(())
    }

    async fn ensure_index(&self, view: &str, index: &IndexDef) -> Result<()> {
        self.ddl_log.lock().push(format!("index {view}.{}", index.name));
        Ok(())
    }
}
