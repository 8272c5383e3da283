//! Append-only audit log of every deterministic data access.
//!
//! One record per query execution (hit or miss) and per materialization
//! refresh outcome. The production sink is the tracing pipeline; tests and
//! the ops console read the in-memory sink.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Terminal status of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Completed normally
    Ok,
    /// Failed; `error` carries the sanitized reason
    Error,
}

/// One audit row, shaped per the persisted-state contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the operation finished
    pub timestamp: DateTime<Utc>,
    /// Run the operation belonged to
    pub request_id: String,
    /// Caller, when known
    pub user_id: Option<String>,
    /// Registered query id (or view name for refreshes)
    pub query_id: String,
    /// Deterministic hash of the bound parameters
    pub params_hash: String,
    /// Rows returned
    pub row_count: usize,
    /// Wall time spent
    pub elapsed_ms: u64,
    /// Whether the result came from cache
    pub cache_hit: bool,
    /// Outcome
    pub status: AuditStatus,
    /// Sanitized failure reason, when `status` is `Error`
    pub error: Option<String>,
}

/// Append-only audit sink.
pub trait AuditLog: Send + Sync {
    /// Append one record. Must not fail the calling request.
    fn record(&self, record: AuditRecord);
}

/// Audit sink that emits structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "qnwis::audit",
            request_id = %record.request_id,
            query_id = %record.query_id,
            params_hash = %record.params_hash,
            row_count = record.row_count,
            elapsed_ms = record.elapsed_ms,
            cache_hit = record.cache_hit,
            status = ?record.status,
            error = record.error.as_deref().unwrap_or(""),
            "data access"
        );
    }
}

/// In-memory audit sink for tests and introspection.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all records so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Records for one query id, in append order.
    #[must_use]
    pub fn records_for(&self, query_id: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.query_id == query_id)
            .cloned()
            .collect()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}
