//! Result types produced by the deterministic data layer.
//!
//! A [`QueryResult`] is the only shape in which data reaches the rest of the
//! system: ordered rows of typed values plus provenance and freshness
//! metadata. Rows are aggregated by construction (a property of the reviewed
//! catalog, not enforced at runtime) and are treated as an immutable typed
//! contract downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row: column name to typed JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Where a result came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Dataset / source family the query belongs to (e.g. `LMIS`, `GCC-STAT`)
    pub dataset: String,
    /// Source locator: the materialized view name, or `direct` for a
    /// template executed against base tables
    pub source: String,
}

/// How fresh a result is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    /// Timestamp the result was produced (cache hits keep the original)
    pub asof: DateTime<Utc>,
    /// Age at the time the result was handed to the caller
    pub age_seconds: i64,
}

impl Freshness {
    /// Freshness for a result produced right now.
    #[must_use]
    pub fn now() -> Self {
        Self {
            asof: Utc::now(),
            age_seconds: 0,
        }
    }

    /// Recompute `age_seconds` against the current clock.
    #[must_use]
    pub fn aged(mut self) -> Self {
        self.age_seconds = (Utc::now() - self.asof).num_seconds().max(0);
        self
    }
}

/// Output of one registered query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Registered query id
    pub query_id: String,
    /// Parameters the query actually ran with (after defaults + coercion)
    pub params_used: serde_json::Map<String, Value>,
    /// Ordered rows matching the declared output schema
    pub rows: Vec<Row>,
    /// Dataset and source locator
    pub provenance: Provenance,
    /// As-of timestamp and age
    pub freshness: Freshness,
    /// Number of rows (kept explicit so it survives serialization untouched)
    pub row_count: usize,
}

impl QueryResult {
    /// Iterate over every numeric value in the rows.
    ///
    /// Used by the claim verifier to bind narrative numbers to cells.
    pub fn numeric_values(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.rows.iter().flat_map(|row| {
            row.iter()
                .filter_map(|(name, value)| value.as_f64().map(|v| (name.as_str(), v)))
        })
    }

    /// Look up a single-cell value, useful for latest-value style queries.
    #[must_use]
    pub fn first_value(&self, column: &str) -> Option<&Value> {
        self.rows.first().and_then(|row| row.get(column))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_with_rows(rows: Vec<Row>) -> QueryResult {
        let row_count = rows.len();
        QueryResult {
            query_id: "q".to_string(),
            params_used: serde_json::Map::new(),
            rows,
            provenance: Provenance {
                dataset: "LMIS".to_string(),
                source: "direct".to_string(),
            },
            freshness: Freshness::now(),
            row_count,
        }
    }

    #[test]
    fn test_numeric_values_skips_text() {
        let mut row = Row::new();
        row.insert("sector".to_string(), json!("construction"));
        row.insert("headcount".to_string(), json!(1234));
        row.insert("share".to_string(), json!(12.5));
        let result = result_with_rows(vec![row]);

        let values: Vec<(&str, f64)> = result.numeric_values().collect();
        assert_eq!(values.len(), 2);
        assert!(values.contains(&("headcount", 1234.0)));
        assert!(values.contains(&("share", 12.5)));
    }

    #[test]
    fn test_first_value() {
        let mut row = Row::new();
        row.insert("rate".to_string(), json!(3.9));
        let result = result_with_rows(vec![row]);
        assert_eq!(result.first_value("rate"), Some(&json!(3.9)));
        assert_eq!(result.first_value("missing"), None);
    }

    #[test]
    fn test_freshness_aged_is_non_negative() {
        let fresh = Freshness::now().aged();
        assert!(fresh.age_seconds >= 0);
    }
}
