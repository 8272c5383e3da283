//! Error types for the QNWIS data layer

use thiserror::Error;

/// Error type for deterministic data layer operations
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A catalog file failed validation at load time
    #[error("Invalid catalog entry: {0}")]
    Catalog(String),

    /// Lookup of a query id that is not in the registry
    #[error("Unknown query id: {0}")]
    UnknownQuery(String),

    /// A supplied parameter is missing, undeclared, badly typed, or out of range
    #[error("Parameter validation failed for '{query_id}': {reason}")]
    ParamValidation {
        /// Query the parameters were bound against
        query_id: String,
        /// What was wrong with the supplied parameters
        reason: String,
    },

    /// The underlying engine failed after the single retry
    #[error("Backend failure: {0}")]
    Backend(String),

    /// A query produced more rows than the configured cap
    #[error("Result for '{query_id}' exceeded the row cap of {cap}")]
    ResultTooLarge {
        /// Query that overflowed
        query_id: String,
        /// Configured row cap
        cap: usize,
    },

    /// Cache backend failure (reads surface this; writes only log it)
    #[error("Cache error: {0}")]
    Cache(String),

    /// Materialized view refresh failure
    #[error("Materialization error for view '{view}': {reason}")]
    Materialization {
        /// View that failed to refresh
        view: String,
        /// Failure detail
        reason: String,
    },

    /// IO error while reading catalog files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error in a catalog file
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a parameter validation error.
    pub fn param(query_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParamValidation {
            query_id: query_id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for data layer operations
pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_validation_display() {
        let err = Error::param("unemployment_rate_latest", "missing required parameter 'year'");
        assert_eq!(
            err.to_string(),
            "Parameter validation failed for 'unemployment_rate_latest': missing required parameter 'year'"
        );
    }

    #[test]
    fn test_result_too_large_display() {
        let err = Error::ResultTooLarge {
            query_id: "employment_by_sector".to_string(),
            cap: 50_000,
        };
        assert!(err.to_string().contains("50000"));
    }

    #[test]
    fn test_unknown_query_display() {
        let err = Error::UnknownQuery("nope".to_string());
        assert_eq!(err.to_string(), "Unknown query id: nope");
    }
}
