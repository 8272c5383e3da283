//! Query catalog: declarative definitions loaded at startup.
//!
//! Each catalog file is a YAML document describing one registered query:
//!
//! ```yaml
//! query_id: unemployment_rate_latest
//! description: Latest national unemployment rate
//! dataset: LMIS
//! sql: |
//!   SELECT period, rate_pct FROM lmis.unemployment
//!   WHERE metric = :metric ORDER BY period DESC LIMIT 1
//! parameters:
//!   - name: metric
//!     type: text
//!     required: true
//! output_schema:
//!   - { name: period, type: date }
//!   - { name: rate_pct, type: float }
//! cache_ttl_seconds: 3600
//! freshness_sla_seconds: 86400
//! access_level: public
//! tags: [labour, headline]
//! ```
//!
//! The loader rejects templates with undeclared placeholders, duplicate
//! output columns, duplicate query ids, and zero TTLs. Definitions are
//! immutable once loaded; the registry is the only consumer.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

/// Declared type of a query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 text
    Text,
    /// ISO-8601 calendar date (`YYYY-MM-DD`)
    Date,
    /// Boolean
    Bool,
}

/// Inclusive numeric bounds for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ParamRange {
    /// Minimum accepted value
    pub min: Option<f64>,
    /// Maximum accepted value
    pub max: Option<f64>,
}

/// One declared parameter of a registered query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Placeholder name as it appears in the template (`:name`)
    pub name: String,
    /// Declared type; supplied values are coerced to it
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether the caller must supply the parameter
    #[serde(default = "default_true")]
    pub required: bool,
    /// Default used when an optional parameter is absent
    #[serde(default)]
    pub default: Option<Value>,
    /// Numeric bounds, checked after coercion
    #[serde(default)]
    pub range: Option<ParamRange>,
}

fn default_true() -> bool {
    true
}

/// Declared type of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 text
    Text,
    /// ISO-8601 calendar date
    Date,
    /// Boolean
    Bool,
}

/// One column of the declared output schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name, unique within the schema
    pub name: String,
    /// Column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Who may run a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Available to every caller
    #[default]
    Public,
    /// Requires an elevated role
    Restricted,
    /// Ministerial eyes only
    Confidential,
}

/// A registered query definition, immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// Unique id, referenced by intents, agents, and materializations
    pub query_id: String,
    /// Human description shown in the ops catalog
    #[serde(default)]
    pub description: String,
    /// Dataset / source family (`LMIS`, `GCC-STAT`, `CENSUS`, ...)
    pub dataset: String,
    /// SQL template with `:named` placeholders only
    pub sql: String,
    /// Declared parameters; nothing else may be substituted
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Ordered output schema
    pub output_schema: Vec<ColumnSpec>,
    /// Cache TTL, must be positive
    pub cache_ttl_seconds: u64,
    /// Staleness budget before a freshness warning is raised
    pub freshness_sla_seconds: u64,
    /// Access level
    #[serde(default)]
    pub access_level: AccessLevel,
    /// Free-form routing tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Materialized view this query may be served from, when one exists
    #[serde(default)]
    pub materialized_view: Option<String>,
}

/// Matches `:name` placeholders while ignoring `::type` casts.
#[allow(clippy::expect_used)]
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(^|[^:\w]):([a-zA-Z_][a-zA-Z0-9_]*)").expect("placeholder regex is valid")
    })
}

impl QueryDefinition {
    /// Names of all `:placeholders` appearing in the template, in order of
    /// first appearance.
    #[must_use]
    pub fn template_placeholders(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for cap in placeholder_regex().captures_iter(&self.sql) {
            let name = cap[2].to_string();
            if seen.insert(name.clone()) {
                out.push(name);
            }
        }
        out
    }

    /// Look up a declared parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Validate the definition. Called by the loader and the registry.
    pub fn validate(&self) -> Result<()> {
        if self.query_id.is_empty() {
            return Err(Error::Catalog("query_id must not be empty".to_string()));
        }
        if self.cache_ttl_seconds == 0 {
            return Err(Error::Catalog(format!(
                "'{}': cache_ttl_seconds must be positive",
                self.query_id
            )));
        }
        if self.freshness_sla_seconds == 0 {
            return Err(Error::Catalog(format!(
                "'{}': freshness_sla_seconds must be positive",
                self.query_id
            )));
        }
        if self.output_schema.is_empty() {
            return Err(Error::Catalog(format!(
                "'{}': output_schema must not be empty",
                self.query_id
            )));
        }

        let mut column_names = HashSet::new();
        for column in &self.output_schema {
            if !column_names.insert(column.name.as_str()) {
                return Err(Error::Catalog(format!(
                    "'{}': duplicate output column '{}'",
                    self.query_id, column.name
                )));
            }
        }

        let mut param_names = HashSet::new();
        for param in &self.parameters {
            if !param_names.insert(param.name.as_str()) {
                return Err(Error::Catalog(format!(
                    "'{}': duplicate parameter '{}'",
                    self.query_id, param.name
                )));
            }
            if !param.required && param.default.is_none() {
                return Err(Error::Catalog(format!(
                    "'{}': optional parameter '{}' needs a default",
                    self.query_id, param.name
                )));
            }
        }

        for placeholder in self.template_placeholders() {
            if !param_names.contains(placeholder.as_str()) {
                return Err(Error::Catalog(format!(
                    "'{}': template placeholder ':{}' is not a declared parameter",
                    self.query_id, placeholder
                )));
            }
        }
        for param in &self.parameters {
            if !self.template_placeholders().iter().any(|p| p == &param.name) {
                tracing::warn!(
                    query_id = %self.query_id,
                    parameter = %param.name,
                    "declared parameter does not appear in the template"
                );
            }
        }

        Ok(())
    }
}

/// Parse and validate a single catalog document.
pub fn load_str(yaml: &str) -> Result<QueryDefinition> {
    let def: QueryDefinition = serde_yml::from_str(yaml)?;
    def.validate()?;
    Ok(def)
}

/// Load every `*.yml` / `*.yaml` file under `dir` as a catalog entry.
///
/// Files are loaded in lexicographic order so failures are reproducible.
/// Duplicate query ids across files are rejected here; per-file validation
/// happens in [`load_str`].
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<QueryDefinition>> {
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

    let mut seen = HashSet::new();
    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)?;
        let def = load_str(&text).map_err(|e| {
            Error::Catalog(format!("{}: {e}", path.display()))
        })?;
        if !seen.insert(def.query_id.clone()) {
            return Err(Error::Catalog(format!(
                "duplicate query id '{}' in {}",
                def.query_id,
                path.display()
            )));
        }
        definitions.push(def);
    }
    Ok(definitions)
}
