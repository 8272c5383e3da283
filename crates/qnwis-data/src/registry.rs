//! Query registry: the only path from a query id to something executable.
//!
//! Populated once at startup from catalog definitions and immutable
//! afterwards. Lookups of unknown ids fail with [`Error::UnknownQuery`];
//! nothing outside the registry can put SQL in front of the engine.

use crate::catalog::QueryDefinition;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Immutable lookup table of registered queries.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    by_id: HashMap<String, QueryDefinition>,
}

impl QueryRegistry {
    /// Build a registry from already-validated definitions.
    ///
    /// Re-validates each entry and rejects duplicate ids, so a registry can
    /// be assembled from multiple catalog sources safely.
    pub fn new(definitions: Vec<QueryDefinition>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(definitions.len());
        for def in definitions {
            def.validate()?;
            if by_id.contains_key(&def.query_id) {
                return Err(Error::Catalog(format!(
                    "duplicate query id '{}'",
                    def.query_id
                )));
            }
            by_id.insert(def.query_id.clone(), def);
        }
        Ok(Self { by_id })
    }

    /// Load a registry from a directory of catalog files.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::new(crate::catalog::load_dir(dir)?)
    }

    /// Look up a definition by id.
    pub fn get(&self, query_id: &str) -> Result<&QueryDefinition> {
        self.by_id
            .get(query_id)
            .ok_or_else(|| Error::UnknownQuery(query_id.to_string()))
    }

    /// Whether an id is registered.
    #[must_use]
    pub fn contains(&self, query_id: &str) -> bool {
        self.by_id.contains_key(query_id)
    }

    /// All registered ids, sorted for deterministic iteration.
    #[must_use]
    pub fn query_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_id.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Definitions carrying a given tag, sorted by id.
    #[must_use]
    pub fn by_tag(&self, tag: &str) -> Vec<&QueryDefinition> {
        let mut defs: Vec<&QueryDefinition> = self
            .by_id
            .values()
            .filter(|def| def.tags.iter().any(|t| t == tag))
            .collect();
        defs.sort_unstable_by(|a, b| a.query_id.cmp(&b.query_id));
        defs
    }

    /// Definitions belonging to a dataset (source family), sorted by id.
    ///
    /// The match is case-insensitive because citation prefixes in agent
    /// narratives are free text.
    #[must_use]
    pub fn by_dataset(&self, dataset: &str) -> Vec<&QueryDefinition> {
        let mut defs: Vec<&QueryDefinition> = self
            .by_id
            .values()
            .filter(|def| def.dataset.eq_ignore_ascii_case(dataset))
            .collect();
        defs.sort_unstable_by(|a, b| a.query_id.cmp(&b.query_id));
        defs
    }

    /// Number of registered queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
