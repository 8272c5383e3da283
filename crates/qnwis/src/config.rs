//! Orchestrator configuration.
//!
//! Defaults match the deployed service; everything can be overridden with
//! builder methods or `QNWIS_*` environment variables. Construction
//! validates cross-field invariants (notably `parallelism ≤
//! affinity_pool_size`), so an [`OrchestratorConfig`] in hand is always
//! runnable.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::time::Duration;

/// Per-level time budgets.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Budget per pipeline stage
    pub stage: Duration,
    /// Budget per registered query
    pub query: Duration,
    /// Budget per agent invocation
    pub agent: Duration,
    /// Budget per scenario (the full inner sub-pipeline)
    pub scenario: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            stage: Duration::from_millis(30_000),
            query: Duration::from_millis(5_000),
            agent: Duration::from_millis(30_000),
            scenario: Duration::from_secs(30 * 60),
        }
    }
}

/// Scenario executor sizing.
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    /// Worker count W
    pub parallelism: usize,
    /// Affinity slot count |P|; must be ≥ `parallelism`
    pub affinity_pool_size: usize,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            parallelism: 6,
            affinity_pool_size: 6,
        }
    }
}

impl ScenarioSettings {
    /// Input queue capacity (2·W); bounds memory and throttles generation.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.parallelism.saturating_mul(2).max(1)
    }
}

/// Cache naming and defaults surfaced to the data layer.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Key namespace
    pub namespace: String,
    /// TTL used when a query declares none at an operation level
    pub default_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: "qnwis".to_string(),
            default_ttl_seconds: 86_400,
        }
    }
}

/// Claim-verifier tolerances and policy.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Absolute tolerance for count/currency matching
    pub abs_epsilon: f64,
    /// Relative tolerance for count/currency matching
    pub rel_epsilon: f64,
    /// Tolerance for percent matching, in percentage points
    pub epsilon_pct: f64,
    /// Enforce that bullet groups of percentages sum to 100
    pub sum_to_100: bool,
    /// A claim without a citation prefix fails as uncited
    pub require_citation_first: bool,
    /// Any verification error terminates the run
    pub strict: bool,
    /// Numbers below this absolute value are not treated as claims
    pub ignore_numbers_below: f64,
    /// Skip four-digit values in the calendar-year range
    pub ignore_years: bool,
    /// When a claim carries a `QID:` annotation, bind against that result
    /// only
    pub prefer_query_id: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            abs_epsilon: 0.5,
            rel_epsilon: 0.01,
            epsilon_pct: 0.5,
            sum_to_100: true,
            require_citation_first: true,
            strict: false,
            ignore_numbers_below: 1.0,
            ignore_years: true,
            prefer_query_id: true,
        }
    }
}

/// Feature flags gating optional pipeline behavior.
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    /// Fan scenarios out across the worker pool; serial when off
    pub enable_parallel_scenarios: bool,
    /// Run claim verification; a warning is attached when off
    pub enable_verification: bool,
    /// Run the context-retrieval stage
    pub enable_rag: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_parallel_scenarios: true,
            enable_verification: true,
            enable_rag: true,
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Intents the orchestrator accepts; empty means "whatever the intent
    /// catalog declares"
    pub enabled_intents: HashSet<String>,
    /// Time budgets
    pub timeouts: Timeouts,
    /// Scenario executor sizing
    pub scenarios: ScenarioSettings,
    /// Cache naming
    pub cache: CacheSettings,
    /// Verifier tolerances
    pub verification: VerificationConfig,
    /// Feature flags
    pub feature_flags: FeatureFlags,
    /// Cap on concurrently running specialist agents
    pub agent_concurrency_cap: usize,
}

impl OrchestratorConfig {
    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.scenarios.parallelism == 0 {
            return Err(Error::Internal(
                "scenarios.parallelism must be positive".to_string(),
            ));
        }
        if self.scenarios.parallelism > self.scenarios.affinity_pool_size {
            return Err(Error::Internal(format!(
                "scenarios.parallelism ({}) exceeds affinity_pool_size ({})",
                self.scenarios.parallelism, self.scenarios.affinity_pool_size
            )));
        }
        Ok(())
    }

    /// Read configuration from `QNWIS_*` environment variables, falling
    /// back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(intents) = env_string(env_vars::ENABLED_INTENTS) {
            config.enabled_intents = intents
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        config.timeouts.stage = env_duration_ms(env_vars::STAGE_TIMEOUT_MS, config.timeouts.stage);
        config.timeouts.query = env_duration_ms(env_vars::QUERY_TIMEOUT_MS, config.timeouts.query);
        config.timeouts.agent = env_duration_ms(env_vars::AGENT_TIMEOUT_MS, config.timeouts.agent);
        config.scenarios.parallelism =
            env_usize(env_vars::SCENARIO_PARALLELISM, config.scenarios.parallelism);
        config.scenarios.affinity_pool_size = env_usize(
            env_vars::SCENARIO_AFFINITY_POOL,
            config.scenarios.affinity_pool_size,
        );
        if let Some(ns) = env_string(env_vars::CACHE_NAMESPACE) {
            config.cache.namespace = ns;
        }
        config.cache.default_ttl_seconds =
            env_u64(env_vars::CACHE_DEFAULT_TTL, config.cache.default_ttl_seconds);
        config.verification.strict =
            env_bool(env_vars::VERIFY_STRICT, config.verification.strict);
        config.verification.require_citation_first = env_bool(
            env_vars::VERIFY_REQUIRE_CITATION,
            config.verification.require_citation_first,
        );
        config.feature_flags.enable_parallel_scenarios = env_bool(
            env_vars::ENABLE_PARALLEL_SCENARIOS,
            config.feature_flags.enable_parallel_scenarios,
        );
        config.feature_flags.enable_verification = env_bool(
            env_vars::ENABLE_VERIFICATION,
            config.feature_flags.enable_verification,
        );
        config.feature_flags.enable_rag =
            env_bool(env_vars::ENABLE_RAG, config.feature_flags.enable_rag);
        config
    }

    /// Restrict accepted intents.
    #[must_use]
    pub fn with_enabled_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_intents = intents.into_iter().map(Into::into).collect();
        self
    }

    /// Override feature flags.
    #[must_use]
    pub fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }

    /// Override verification settings.
    #[must_use]
    pub fn with_verification(mut self, verification: VerificationConfig) -> Self {
        self.verification = verification;
        self
    }

    /// Override time budgets.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override scenario executor sizing.
    #[must_use]
    pub fn with_scenarios(mut self, scenarios: ScenarioSettings) -> Self {
        self.scenarios = scenarios;
        self
    }

    /// Effective agent concurrency for a run selecting `selected` agents.
    #[must_use]
    pub fn agent_concurrency(&self, selected: usize) -> usize {
        let cap = if self.agent_concurrency_cap == 0 {
            8
        } else {
            self.agent_concurrency_cap
        };
        selected.clamp(1, cap)
    }
}

/// Environment variable names.
pub mod env_vars {
    /// Comma-separated accepted intents
    pub const ENABLED_INTENTS: &str = "QNWIS_ENABLED_INTENTS";
    /// Per-stage budget, milliseconds
    pub const STAGE_TIMEOUT_MS: &str = "QNWIS_STAGE_TIMEOUT_MS";
    /// Per-query budget, milliseconds
    pub const QUERY_TIMEOUT_MS: &str = "QNWIS_QUERY_TIMEOUT_MS";
    /// Per-agent budget, milliseconds
    pub const AGENT_TIMEOUT_MS: &str = "QNWIS_AGENT_TIMEOUT_MS";
    /// Scenario worker count
    pub const SCENARIO_PARALLELISM: &str = "QNWIS_SCENARIO_PARALLELISM";
    /// Affinity slot count
    pub const SCENARIO_AFFINITY_POOL: &str = "QNWIS_SCENARIO_AFFINITY_POOL";
    /// Cache namespace
    pub const CACHE_NAMESPACE: &str = "QNWIS_CACHE_NAMESPACE";
    /// Default cache TTL, seconds
    pub const CACHE_DEFAULT_TTL: &str = "QNWIS_CACHE_DEFAULT_TTL";
    /// Strict verification
    pub const VERIFY_STRICT: &str = "QNWIS_VERIFY_STRICT";
    /// Require citation prefixes
    pub const VERIFY_REQUIRE_CITATION: &str = "QNWIS_VERIFY_REQUIRE_CITATION";
    /// Parallel scenario fan-out
    pub const ENABLE_PARALLEL_SCENARIOS: &str = "QNWIS_ENABLE_PARALLEL_SCENARIOS";
    /// Claim verification
    pub const ENABLE_VERIFICATION: &str = "QNWIS_ENABLE_VERIFICATION";
    /// Context retrieval
    pub const ENABLE_RAG: &str = "QNWIS_ENABLE_RAG";
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    env_string(name).map_or(default, |s| {
        matches!(s.as_str(), "1" | "true" | "yes" | "on")
    })
}

fn env_usize(name: &str, default: usize) -> usize {
    env_string(name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env_string(name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    env_string(name)
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_millis)
}
