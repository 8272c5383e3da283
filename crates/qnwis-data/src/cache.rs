//! Caching layer for query results.
//!
//! Provides a unified caching interface with an in-memory TTL store for
//! single-node deployments and tests. Keys are deterministic (see
//! [`crate::params::cache_key`]); a write for key K atomically replaces any
//! prior entry for K, and reads hand back defensive copies so callers can
//! never mutate a cached row in place.
//!
//! Writes are best-effort on the request path: a failing store is logged and
//! the request proceeds against the engine.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::Result;

/// Cache behavior knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when the caller does not supply one
    pub default_ttl: Duration,
    /// Maximum entries held in memory (0 = unbounded)
    pub max_entries: usize,
    /// Track hit/miss statistics
    pub track_stats: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(86_400),
            max_entries: 10_000,
            track_stats: true,
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Entries currently held
    pub entries: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Entries dropped on TTL expiry
    pub expirations: u64,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Abstract cache store interface.
///
/// Implementations must expire by TTL, support prefix invalidation, and be
/// safe for concurrent use. Access is serialized at key granularity: a read
/// that begins after a write completed observes that write.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a cached value by key. `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value, replacing any prior entry for the key atomically.
    ///
    /// `None` TTL means the store's configured default.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Delete one key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key starting with `prefix`. Returns the count removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Current statistics.
    async fn stats(&self) -> Result<CacheStats>;

    /// Drop every entry.
    async fn clear(&self) -> Result<()>;
}

/// Get a typed value from cache (deserialize from JSON).
///
/// Deserialization doubles as the defensive copy: the caller owns a fresh
/// value with no aliasing into the store.
pub async fn cache_get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(bytes) => {
            let value: T = serde_json::from_slice(&bytes)?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Set a typed value in cache (serialize to JSON).
pub async fn cache_set_json<T: Serialize>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    cache.set(key, &bytes, ttl).await
}

// ============================================================================
// In-memory store
// ============================================================================

struct CacheEntry {
    data: Vec<u8>,
    written_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.written_at.elapsed() > self.ttl
    }
}

/// In-memory cache store with TTL support.
///
/// Writes replace entries atomically under the map's write lock; eviction is
/// least-recently-accessed once `max_entries` is exceeded.
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheStore {
    /// Create a new in-memory cache store.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn default_config() -> Self {
        Self::new(CacheConfig::default())
    }

    async fn maybe_evict(&self) {
        let mut entries = self.entries.write().await;
        let mut stats = self.stats.write().await;

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        stats.expirations += (before - entries.len()) as u64;

        if self.config.max_entries > 0 && entries.len() > self.config.max_entries {
            let to_evict = entries.len() - self.config.max_entries;
            let mut by_access: Vec<_> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.last_accessed))
                .collect();
            by_access.sort_by_key(|(_, accessed)| *accessed);
            for (key, _) in by_access.into_iter().take(to_evict) {
                entries.remove(&key);
                stats.evictions += 1;
            }
        }
        stats.entries = entries.len() as u64;
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.write().await;
        let result = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.last_accessed = Instant::now();
                Some(entry.data.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        drop(entries);

        if self.config.track_stats {
            let mut stats = self.stats.write().await;
            if result.is_some() {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
        Ok(result)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        let entry = CacheEntry {
            data: value.to_vec(),
            written_at: now,
            ttl: ttl.unwrap_or(self.config.default_ttl),
            last_accessed: now,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        self.maybe_evict().await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut stats = self.stats.read().await.clone();
        stats.entries = self.entries.read().await.len() as u64;
        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}
