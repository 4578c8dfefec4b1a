/// Identity cache - bounded, expiring in-memory store for lookup results
use crate::metrics;
use chrono::{DateTime, Utc};
use moka::{policy::EvictionPolicy, sync::Cache};
use std::{sync::Arc, time::Duration};

/// Cache sizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction (default: 10,000)
    pub max_size: u64,
    /// Entry lifetime measured from creation (default: 6 hours)
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Cached lookup result
///
/// `value: None` records that the upstream confirmed the identity does not
/// exist, which is different from a cache miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    /// Unix seconds at which the result was obtained
    pub created_at: i64,
    pub value: Option<V>,
}

/// How keys are folded before lookup and store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyNormalizer {
    /// Usernames: case-insensitive
    Lowercase,
    /// UUIDs: canonical dashed lowercase, falling back to lowercase
    CanonicalId,
}

impl KeyNormalizer {
    pub fn normalize(&self, key: &str) -> String {
        match self {
            KeyNormalizer::Lowercase => key.to_lowercase(),
            KeyNormalizer::CanonicalId => {
                super::parse_canonical_id(key).unwrap_or_else(|| key.to_lowercase())
            }
        }
    }
}

/// TTL + LRU cache for one lookup kind
pub struct TtlCache<V> {
    entries: Cache<String, CacheEntry<V>>,
    ttl_secs: i64,
    normalizer: KeyNormalizer,
    /// Metrics label ("name" or "profile")
    kind: &'static str,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache
    pub fn new(kind: &'static str, normalizer: KeyNormalizer, config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_size)
            .time_to_live(config.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            entries,
            ttl_secs: config.ttl.as_secs() as i64,
            normalizer,
            kind,
        }
    }

    /// Get a live entry
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.get_at(key, Utc::now().timestamp())
    }

    /// Get a live entry as seen at `now` (unix seconds)
    pub fn get_at(&self, key: &str, now: i64) -> Option<CacheEntry<V>> {
        let normalized = self.normalizer.normalize(key);

        let result = match self.entries.get(&normalized) {
            Some(entry) if now - entry.created_at > self.ttl_secs => {
                // Logically gone; drop the physical copy too
                self.entries.invalidate(&normalized);
                None
            }
            other => other,
        };

        metrics::record_cache_access(self.kind, result.is_some());
        result
    }

    /// Store a result, overwriting any previous entry
    pub fn put(&self, key: &str, value: Option<V>, created_at: DateTime<Utc>) {
        let normalized = self.normalizer.normalize(key);
        self.entries.insert(
            normalized,
            CacheEntry {
                created_at: created_at.timestamp(),
                value,
            },
        );
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    /// Apply pending evictions and return the resulting entry count
    pub fn run_maintenance(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// Approximate number of entries
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The two independent caches, one per lookup kind
pub struct IdentityCaches {
    /// username → UUID
    pub names: Arc<TtlCache<String>>,
    /// UUID → skin property
    pub profiles: Arc<TtlCache<super::SkinProperty>>,
}

impl IdentityCaches {
    pub fn new(name_config: &CacheConfig, profile_config: &CacheConfig) -> Self {
        Self {
            names: Arc::new(TtlCache::new(
                metrics::KIND_NAME,
                KeyNormalizer::Lowercase,
                name_config,
            )),
            profiles: Arc::new(TtlCache::new(
                metrics::KIND_PROFILE,
                KeyNormalizer::CanonicalId,
                profile_config,
            )),
        }
    }
}
