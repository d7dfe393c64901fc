//! Compilation cache.
//!
//! Compiled queries are keyed by their parameterized shape plus everything
//! else that changes the generated command: the metadata version, the
//! dialect, the client-evaluation policy and whether literals were lifted.
//! Entries are only inserted fully built; concurrent compilations of the
//! same shape both succeed and the first insert wins.

use crate::error::RelqResult;
use crate::query::QueryModel;
use crate::visitor::ClientEvaluation;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            enabled: true,
        }
    }
}

/// Everything a compiled query depends on.
///
/// The shape is compared in full, never only by hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub shape: QueryModel,
    pub model_version: u64,
    pub dialect: Arc<str>,
    pub policy: ClientEvaluation,
    pub lift_literals: bool,
}

/// Thread-safe get-or-add cache of compiled queries.
pub struct CompilationCache<V> {
    entries: DashMap<CacheKey, V>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> CompilationCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.max_entries.min(1024)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        if !self.config.enabled {
            return None;
        }
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert unless full; returns the entry now cached under `key`, which
    /// is an earlier racer's value when one got there first.
    pub fn insert(&self, key: CacheKey, value: V) -> V {
        if !self.config.enabled {
            return value;
        }
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&key) {
            tracing::debug!(
                "Compilation cache full ({} entries), not caching",
                self.entries.len()
            );
            return value;
        }
        self.entries.entry(key).or_insert(value).value().clone()
    }

    /// Look `key` up, compiling and inserting on a miss. The second element
    /// is true on a hit.
    pub fn get_or_try_insert_with<F>(&self, key: CacheKey, compile: F) -> RelqResult<(V, bool)>
    where
        F: FnOnce() -> RelqResult<V>,
    {
        if let Some(hit) = self.get(&key) {
            tracing::debug!("Compilation cache hit for {}", key.shape);
            return Ok((hit, true));
        }
        tracing::debug!("Compilation cache miss for {}", key.shape);
        let compiled = compile()?;
        Ok((self.insert(key, compiled), false))
    }

    /// Drop entries compiled against any other metadata version.
    pub fn retain_model_version(&self, version: u64) {
        self.entries.retain(|key, _| key.model_version == version);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelqError;
    use crate::query::Query;

    fn key(entity: &str, version: u64) -> CacheKey {
        CacheKey {
            shape: Query::from(entity).build().unwrap(),
            model_version: version,
            dialect: "sqlite".into(),
            policy: ClientEvaluation::Warn,
            lift_literals: true,
        }
    }

    #[test]
    fn test_cache_hit_miss() {
        let cache = CompilationCache::new(CacheConfig::default());

        assert!(cache.get(&key("Product", 1)).is_none());
        cache.insert(key("Product", 1), 7);
        assert_eq!(cache.get(&key("Product", 1)), Some(7));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = CompilationCache::new(CacheConfig::default());
        assert_eq!(cache.insert(key("Product", 1), 1), 1);
        assert_eq!(cache.insert(key("Product", 1), 2), 1);
    }

    #[test]
    fn test_key_parts_separate_entries() {
        let cache = CompilationCache::new(CacheConfig::default());
        cache.insert(key("Product", 1), 1);
        assert!(cache.get(&key("Product", 2)).is_none());
        assert!(cache.get(&key("Category", 1)).is_none());

        let mut other_dialect = key("Product", 1);
        other_dialect.dialect = "postgres".into();
        assert!(cache.get(&other_dialect).is_none());

        let mut other_policy = key("Product", 1);
        other_policy.policy = ClientEvaluation::Throw;
        assert!(cache.get(&other_policy).is_none());
    }

    #[test]
    fn test_get_or_try_insert_with() {
        let cache = CompilationCache::new(CacheConfig::default());
        let (v, hit) = cache.get_or_try_insert_with(key("Product", 1), || Ok(3)).unwrap();
        assert_eq!((v, hit), (3, false));
        let (v, hit) = cache
            .get_or_try_insert_with(key("Product", 1), || Err(RelqError::Internal("not called".into())))
            .unwrap();
        assert_eq!((v, hit), (3, true));

        // failures are not cached
        let err = cache.get_or_try_insert_with(key("Category", 1), || {
            Err::<i32, _>(RelqError::Internal("boom".into()))
        });
        assert!(err.is_err());
        assert!(cache.get(&key("Category", 1)).is_none());
    }

    #[test]
    fn test_concurrent_compiles_share_one_entry() {
        let cache = CompilationCache::new(CacheConfig::default());
        let results: Vec<Arc<usize>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let cache = &cache;
                    scope.spawn(move || {
                        cache
                            .get_or_try_insert_with(key("Product", 1), || Ok(Arc::new(i)))
                            .unwrap()
                            .0
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.stats().entries, 1);
        let stored = cache.get(&key("Product", 1)).unwrap();
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &stored)));
    }

    #[test]
    fn test_cache_full_and_disabled() {
        let cache = CompilationCache::new(CacheConfig {
            max_entries: 1,
            ..Default::default()
        });
        cache.insert(key("Product", 1), 1);
        assert_eq!(cache.insert(key("Category", 1), 2), 2);
        assert_eq!(cache.stats().entries, 1);

        let cache = CompilationCache::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        cache.insert(key("Product", 1), 1);
        assert!(cache.get(&key("Product", 1)).is_none());
    }

    #[test]
    fn test_retain_model_version() {
        let cache = CompilationCache::new(CacheConfig::default());
        cache.insert(key("Product", 1), 1);
        cache.insert(key("Product", 2), 2);
        cache.retain_model_version(2);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get(&key("Product", 2)), Some(2));
    }
}
