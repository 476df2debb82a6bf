//! Compiled query cache
//!
//! Maps a plan fingerprint to its compiled query with LRU eviction. The
//! key also covers the configuration the query was compiled under, since
//! vector size, bucket counts and the parallel flag are baked into the
//! generated code.

use super::query::CompiledQuery;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache key: plan fingerprint plus configuration hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Structural plan hash
    pub plan: u64,
    /// Hash of the compile-time configuration
    pub config: u64,
}

#[derive(Default)]
struct Entries {
    queries: HashMap<CacheKey, Arc<CompiledQuery>>,
    /// Most recently used last
    order: VecDeque<CacheKey>,
}

impl Entries {
    fn touch(&mut self, key: CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key);
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryCacheStatistics {
    /// Queries currently cached
    pub cached_queries: usize,
    /// Capacity
    pub max_size: usize,
    /// Lookups that found a query
    pub hits: u64,
    /// Lookups that did not
    pub misses: u64,
    /// Queries dropped to make room
    pub evictions: u64,
    /// `hits / (hits + misses)`, 0 before the first lookup
    pub hit_rate: f64,
}

/// Bounded LRU cache of compiled queries
pub struct QueryCache {
    entries: Mutex<Entries>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    /// Cache holding at most `max_size` queries
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cached query for `key`, marking it most recently used
    pub fn get(&self, key: CacheKey) -> Option<Arc<CompiledQuery>> {
        let mut entries = self.entries.lock();
        match entries.queries.get(&key).cloned() {
            Some(query) => {
                entries.touch(key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(query)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a query, evicting the least recently used ones when full
    pub fn insert(&self, key: CacheKey, query: Arc<CompiledQuery>) {
        if self.max_size == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if !entries.queries.contains_key(&key) {
            while entries.queries.len() >= self.max_size {
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                entries.queries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(plan = oldest.plan, "evicted compiled query");
            }
        }
        entries.queries.insert(key, query);
        entries.touch(key);
    }

    /// Whether `key` is cached, without touching LRU order or counters
    pub fn contains(&self, key: CacheKey) -> bool {
        self.entries.lock().queries.contains_key(&key)
    }

    /// Cached queries
    pub fn len(&self) -> usize {
        self.entries.lock().queries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every query; counters are kept
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.queries.clear();
        entries.order.clear();
    }

    /// Counter snapshot
    pub fn statistics(&self) -> QueryCacheStatistics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        QueryCacheStatistics {
            cached_queries: self.len(),
            max_size: self.max_size,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::QueryCompiler;
    use crate::config::EngineConfig;
    use crate::planner::PlanNode;
    use crate::storage::{Column, Schema, StorageManager};
    use crate::types::TypeId;

    fn compiled(columns: Vec<u32>) -> Arc<CompiledQuery> {
        let storage = Arc::new(StorageManager::new(1, 8));
        let table = storage
            .create_table(
                "t",
                Schema::new(vec![Column::new("a", TypeId::Integer), Column::new("b", TypeId::Integer)]),
            )
            .unwrap();
        let compiler = QueryCompiler::new(EngineConfig::serial(), storage);
        let plan = PlanNode::SeqScan {
            table_oid: table.oid(),
            predicate: None,
            columns,
        };
        Arc::new(compiler.compile(&plan).unwrap())
    }

    fn key(plan: u64) -> CacheKey {
        CacheKey { plan, config: 0 }
    }

    #[test]
    fn test_lru_eviction() {
        let cache = QueryCache::new(2);
        let query = compiled(vec![0]);
        cache.insert(key(1), query.clone());
        cache.insert(key(2), query.clone());
        assert!(cache.get(key(1)).is_some());
        cache.insert(key(3), query);
        assert!(cache.contains(key(1)));
        assert!(!cache.contains(key(2)));
        assert!(cache.contains(key(3)));
        assert_eq!(cache.statistics().evictions, 1);
    }

    #[test]
    fn test_hit_rate() {
        let cache = QueryCache::new(4);
        assert!(cache.get(key(7)).is_none());
        cache.insert(key(7), compiled(vec![1]));
        assert!(cache.get(key(7)).is_some());
        let stats = cache.statistics();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.statistics().hits, 1);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = QueryCache::new(0);
        cache.insert(key(1), compiled(vec![0]));
        assert!(cache.is_empty());
    }
}
