//! Engine configuration
//!
//! Tunables for compilation and execution of queries. Loading is a plain
//! library call; there is no CLI or environment layer at this level.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration shared by the compiler and the runtime support objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads in the executor pool (None = hardware concurrency)
    pub worker_threads: Option<usize>,

    /// Allow read-only scan pipelines to fan out across the thread pool
    pub parallel_scan: bool,

    /// Tile groups handed to each parallel scan task
    pub tile_groups_per_task: usize,

    /// Batch width of the vectorized visibility check
    pub vector_size: u32,

    /// Initial bucket count for hash tables (rounded up to a power of two)
    pub hash_table_buckets: u64,

    /// Build a bloom filter on the build side of hash joins
    pub bloom_filter_enabled: bool,

    /// Bloom filter bits allocated per estimated build-side key
    pub bloom_filter_bits_per_key: u64,

    /// Upper bound on the serialized size of a single hash table tuple
    pub max_tuple_bytes: usize,

    /// Tuple slots per tile group in the in-memory storage layer
    pub tuples_per_tile_group: u32,

    /// Compiled queries kept in the query cache
    pub query_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            parallel_scan: true,
            tile_groups_per_task: 1,
            vector_size: 1024,
            hash_table_buckets: 256,
            bloom_filter_enabled: true,
            bloom_filter_bits_per_key: 10,
            max_tuple_bytes: 64 * 1024,
            tuples_per_tile_group: 1000,
            query_cache_capacity: 128,
        }
    }
}

impl EngineConfig {
    /// Configuration for single-threaded execution
    pub fn serial() -> Self {
        Self {
            worker_threads: Some(1),
            parallel_scan: false,
            ..Default::default()
        }
    }

    /// Set the worker thread count
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Enable or disable parallel scans
    pub fn with_parallel_scan(mut self, enabled: bool) -> Self {
        self.parallel_scan = enabled;
        self
    }

    /// Set the vectorized read batch width
    pub fn with_vector_size(mut self, vector_size: u32) -> Self {
        self.vector_size = vector_size;
        self
    }

    /// Set the tile group capacity of newly created tables
    pub fn with_tuples_per_tile_group(mut self, tuples: u32) -> Self {
        self.tuples_per_tile_group = tuples;
        self
    }

    /// Enable or disable the hash join bloom filter
    pub fn with_bloom_filter(mut self, enabled: bool) -> Self {
        self.bloom_filter_enabled = enabled;
        self
    }

    /// Resolved number of worker threads
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == Some(0) {
            return Err(Error::config("worker_threads must be at least 1"));
        }
        if self.vector_size == 0 {
            return Err(Error::config("vector_size must be positive"));
        }
        if self.tile_groups_per_task == 0 {
            return Err(Error::config("tile_groups_per_task must be positive"));
        }
        if self.tuples_per_tile_group == 0 {
            return Err(Error::config("tuples_per_tile_group must be positive"));
        }
        if self.hash_table_buckets == 0 {
            return Err(Error::config("hash_table_buckets must be positive"));
        }
        if self.max_tuple_bytes < 16 {
            return Err(Error::config("max_tuple_bytes is too small"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.effective_worker_threads() >= 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"vector_size": 64, "parallel_scan": false}"#)
            .unwrap();
        assert_eq!(config.vector_size, 64);
        assert!(!config.parallel_scan);
        assert_eq!(config.hash_table_buckets, 256);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(EngineConfig::from_json(r#"{"vector_size": 0}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::serial()
            .with_vector_size(8)
            .with_tuples_per_tile_group(4);
        assert_eq!(config.effective_worker_threads(), 1);
        assert_eq!(config.vector_size, 8);
        assert_eq!(config.tuples_per_tile_group, 4);
    }
}
