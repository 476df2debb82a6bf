//! Execution context handed to compiled queries

use crate::concurrency::{TransactionContext, TransactionManager};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::runtime::ExecutorThreadPool;
use crate::storage::StorageManager;
use crate::types::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Everything a compiled query reaches outside its runtime state
///
/// One context is built per execution. A compiled query binds it into its
/// runtime state, where generated code picks it up and hands it to runtime
/// helpers (deleters, updaters, scans) during their `init`.
pub struct ExecutorContext {
    txn: Arc<TransactionContext>,
    txn_manager: Arc<dyn TransactionManager>,
    storage: Arc<StorageManager>,
    thread_pool: Option<Arc<ExecutorThreadPool>>,
    config: EngineConfig,
    params: Vec<Value>,
    num_processed: AtomicU64,
}

crate::proxy_opaque!(ExecutorContext => "ExecutorContext");

impl ExecutorContext {
    /// Context for running within `txn`
    pub fn new(
        txn: Arc<TransactionContext>,
        txn_manager: Arc<dyn TransactionManager>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self {
            txn,
            txn_manager,
            storage,
            thread_pool: None,
            config: EngineConfig::default(),
            params: Vec::new(),
            num_processed: AtomicU64::new(0),
        }
    }

    /// Attach a worker pool for parallel pipelines
    pub fn with_thread_pool(mut self, pool: Arc<ExecutorThreadPool>) -> Self {
        self.thread_pool = Some(pool);
        self
    }

    /// Use `config` for runtime tunables
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind query parameters (`$1` is index 0)
    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    /// Running transaction
    pub fn txn(&self) -> &Arc<TransactionContext> {
        &self.txn
    }

    /// Transaction manager
    pub fn txn_manager(&self) -> &dyn TransactionManager {
        self.txn_manager.as_ref()
    }

    /// Storage collaborator
    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// Worker pool, if one is attached
    pub fn thread_pool(&self) -> Option<&Arc<ExecutorThreadPool>> {
        self.thread_pool.as_ref()
    }

    /// Whether parallel pipelines can fan out
    pub fn has_thread_pool(&self) -> bool {
        self.thread_pool.as_ref().is_some_and(|pool| !pool.is_shut_down())
    }

    /// Worker pool, failing when none is attached
    pub fn require_thread_pool(&self) -> Result<Arc<ExecutorThreadPool>> {
        self.thread_pool
            .clone()
            .ok_or_else(|| Error::executor("no thread pool attached to the executor context"))
    }

    /// Runtime tunables
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bound parameter
    pub fn param(&self, index: u32) -> Result<Value> {
        self.params
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::invalid_input(format!("parameter ${} is not bound", index + 1)))
    }

    /// Tuples processed so far: rows written by DML, rows emitted otherwise
    pub fn num_processed(&self) -> u64 {
        self.num_processed.load(Ordering::Acquire)
    }

    /// Count one processed tuple
    pub fn increment_processed(&self) {
        self.num_processed.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("txn_id", &self.txn.txn_id())
            .field("params", &self.params.len())
            .field("num_processed", &self.num_processed())
            .finish()
    }
}
