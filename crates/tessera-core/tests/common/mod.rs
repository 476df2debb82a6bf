//! Shared fixture for the integration tests: an in-memory catalog, a
//! timestamp-ordering transaction manager and a query compiler over both.

#![allow(dead_code)]

use once_cell::sync::Lazy;
use std::sync::Arc;
use tessera_core::concurrency::{
    IsolationLevel, ResultType, TimestampOrderingTransactionManager, TransactionContext,
    TransactionManager,
};
use tessera_core::planner::InsertSource;
use tessera_core::runtime::{BufferingConsumer, ExecutorThreadPool};
use tessera_core::storage::{Column, Oid, Schema, StorageManager};
use tessera_core::{EngineConfig, ExecutorContext, Expr, PlanNode, QueryCompiler, Result, TypeId, Value};

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
});

/// Install the test subscriber once per test binary
pub fn init_test_tracing() {
    Lazy::force(&TRACING);
}

/// Catalog, transaction manager and compiler sharing one configuration
pub struct TestDb {
    pub config: EngineConfig,
    pub storage: Arc<StorageManager>,
    pub txn_manager: Arc<dyn TransactionManager>,
    pub compiler: QueryCompiler,
    pub pool: Option<Arc<ExecutorThreadPool>>,
}

impl TestDb {
    pub fn new(config: EngineConfig) -> Self {
        init_test_tracing();
        let storage = Arc::new(StorageManager::new(1, config.tuples_per_tile_group));
        let txn_manager: Arc<dyn TransactionManager> =
            Arc::new(TimestampOrderingTransactionManager::new(storage.clone()));
        let compiler = QueryCompiler::new(config.clone(), storage.clone());
        Self {
            config,
            storage,
            txn_manager,
            compiler,
            pool: None,
        }
    }

    /// Single-threaded database
    pub fn serial() -> Self {
        Self::new(EngineConfig::serial())
    }

    /// Attach a worker pool to every execution context
    pub fn with_pool(mut self, pool: Arc<ExecutorThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn create_table(&self, name: &str, columns: &[(&str, TypeId)]) -> Result<Oid> {
        let schema = Schema::new(columns.iter().map(|&(n, t)| Column::new(n, t)).collect());
        Ok(self.storage.create_table(name, schema)?.oid())
    }

    pub fn begin(&self) -> Arc<TransactionContext> {
        self.txn_manager.begin_transaction(IsolationLevel::Serializable)
    }

    pub fn begin_with(&self, isolation: IsolationLevel) -> Arc<TransactionContext> {
        self.txn_manager.begin_transaction(isolation)
    }

    pub fn commit(&self, txn: &TransactionContext) -> Result<ResultType> {
        self.txn_manager.commit_transaction(txn)
    }

    pub fn context(&self, txn: &Arc<TransactionContext>, params: Vec<Value>) -> Arc<ExecutorContext> {
        let mut ctx = ExecutorContext::new(txn.clone(), self.txn_manager.clone(), self.storage.clone())
            .with_config(self.config.clone())
            .with_params(params);
        if let Some(pool) = &self.pool {
            ctx = ctx.with_thread_pool(pool.clone());
        }
        Arc::new(ctx)
    }

    /// Compile (through the cache) and run `plan` inside `txn`
    pub fn run_in(&self, txn: &Arc<TransactionContext>, plan: &PlanNode) -> Result<(u64, Vec<Vec<Value>>)> {
        self.run_with_params(txn, plan, Vec::new())
    }

    pub fn run_with_params(
        &self,
        txn: &Arc<TransactionContext>,
        plan: &PlanNode,
        params: Vec<Value>,
    ) -> Result<(u64, Vec<Vec<Value>>)> {
        let query = self.compiler.compile_or_get(plan)?;
        let consumer = Arc::new(BufferingConsumer::new());
        let processed = query.execute(self.context(txn, params), consumer.clone())?;
        Ok((processed, consumer.take_rows()))
    }

    /// Run `plan` in its own committed transaction
    pub fn run(&self, plan: &PlanNode) -> Result<(u64, Vec<Vec<Value>>)> {
        let txn = self.begin();
        let result = self.run_in(&txn, plan)?;
        assert_eq!(self.commit(&txn)?, ResultType::Success);
        Ok(result)
    }

    /// Insert literal rows in a committed transaction
    pub fn insert(&self, table_oid: Oid, rows: Vec<Vec<Value>>) -> Result<u64> {
        let plan = PlanNode::Insert {
            table_oid,
            source: InsertSource::Values(
                rows.into_iter()
                    .map(|row| row.into_iter().map(Expr::lit).collect())
                    .collect(),
            ),
        };
        Ok(self.run(&plan)?.0)
    }

    /// Every visible row of a table, sorted
    pub fn scan_sorted(&self, table_oid: Oid) -> Result<Vec<Vec<Value>>> {
        let width = self.storage.table(table_oid)?.schema().column_count() as u32;
        let (_, rows) = self.run(&seq_scan(table_oid, (0..width).collect(), None))?;
        Ok(sorted(rows))
    }
}

pub fn seq_scan(table_oid: Oid, columns: Vec<u32>, predicate: Option<Expr>) -> PlanNode {
    PlanNode::SeqScan {
        table_oid,
        predicate,
        columns,
    }
}

pub fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.sort_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

pub fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().map(|&v| Value::integer(v)).collect()
}

/// `(id, name, score)` rows for ids `1..=n`
pub fn people(n: i32) -> Vec<Vec<Value>> {
    (1..=n)
        .map(|i| vec![Value::integer(i), Value::varchar(format!("p{i}")), Value::integer(i * 10)])
        .collect()
}

pub const PEOPLE: &[(&str, TypeId)] = &[
    ("id", TypeId::Integer),
    ("name", TypeId::Varchar),
    ("score", TypeId::Integer),
];
