//! Per-tuple insert helper called from compiled insert pipelines

use crate::concurrency::ResultType;
use crate::error::{Error, Result};
use crate::executor::ExecutorContext;
use crate::proxy::Tuple;
use crate::storage::DataTable;
use std::sync::Arc;
use tracing::trace;

/// Inserts tuples into one table on behalf of the running transaction
#[derive(Debug, Default)]
pub struct Inserter {
    table: Option<Arc<DataTable>>,
    ctx: Option<Arc<ExecutorContext>>,
}

crate::proxy_opaque!(Inserter => "Inserter");

impl Inserter {
    /// Bind the table and execution context
    pub fn init(&mut self, table: Arc<DataTable>, ctx: Arc<ExecutorContext>) {
        self.table = Some(table);
        self.ctx = Some(ctx);
    }

    /// Store `row` as a new tuple owned by the running transaction
    ///
    /// A full table or a duplicate unique key flags the transaction as
    /// failed.
    pub fn insert(&mut self, row: Tuple) -> Result<()> {
        let (Some(table), Some(ctx)) = (&self.table, &self.ctx) else {
            return Err(Error::codegen("inserter used before init"));
        };
        let txn = ctx.txn();
        if txn.has_failed() {
            return Ok(());
        }
        match table.insert_tuple(row.to_vec(), txn.txn_id())? {
            Some((location, indirection)) => {
                ctx.txn_manager().perform_insert(txn, location, indirection)?;
                ctx.increment_processed();
            }
            None => {
                trace!(table = table.name(), "insert rejected by storage");
                ctx.txn_manager()
                    .set_transaction_result(txn, ResultType::Failure);
            }
        }
        Ok(())
    }

    /// Release the bound table and context
    pub fn tear_down(&mut self) {
        self.table = None;
        self.ctx = None;
    }
}
