//! Per-tuple delete helper called from compiled delete pipelines

use crate::concurrency::ResultType;
use crate::error::{Error, Result};
use crate::executor::ExecutorContext;
use crate::storage::{DataTable, ItemPointer};
use std::sync::Arc;
use tracing::trace;

/// Deletes tuples of one table on behalf of the running transaction
#[derive(Debug, Default)]
pub struct Deleter {
    table: Option<Arc<DataTable>>,
    ctx: Option<Arc<ExecutorContext>>,
}

crate::proxy_opaque!(Deleter => "Deleter");

impl Deleter {
    /// Bind the table and execution context
    pub fn init(&mut self, table: Arc<DataTable>, ctx: Arc<ExecutorContext>) {
        self.table = Some(table);
        self.ctx = Some(ctx);
    }

    fn bound(&self) -> Result<(&Arc<DataTable>, &Arc<ExecutorContext>)> {
        match (&self.table, &self.ctx) {
            (Some(table), Some(ctx)) => Ok((table, ctx)),
            _ => Err(Error::codegen("deleter used before init")),
        }
    }

    /// Delete the version at `(tile_group_id, tuple_offset)`
    ///
    /// A version this transaction wrote is deleted in place. Otherwise the
    /// transaction takes ownership and links an empty delete-marker version
    /// in front of it. Any protocol failure flags the transaction and leaves
    /// the processed count untouched; once flagged, later calls do nothing.
    pub fn delete(&mut self, tile_group_id: u32, tuple_offset: u32) -> Result<()> {
        let (table, ctx) = self.bound()?;
        let txn = ctx.txn();
        if txn.has_failed() {
            return Ok(());
        }
        let txn_manager = ctx.txn_manager();
        let tile_group = table.tile_group_by_id(tile_group_id)?;
        let header = tile_group.header();
        let old = ItemPointer::new(tile_group_id, tuple_offset);

        let is_owner = txn_manager.is_owner(txn, header, tuple_offset);
        let is_written = txn_manager.is_written(txn, header, tuple_offset);
        if is_owner && is_written {
            txn_manager.perform_delete_in_place(txn, old)?;
            ctx.increment_processed();
            return Ok(());
        }

        let is_ownable = is_owner || txn_manager.is_ownable(txn, header, tuple_offset);
        if !is_ownable {
            trace!(%old, "delete target is owned by another transaction");
            txn_manager.set_transaction_result(txn, ResultType::Failure);
            return Ok(());
        }
        if !is_owner && !txn_manager.acquire_ownership(txn, header, tuple_offset) {
            txn_manager.set_transaction_result(txn, ResultType::Failure);
            return Ok(());
        }

        let Some(new) = table.insert_empty_version()? else {
            trace!(%old, "no slot for delete marker");
            if !is_owner {
                txn_manager.yield_ownership(txn, header, tuple_offset);
            }
            txn_manager.set_transaction_result(txn, ResultType::Failure);
            return Ok(());
        };
        txn_manager.perform_delete(txn, old, new)?;
        ctx.increment_processed();
        Ok(())
    }

    /// Release the bound table and context
    pub fn tear_down(&mut self) {
        self.table = None;
        self.ctx = None;
    }
}
