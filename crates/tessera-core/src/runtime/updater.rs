//! Per-tuple update helper called from compiled update pipelines

use crate::concurrency::ResultType;
use crate::error::{Error, Result};
use crate::executor::ExecutorContext;
use crate::proxy::Tuple;
use crate::storage::{DataTable, ItemPointer, TileGroup};
use crate::types::Value;
use std::sync::Arc;
use tracing::{error, trace};

/// Updates tuples of one table on behalf of the running transaction
///
/// `target_columns` are overwritten with the values handed to
/// [`Updater::update`]; `direct_map` lists `(destination, source)` column
/// pairs copied unchanged from the old version into a new one.
#[derive(Debug, Default)]
pub struct Updater {
    table: Option<Arc<DataTable>>,
    ctx: Option<Arc<ExecutorContext>>,
    target_columns: Vec<u32>,
    direct_map: Vec<(u32, u32)>,
}

crate::proxy_opaque!(Updater => "Updater");

impl Updater {
    /// Bind table, context, target columns and the flattened direct map
    /// (`[dst0, src0, dst1, src1, ...]`)
    pub fn init(
        &mut self,
        table: Arc<DataTable>,
        ctx: Arc<ExecutorContext>,
        target_columns: Vec<u32>,
        direct_map: Vec<u32>,
    ) -> Result<()> {
        if direct_map.len() % 2 != 0 {
            return Err(Error::codegen("direct map must hold column pairs"));
        }
        let columns = table.schema().column_count() as u32;
        let out_of_range = target_columns
            .iter()
            .chain(direct_map.iter())
            .any(|&c| c >= columns);
        if out_of_range {
            return Err(Error::codegen(format!(
                "update column out of range for table '{}'",
                table.name()
            )));
        }
        self.direct_map = direct_map.chunks(2).map(|p| (p[0], p[1])).collect();
        self.target_columns = target_columns;
        self.table = Some(table);
        self.ctx = Some(ctx);
        Ok(())
    }

    fn bound(&self) -> Result<(Arc<DataTable>, Arc<ExecutorContext>)> {
        match (&self.table, &self.ctx) {
            (Some(table), Some(ctx)) => Ok((table.clone(), ctx.clone())),
            _ => Err(Error::codegen("updater used before init")),
        }
    }

    fn check_targets(&self, values: &Tuple) -> Result<()> {
        if values.values().len() != self.target_columns.len() {
            return Err(Error::codegen(format!(
                "update expects {} target values, got {}",
                self.target_columns.len(),
                values.values().len()
            )));
        }
        Ok(())
    }

    /// Build the new version from the old one
    fn new_row(&self, table: &DataTable, old: &[Value], values: &Tuple) -> Result<Vec<Value>> {
        let mut row = table.schema().null_row();
        for &(dst, src) in &self.direct_map {
            row[dst as usize] = old[src as usize].clone();
        }
        for (&column, value) in self.target_columns.iter().zip(values.values()) {
            row[column as usize] = value.clone();
        }
        table.schema().conform(row)
    }

    /// Take ownership of a version unless already held. Returns whether the
    /// caller must yield it on a later failure, or `None` after flagging
    /// the transaction.
    fn own(&self, ctx: &ExecutorContext, tile_group: &TileGroup, offset: u32) -> Option<bool> {
        let txn = ctx.txn();
        let txn_manager = ctx.txn_manager();
        let header = tile_group.header();
        if txn_manager.is_owner(txn, header, offset) {
            return Some(false);
        }
        if !txn_manager.is_ownable(txn, header, offset)
            || !txn_manager.acquire_ownership(txn, header, offset)
        {
            trace!(tile_group = tile_group.id(), offset, "update target not ownable");
            txn_manager.set_transaction_result(txn, ResultType::Failure);
            return None;
        }
        Some(true)
    }

    fn fail(&self, ctx: &ExecutorContext, tile_group: &TileGroup, offset: u32, yield_ownership: bool) {
        let txn = ctx.txn();
        if yield_ownership {
            ctx.txn_manager()
                .yield_ownership(txn, tile_group.header(), offset);
        }
        ctx.txn_manager()
            .set_transaction_result(txn, ResultType::Failure);
    }

    /// Overwrite the target columns of the version at
    /// `(tile_group_id, tuple_offset)` with `values`
    pub fn update(&mut self, tile_group_id: u32, tuple_offset: u32, values: Tuple) -> Result<()> {
        let (table, ctx) = self.bound()?;
        self.check_targets(&values)?;
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
        if !is_owner && is_written {
            error!(%old, txn_id = txn.txn_id(), "version written by a transaction that does not own it");
            return Err(Error::internal(format!(
                "version {old} is written but not owned by transaction {}",
                txn.txn_id()
            )));
        }

        if is_owner && is_written {
            let mut row = tile_group.tuple(tuple_offset)?;
            for (&column, value) in self.target_columns.iter().zip(values.values()) {
                let slot = row
                    .get_mut(column as usize)
                    .ok_or_else(|| Error::internal(format!("no column {column}")))?;
                *slot = value.clone();
            }
            let row = table.schema().conform(row)?;
            let installed = table.install_version(
                &row,
                &self.target_columns,
                header.indirection(tuple_offset).as_ref(),
                txn.txn_id(),
            )?;
            if !installed {
                trace!(%old, "in-place update violates a unique index");
                txn_manager.set_transaction_result(txn, ResultType::Failure);
                return Ok(());
            }
            for &column in &self.target_columns {
                tile_group.set_value(tuple_offset, column, row[column as usize].clone())?;
            }
            txn_manager.perform_update_in_place(txn, old)?;
            ctx.increment_processed();
            return Ok(());
        }

        let Some(acquired) = self.own(&ctx, &tile_group, tuple_offset) else {
            return Ok(());
        };
        let Some(new) = table.acquire_version()? else {
            self.fail(&ctx, &tile_group, tuple_offset, acquired);
            return Ok(());
        };
        let row = self.new_row(&table, &tile_group.tuple(tuple_offset)?, &values)?;
        table.tile_group_by_id(new.block)?.set_tuple(new.offset, row.clone())?;
        let indirection = header.indirection(tuple_offset);
        let installed = table.install_version(
            &row,
            &self.target_columns,
            indirection.as_ref(),
            txn.txn_id(),
        )?;
        if !installed {
            trace!(%old, "new version violates a unique index");
            self.fail(&ctx, &tile_group, tuple_offset, acquired);
            return Ok(());
        }
        txn_manager.perform_update(txn, old, new)?;
        ctx.increment_processed();
        Ok(())
    }

    /// Update that changes the primary key: delete the old tuple and insert
    /// a new one carrying the updated key
    pub fn update_pk(&mut self, tile_group_id: u32, tuple_offset: u32, values: Tuple) -> Result<()> {
        let (table, ctx) = self.bound()?;
        self.check_targets(&values)?;
        let txn = ctx.txn();
        if txn.has_failed() {
            return Ok(());
        }
        let txn_manager = ctx.txn_manager();
        let tile_group = table.tile_group_by_id(tile_group_id)?;
        let header = tile_group.header();
        let old = ItemPointer::new(tile_group_id, tuple_offset);
        let row = self.new_row(&table, &tile_group.tuple(tuple_offset)?, &values)?;

        let is_owner = txn_manager.is_owner(txn, header, tuple_offset);
        let is_written = txn_manager.is_written(txn, header, tuple_offset);
        if is_owner && is_written {
            txn_manager.perform_delete_in_place(txn, old)?;
        } else {
            let Some(acquired) = self.own(&ctx, &tile_group, tuple_offset) else {
                return Ok(());
            };
            let Some(marker) = table.insert_empty_version()? else {
                self.fail(&ctx, &tile_group, tuple_offset, acquired);
                return Ok(());
            };
            txn_manager.perform_delete(txn, old, marker)?;
        }

        let Some((location, indirection)) = table.insert_tuple(row, txn.txn_id())? else {
            trace!(%old, "re-insert of updated key failed");
            // the delete stays in the write set and is undone by the abort
            txn_manager.set_transaction_result(txn, ResultType::Failure);
            return Ok(());
        };
        txn_manager.perform_insert(txn, location, indirection)?;
        ctx.increment_processed();
        Ok(())
    }

    /// Release the bound table and context
    pub fn tear_down(&mut self) {
        self.table = None;
        self.ctx = None;
    }
}
