//! Sequential table scan
//!
//! Tile groups are scanned in batches of `vector_size` slots. Each batch
//! goes through the transaction's vectorized visibility check into a
//! selection vector; only the selected slots are materialized, and only the
//! columns the predicate or the output needs are loaded.
//!
//! With parallel scans enabled the tile-group range is split into tasks run
//! on the executor thread pool. The plan function submits them and blocks
//! on a [`CountDown`] latch that every task decreases when it finishes,
//! whether or not it failed. Executions without a pool take the serial
//! path compiled next to the parallel one.

use super::expression::{check_predicate, compile_filter};
use super::{Consume, OperatorTranslator, Row, TupleLocation};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::ir::{FieldAccess, IntOp, Reg};
use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::proxy::{NativeType, StateId};
use crate::runtime::{CountDown, SelectionVector, TaskInfo};
use crate::storage::Oid;
use crate::types::TypeId;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
struct ParallelSlots {
    bounds: StateId,
    latch: StateId,
}

/// Translator for [`PlanNode::SeqScan`](crate::planner::PlanNode::SeqScan)
#[derive(Debug)]
pub struct TableScanTranslator {
    table_oid: Oid,
    table_name: String,
    column_count: u32,
    predicate: Option<Expr>,
    columns: Vec<u32>,
    output_types: Vec<TypeId>,
    parallel: Option<ParallelSlots>,
}

impl TableScanTranslator {
    /// Validate the scan against the catalog and reserve its state
    pub fn new(
        cx: &mut CompilationContext,
        table_oid: Oid,
        predicate: Option<Expr>,
        columns: Vec<u32>,
        parallel: bool,
    ) -> Result<Self> {
        let table = cx.table(table_oid)?;
        let table_types: Vec<TypeId> = table.schema().columns().iter().map(|c| c.type_id).collect();
        let output_types = columns
            .iter()
            .map(|&c| {
                table_types.get(c as usize).copied().ok_or_else(|| {
                    Error::catalog(format!("table '{}' has no column {c}", table.name()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(predicate) = &predicate {
            check_predicate(predicate, &[&table_types])?;
        }
        cx.table_slot(table_oid)?;
        let parallel = parallel.then(|| {
            let list = NativeType::UInt32.pointer_to();
            ParallelSlots {
                bounds: cx.register_datum("scan_bounds", list),
                latch: cx.register_state::<CountDown>("scan_latch"),
            }
        });
        Ok(Self {
            table_oid,
            table_name: table.name().to_string(),
            column_count: table_types.len() as u32,
            predicate,
            columns,
            output_types,
            parallel,
        })
    }

    /// Table columns to materialize per selected slot
    fn needed_columns(&self) -> BTreeSet<u32> {
        let mut needed: BTreeSet<u32> = self.columns.iter().copied().collect();
        if let Some(predicate) = &self.predicate {
            needed.extend(predicate.referenced_columns().into_iter().map(|(_, c)| c));
        }
        needed
    }

    /// Scan tile groups `begin..end`, snapshotted in `bounds`
    fn scan_range(
        &self,
        cx: &mut CompilationContext,
        b: &mut FunctionBuilder,
        bounds: Reg,
        begin: Reg,
        end: Reg,
        consume: &mut Consume<'_>,
    ) -> Result<()> {
        let selection = cx.local::<SelectionVector>(b, "selection");
        let selection = b.local_addr(selection);
        let vector_size = cx.config().vector_size.max(1);
        let capacity = b.const_u32(vector_size);
        let init = cx.code().selection_init_fn();
        b.call_void(init, &[selection, capacity]);

        let table = cx.load_table(b, self.table_oid)?;
        let tile_group_at = cx.code().tile_group_at_fn();
        let tile_group_id = cx.code().tile_group_id_fn();
        let filter = cx.code().selection_filter_fn();
        let selected = cx.code().selection_get_fn();
        let load_value = cx.code().tile_group_value_fn();
        let needed = self.needed_columns();

        b.range_loop(begin, end, 1, |b, offset| {
            let tile_group = b.call(tile_group_at, &[table, offset]);
            let tg_id = b.call(tile_group_id, &[tile_group]);
            let slots = b.list_get(bounds, offset);
            let zero = b.const_u32(0);
            b.range_loop(zero, slots, vector_size, |b, start| {
                let step = b.const_u32(vector_size);
                let next = b.int_op(IntOp::Add, start, step);
                let stop = b.int_op(IntOp::Min, next, slots);
                let ctx = cx.load_ctx(b);
                let count = b.call(filter, &[selection, ctx, tile_group, start, stop]);
                let zero = b.const_u32(0);
                b.range_loop(zero, count, 1, |b, i| {
                    let tid = b.call(selected, &[selection, i]);
                    let unset = b.reg();
                    let mut table_row = vec![unset; self.column_count as usize];
                    for &column in &needed {
                        let column_reg = b.const_u32(column);
                        table_row[column as usize] = b.call(load_value, &[tile_group, tid, column_reg]);
                    }
                    let row = Row {
                        columns: self.columns.iter().map(|&c| table_row[c as usize]).collect(),
                        location: Some(TupleLocation {
                            tile_group_id: tg_id,
                            offset: tid,
                        }),
                    };
                    match &self.predicate {
                        Some(predicate) => {
                            let passes = compile_filter(cx, b, predicate, &[&table_row])?;
                            b.if_then(passes, |b| consume(cx, b, &row))
                        }
                        None => consume(cx, b, &row),
                    }
                })
            })
        })
    }

    fn produce_serial(
        &self,
        cx: &mut CompilationContext,
        b: &mut FunctionBuilder,
        consume: &mut Consume<'_>,
    ) -> Result<()> {
        let table = cx.load_table(b, self.table_oid)?;
        let scan_bounds = cx.code().scan_bounds_fn();
        let bounds = b.call(scan_bounds, &[table]);
        let begin = b.const_u32(0);
        let end = b.list_len(bounds);
        self.scan_range(cx, b, bounds, begin, end, consume)
    }

    fn produce_parallel(
        &self,
        cx: &mut CompilationContext,
        b: &mut FunctionBuilder,
        slots: ParallelSlots,
        consume: &mut Consume<'_>,
    ) -> Result<()> {
        let task_ref = cx.code().reserve();
        let task_name = cx.unique_name(&format!("scan_{}_task", self.table_name));
        let mut tb = FunctionBuilder::new(task_name, 1);
        let task = tb.param(0)?;
        let begin_field = FieldAccess::of::<TaskInfo>(cx.code().types(), "begin")?;
        let end_field = FieldAccess::of::<TaskInfo>(cx.code().types(), "end")?;
        let decrease = cx.code().count_down_decrease_fn();
        tb.guard(
            |tb| {
                let begin = tb.load_field(task, begin_field);
                let end = tb.load_field(task, end_field);
                let bounds = tb.load_state(slots.bounds);
                self.scan_range(cx, tb, bounds, begin, end, consume)
            },
            |tb| {
                let latch = tb.state_addr(slots.latch);
                tb.call_void(decrease, &[latch]);
                Ok(())
            },
        )?;
        cx.code().define(task_ref, tb.finish()?)?;

        let table = cx.load_table(b, self.table_oid)?;
        let scan_bounds = cx.code().scan_bounds_fn();
        let bounds = b.call(scan_bounds, &[table]);
        b.store_state(slots.bounds, bounds);
        let num_tile_groups = b.list_len(bounds);

        let ctx = cx.load_ctx(b);
        let thread_pool = cx.code().ctx_thread_pool_fn();
        let pool = b.call(thread_pool, &[ctx]);
        let per_task = u32::try_from(cx.config().tile_groups_per_task).unwrap_or(u32::MAX);
        let per_task = b.const_u32(per_task);
        let scan_tasks = cx.code().scan_tasks_fn();
        let tasks = b.call(scan_tasks, &[pool, num_tile_groups, per_task]);
        let num_tasks = b.list_len(tasks);

        let latch = b.state_addr(slots.latch);
        let latch_init = cx.code().count_down_init_fn();
        b.call_void(latch_init, &[latch, num_tasks]);
        let body = b.make_task(task_ref);
        let state = b.state_ptr();
        let submit = cx.code().submit_task_fn();
        b.for_each(tasks, |b, task| {
            b.call_void(submit, &[pool, state, task, body]);
            Ok(())
        })?;
        let wait = cx.code().count_down_wait_fn();
        b.call_void(wait, &[latch]);
        let raise = cx.code().raise_task_error_fn();
        b.call_void(raise, &[state]);
        tracing::debug!(table = %self.table_name, "emitted parallel scan");
        Ok(())
    }
}

impl OperatorTranslator for TableScanTranslator {
    fn name(&self) -> &'static str {
        "SeqScan"
    }

    fn output_types(&self) -> &[TypeId] {
        &self.output_types
    }

    fn initialize_state(&self, _cx: &mut CompilationContext, _b: &mut FunctionBuilder) -> Result<()> {
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, consume: &mut Consume<'_>) -> Result<()> {
        let Some(slots) = self.parallel else {
            return self.produce_serial(cx, b, consume);
        };
        let ctx = cx.load_ctx(b);
        let has_pool = cx.code().ctx_has_thread_pool_fn();
        let has_pool = b.call(has_pool, &[ctx]);
        b.if_else_with(
            has_pool,
            &mut (cx, consume),
            |b, (cx, consume)| self.produce_parallel(cx, b, slots, consume),
            |b, (cx, consume)| self.produce_serial(cx, b, consume),
        )
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        if let Some(slots) = self.parallel {
            let latch = b.state_addr(slots.latch);
            let destroy = cx.code().count_down_destroy_fn();
            b.call_void(destroy, &[latch]);
        }
        Ok(())
    }
}
