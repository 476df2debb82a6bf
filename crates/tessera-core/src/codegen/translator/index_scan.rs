//! Index scan
//!
//! The lookup runs once through an [`IndexScanIterator`], which buffers the
//! visible versions grouped by tile group. Each group's offset range then
//! goes through the same vectorized visibility check as a sequential scan,
//! and only offsets present in the buffered result are emitted.

use super::expression::{check_predicate, compile, compile_filter};
use super::{Consume, OperatorTranslator, Row, TupleLocation};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::ir::{Inst, IntOp, Reg};
use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::planner::IndexLookup;
use crate::runtime::{IndexScanIterator, SelectionVector};
use crate::storage::Oid;
use crate::types::TypeId;
use std::collections::BTreeSet;

/// Translator for [`PlanNode::IndexScan`](crate::planner::PlanNode::IndexScan)
#[derive(Debug)]
pub struct IndexScanTranslator {
    table_oid: Oid,
    index_offset: u32,
    key_types: Vec<TypeId>,
    lookup: IndexLookup,
    column_count: u32,
    predicate: Option<Expr>,
    columns: Vec<u32>,
    output_types: Vec<TypeId>,
}

fn check_key(key: &[Expr], key_types: &[TypeId], index: &str) -> Result<()> {
    if key.is_empty() || key.len() > key_types.len() {
        return Err(Error::invalid_input(format!(
            "index '{index}' takes 1..={} key values, got {}",
            key_types.len(),
            key.len()
        )));
    }
    if let Some(expr) = key.iter().find(|e| !e.is_row_independent()) {
        return Err(Error::invalid_input(format!("index key {expr} depends on the scanned row")));
    }
    Ok(())
}

impl IndexScanTranslator {
    /// Validate the lookup against the index and reserve table access
    pub fn new(
        cx: &mut CompilationContext,
        table_oid: Oid,
        index_offset: u32,
        lookup: IndexLookup,
        predicate: Option<Expr>,
        columns: Vec<u32>,
    ) -> Result<Self> {
        let table = cx.table(table_oid)?;
        let index = table.index(index_offset)?;
        let table_types: Vec<TypeId> = table.schema().columns().iter().map(|c| c.type_id).collect();
        let key_types = index
            .key_columns()
            .iter()
            .map(|&c| table_types[c as usize])
            .collect::<Vec<_>>();
        match &lookup {
            IndexLookup::Full => {}
            IndexLookup::Point(key) => check_key(key, &key_types, index.name())?,
            IndexLookup::Range { low, high } => {
                for key in [low, high].into_iter().flatten() {
                    check_key(key, &key_types, index.name())?;
                }
            }
        }
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
        Ok(Self {
            table_oid,
            index_offset,
            key_types,
            lookup,
            column_count: table_types.len() as u32,
            predicate,
            columns,
            output_types,
        })
    }

    /// Key tuple cast to the index's key types; an empty tuple when absent
    fn key_tuple(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, key: Option<&[Expr]>) -> Result<Reg> {
        let mut regs = Vec::new();
        for (expr, &ty) in key.unwrap_or_default().iter().zip(&self.key_types) {
            let value = compile(cx, b, expr, &[])?;
            let dst = b.reg();
            b.emit(Inst::Cast { dst, src: value, to: ty });
            regs.push(dst);
        }
        Ok(b.make_tuple(&regs))
    }

    fn needed_columns(&self) -> BTreeSet<u32> {
        let mut needed: BTreeSet<u32> = self.columns.iter().copied().collect();
        if let Some(predicate) = &self.predicate {
            needed.extend(predicate.referenced_columns().into_iter().map(|(_, c)| c));
        }
        needed
    }
}

impl OperatorTranslator for IndexScanTranslator {
    fn name(&self) -> &'static str {
        "IndexScan"
    }

    fn output_types(&self) -> &[TypeId] {
        &self.output_types
    }

    fn initialize_state(&self, _cx: &mut CompilationContext, _b: &mut FunctionBuilder) -> Result<()> {
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, consume: &mut Consume<'_>) -> Result<()> {
        let iterator = cx.local::<IndexScanIterator>(b, "index_iterator");
        let iterator = b.local_addr(iterator);
        let selection = cx.local::<SelectionVector>(b, "selection");
        let selection = b.local_addr(selection);
        let vector_size = cx.config().vector_size.max(1);
        let capacity = b.const_u32(vector_size);
        let selection_init = cx.code().selection_init_fn();
        b.call_void(selection_init, &[selection, capacity]);

        let (point, low, high) = match &self.lookup {
            IndexLookup::Full => (None, None, None),
            IndexLookup::Point(key) => (Some(key.as_slice()), None, None),
            IndexLookup::Range { low, high } => (None, low.as_deref(), high.as_deref()),
        };
        let point = self.key_tuple(cx, b, point)?;
        let low = self.key_tuple(cx, b, low)?;
        let high = self.key_tuple(cx, b, high)?;
        let iter_init = cx.code().index_iter_init_fn();
        b.call_void(iter_init, &[iterator, point, low, high]);

        let table = cx.load_table(b, self.table_oid)?;
        let index_offset = b.const_u32(self.index_offset);
        let table_index = cx.code().table_index_fn();
        let index = b.call(table_index, &[table, index_offset]);
        let ctx = cx.load_ctx(b);
        let do_scan = cx.code().index_iter_scan_fn();
        b.call_void(do_scan, &[iterator, index, ctx]);

        let num_groups = cx.code().index_iter_groups_fn();
        let group_id = cx.code().index_iter_group_id_fn();
        let min_offset = cx.code().index_iter_min_fn();
        let max_offset = cx.code().index_iter_max_fn();
        let in_result = cx.code().index_iter_row_fn();
        let tile_group_by_id = cx.code().tile_group_by_id_fn();
        let filter = cx.code().selection_filter_fn();
        let selected = cx.code().selection_get_fn();
        let load_value = cx.code().tile_group_value_fn();
        let needed = self.needed_columns();

        let groups = b.call(num_groups, &[iterator]);
        let zero = b.const_u32(0);
        b.range_loop(zero, groups, 1, |b, group| {
            let tg_id = b.call(group_id, &[iterator, group]);
            let tile_group = b.call(tile_group_by_id, &[table, tg_id]);
            let first = b.call(min_offset, &[iterator, group]);
            let last = b.call(max_offset, &[iterator, group]);
            let one = b.const_u32(1);
            let end = b.int_op(IntOp::Add, last, one);
            b.range_loop(first, end, vector_size, |b, start| {
                let step = b.const_u32(vector_size);
                let next = b.int_op(IntOp::Add, start, step);
                let stop = b.int_op(IntOp::Min, next, end);
                let count = b.call(filter, &[selection, ctx, tile_group, start, stop]);
                let zero = b.const_u32(0);
                b.range_loop(zero, count, 1, |b, i| {
                    let tid = b.call(selected, &[selection, i]);
                    let position = b.call(in_result, &[iterator, tg_id, tid]);
                    let none = b.constant(0i64);
                    let hit = b.int_op(IntOp::Ge, position, none);
                    b.if_then(hit, |b| {
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
        })
    }

    fn tear_down_state(&self, _cx: &mut CompilationContext, _b: &mut FunctionBuilder) -> Result<()> {
        Ok(())
    }
}
