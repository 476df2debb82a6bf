//! Operator translators
//!
//! One translator per plan operator, arranged in the same tree as the plan.
//! Code generation follows the produce/consume model: the root asks its
//! child to *produce* rows, leaves emit the loops that generate them, and
//! every row flows back up through the *consume* callbacks of the operators
//! above, each of which appends its own per-row logic in place. A whole
//! pipeline therefore ends up inside one loop nest of one function.
//!
//! Translators reserve their runtime state when they are built, set it up
//! in the query's `init` function and release it in `tear_down`.

mod aggregation;
mod delete;
pub mod expression;
mod hash_join;
mod index_scan;
mod insert;
mod limit;
mod order_by;
mod projection;
mod table_scan;
mod update;

pub use aggregation::AggregationTranslator;
pub use delete::DeleteTranslator;
pub use hash_join::HashJoinTranslator;
pub use index_scan::IndexScanTranslator;
pub use insert::InsertTranslator;
pub use limit::LimitTranslator;
pub use order_by::OrderByTranslator;
pub use projection::ProjectionTranslator;
pub use table_scan::TableScanTranslator;
pub use update::UpdateTranslator;

use super::builder::FunctionBuilder;
use super::compilation_context::CompilationContext;
use super::ir::Reg;
use crate::error::{Error, Result};
use crate::planner::PlanNode;
use crate::storage::Oid;
use crate::types::TypeId;
use std::fmt;

/// Physical position of the version a row was read from
#[derive(Debug, Clone, Copy)]
pub struct TupleLocation {
    /// Tile group id (`u32`)
    pub tile_group_id: Reg,
    /// Offset within the tile group (`u32`)
    pub offset: Reg,
}

/// One row flowing up a pipeline
#[derive(Debug, Clone)]
pub struct Row {
    /// One register per output column
    pub columns: Vec<Reg>,
    /// Where the row lives, for rows read straight from a table
    pub location: Option<TupleLocation>,
}

impl Row {
    /// Row of computed values
    pub fn values(columns: Vec<Reg>) -> Self {
        Self {
            columns,
            location: None,
        }
    }
}

/// Per-row callback of the operator above
pub type Consume<'a> = dyn FnMut(&mut CompilationContext, &mut FunctionBuilder, &Row) -> Result<()> + 'a;

/// Code generator for one plan operator
pub trait OperatorTranslator: fmt::Debug {
    /// Operator name
    fn name(&self) -> &'static str;

    /// Column types of the rows handed to `consume`
    fn output_types(&self) -> &[TypeId];

    /// Emit state setup into the `init` function, children first
    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()>;

    /// Emit the code producing this operator's rows, calling `consume` to
    /// emit the per-row code of the operator above
    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, consume: &mut Consume<'_>) -> Result<()>;

    /// Emit state cleanup into the `tear_down` function
    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()>;
}

/// Whether scans below `plan` may fan out over the thread pool
///
/// Only read-only operators whose consume logic tolerates rows arriving
/// from several workers qualify.
pub fn parallel_safe(plan: &PlanNode) -> bool {
    match plan {
        PlanNode::SeqScan { .. } => true,
        PlanNode::Projection { child, .. }
        | PlanNode::Aggregate { child, .. }
        | PlanNode::OrderBy { child, .. } => parallel_safe(child),
        _ => false,
    }
}

/// Delete and update locate their rows through a scan of the same table
fn check_scans_table(plan: &PlanNode, child: &PlanNode, table_oid: Oid) -> Result<()> {
    match child {
        PlanNode::SeqScan { table_oid: scanned, .. } | PlanNode::IndexScan { table_oid: scanned, .. }
            if *scanned == table_oid =>
        {
            Ok(())
        }
        other => Err(Error::invalid_input(format!(
            "{} on table {table_oid} needs a scan of that table as input, got {}",
            plan.name(),
            other.name()
        ))),
    }
}

/// Translator tree for `plan`; `parallel` lets sequential scans of this
/// pipeline fan out
pub fn build(plan: &PlanNode, cx: &mut CompilationContext, parallel: bool) -> Result<Box<dyn OperatorTranslator>> {
    let translator: Box<dyn OperatorTranslator> = match plan {
        PlanNode::SeqScan {
            table_oid,
            predicate,
            columns,
        } => Box::new(TableScanTranslator::new(
            cx,
            *table_oid,
            predicate.clone(),
            columns.clone(),
            parallel,
        )?),
        PlanNode::IndexScan {
            table_oid,
            index_offset,
            lookup,
            predicate,
            columns,
        } => Box::new(IndexScanTranslator::new(
            cx,
            *table_oid,
            *index_offset,
            lookup.clone(),
            predicate.clone(),
            columns.clone(),
        )?),
        PlanNode::Projection { child, targets } => {
            let child = build(child, cx, parallel)?;
            Box::new(ProjectionTranslator::new(child, targets.clone())?)
        }
        PlanNode::Insert { table_oid, source } => Box::new(InsertTranslator::new(cx, *table_oid, source)?),
        PlanNode::Delete { table_oid, child } => {
            check_scans_table(plan, child, *table_oid)?;
            let child = build(child, cx, false)?;
            Box::new(DeleteTranslator::new(cx, *table_oid, child)?)
        }
        PlanNode::Update {
            table_oid,
            child,
            targets,
        } => {
            check_scans_table(plan, child, *table_oid)?;
            let child = build(child, cx, false)?;
            Box::new(UpdateTranslator::new(cx, *table_oid, child, targets.clone())?)
        }
        PlanNode::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            predicate,
        } => {
            let left = build(left, cx, false)?;
            let right = build(right, cx, false)?;
            Box::new(HashJoinTranslator::new(
                cx,
                left,
                right,
                left_keys.clone(),
                right_keys.clone(),
                predicate.clone(),
            )?)
        }
        PlanNode::Aggregate {
            child,
            group_by,
            aggregates,
        } => {
            let child = build(child, cx, parallel)?;
            Box::new(AggregationTranslator::new(cx, child, group_by.clone(), aggregates.clone())?)
        }
        PlanNode::OrderBy { child, keys } => {
            let child = build(child, cx, parallel)?;
            Box::new(OrderByTranslator::new(cx, child, keys.clone())?)
        }
        PlanNode::Limit {
            child,
            limit,
            offset,
        } => {
            let child = build(child, cx, false)?;
            Box::new(LimitTranslator::new(cx, child, *limit, *offset)?)
        }
    };
    tracing::debug!(operator = translator.name(), "prepared translator");
    Ok(translator)
}
