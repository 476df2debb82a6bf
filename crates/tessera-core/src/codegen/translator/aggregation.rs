//! Hash and global aggregation
//!
//! Both forms are pipeline breakers: the child pipeline folds every row
//! into runtime accumulators, and a second loop emits the results once the
//! child is exhausted. Grouped aggregation keeps one [`CCHashTable`] entry
//! per group; without group keys a [`GlobalAggregator`] holds the single
//! accumulator row and still yields one row for empty input.

use super::expression::{compile, compile_all};
use super::{Consume, OperatorTranslator, Row};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::ir::Reg;
use crate::error::Result;
use crate::expression::Expr;
use crate::planner::AggregateTerm;
use crate::proxy::StateId;
use crate::runtime::{CCHashTable, GlobalAggregator};
use crate::types::{TypeId, Value};

#[derive(Debug, Clone, Copy)]
enum Accumulator {
    Global(StateId),
    Grouped(StateId),
}

/// Translator for [`PlanNode::Aggregate`](crate::planner::PlanNode::Aggregate)
#[derive(Debug)]
pub struct AggregationTranslator {
    child: Box<dyn OperatorTranslator>,
    group_by: Vec<Expr>,
    aggregates: Vec<AggregateTerm>,
    kinds: Vec<u32>,
    input_tags: Vec<u32>,
    output_types: Vec<TypeId>,
    accumulator: Accumulator,
}

impl AggregationTranslator {
    /// Resolve output types and reserve the accumulator
    pub fn new(
        cx: &mut CompilationContext,
        child: Box<dyn OperatorTranslator>,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateTerm>,
    ) -> Result<Self> {
        let input = child.output_types();
        let mut output_types = group_by
            .iter()
            .map(|g| g.return_type(&[input]))
            .collect::<Result<Vec<_>>>()?;
        let mut input_tags = Vec::with_capacity(aggregates.len());
        for term in &aggregates {
            let input_type = term.input_type(input)?;
            output_types.push(term.kind.output_type(input_type)?);
            input_tags.push(u32::from(input_type.tag()));
        }
        let kinds = aggregates.iter().map(|t| t.kind.code()).collect();
        let accumulator = if group_by.is_empty() {
            Accumulator::Global(cx.register_state::<GlobalAggregator>("aggregator"))
        } else {
            Accumulator::Grouped(cx.register_state::<CCHashTable>("group_hash_table"))
        };
        Ok(Self {
            child,
            group_by,
            aggregates,
            kinds,
            input_tags,
            output_types,
            accumulator,
        })
    }

    /// Aggregate inputs of one child row; `COUNT(*)` counts a constant
    fn inputs(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, row: &Row) -> Result<Reg> {
        let mut regs = Vec::with_capacity(self.aggregates.len());
        for term in &self.aggregates {
            let reg = match &term.input {
                Some(expr) => compile(cx, b, expr, &[&row.columns])?,
                None => b.value(Value::Boolean(true)),
            };
            regs.push(reg);
        }
        Ok(b.make_tuple(&regs))
    }
}

impl OperatorTranslator for AggregationTranslator {
    fn name(&self) -> &'static str {
        "Aggregate"
    }

    fn output_types(&self) -> &[TypeId] {
        &self.output_types
    }

    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.child.initialize_state(cx, b)?;
        match self.accumulator {
            Accumulator::Global(slot) => {
                let aggregator = b.state_addr(slot);
                let kinds = b.const_u32_list(&self.kinds);
                let tags = b.const_u32_list(&self.input_tags);
                let init = cx.code().aggregator_init_fn();
                b.call_void(init, &[aggregator, kinds, tags]);
            }
            Accumulator::Grouped(slot) => {
                let table = b.state_addr(slot);
                let buckets = b.constant(cx.config().hash_table_buckets);
                let init = cx.code().hash_table_init_fn();
                b.call_void(init, &[table, buckets]);
            }
        }
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, consume: &mut Consume<'_>) -> Result<()> {
        self.child.produce(cx, b, &mut |cx, b, row| {
            let inputs = self.inputs(cx, b, row)?;
            match self.accumulator {
                Accumulator::Global(slot) => {
                    let aggregator = b.state_addr(slot);
                    let advance = cx.code().aggregator_advance_fn();
                    b.call_void(advance, &[aggregator, inputs]);
                }
                Accumulator::Grouped(slot) => {
                    let keys = compile_all(cx, b, &self.group_by, &[&row.columns])?;
                    let keys = b.make_tuple(&keys);
                    let kinds = b.const_u32_list(&self.kinds);
                    let table = b.state_addr(slot);
                    let advance = cx.code().hash_table_advance_group_fn();
                    b.call_void(advance, &[table, kinds, keys, inputs]);
                }
            }
            Ok(())
        })?;

        let width = self.output_types.len();
        match self.accumulator {
            Accumulator::Global(slot) => {
                let aggregator = b.state_addr(slot);
                let result = cx.code().aggregator_result_fn();
                let row = b.call(result, &[aggregator]);
                let columns = b.unpack_tuple(row, width);
                consume(cx, b, &Row::values(columns))
            }
            Accumulator::Grouped(slot) => {
                let table = b.state_addr(slot);
                let kinds = b.const_u32_list(&self.kinds);
                let num_keys = b.const_u32(self.group_by.len() as u32);
                let results = cx.code().hash_table_group_results_fn();
                let groups = b.call(results, &[table, kinds, num_keys]);
                b.for_each(groups, |b, group| {
                    let columns = b.unpack_tuple(group, width);
                    consume(cx, b, &Row::values(columns))
                })
            }
        }
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        if let Accumulator::Grouped(slot) = self.accumulator {
            let table = b.state_addr(slot);
            let destroy = cx.code().hash_table_destroy_fn();
            b.call_void(destroy, &[table]);
        }
        self.child.tear_down_state(cx, b)
    }
}
