use super::{Consume, OperatorTranslator};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::ir::IntOp;
use crate::error::Result;
use crate::proxy::{NativeType, StateId};
use crate::types::TypeId;

/// Skips `offset` child rows, then passes on at most `limit`
///
/// The running row count lives in a state slot so that the count survives
/// across the loops of the child pipeline.
#[derive(Debug)]
pub struct LimitTranslator {
    child: Box<dyn OperatorTranslator>,
    limit: u64,
    offset: u64,
    counter: StateId,
}

impl LimitTranslator {
    /// Reserve the row counter
    pub fn new(cx: &mut CompilationContext, child: Box<dyn OperatorTranslator>, limit: u64, offset: u64) -> Result<Self> {
        let counter = cx.register_datum("limit_counter", NativeType::UInt64);
        Ok(Self {
            child,
            limit,
            offset,
            counter,
        })
    }
}

impl OperatorTranslator for LimitTranslator {
    fn name(&self) -> &'static str {
        "Limit"
    }

    fn output_types(&self) -> &[TypeId] {
        self.child.output_types()
    }

    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.child.initialize_state(cx, b)?;
        let zero = b.constant(0u64);
        b.store_state(self.counter, zero);
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, consume: &mut Consume<'_>) -> Result<()> {
        let end = self.offset.saturating_add(self.limit);
        self.child.produce(cx, b, &mut |cx, b, row| {
            let seen = b.load_state(self.counter);
            let one = b.constant(1u64);
            let next = b.int_op(IntOp::Add, seen, one);
            b.store_state(self.counter, next);
            let offset = b.constant(self.offset);
            let past_offset = b.int_op(IntOp::Ge, seen, offset);
            b.if_then(past_offset, |b| {
                let end = b.constant(end);
                let within = b.int_op(IntOp::Lt, seen, end);
                b.if_then(within, |b| consume(cx, b, row))
            })
        })
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.child.tear_down_state(cx, b)
    }
}
