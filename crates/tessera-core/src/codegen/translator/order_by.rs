use super::{Consume, OperatorTranslator, Row};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::error::{Error, Result};
use crate::planner::SortSpec;
use crate::proxy::StateId;
use crate::runtime::Sorter;
use crate::types::TypeId;

/// Buffers the child's rows in a [`Sorter`] and emits them in key order
#[derive(Debug)]
pub struct OrderByTranslator {
    child: Box<dyn OperatorTranslator>,
    keys: Vec<SortSpec>,
    output_types: Vec<TypeId>,
    sorter: StateId,
}

impl OrderByTranslator {
    /// Check the keys against the child's columns and reserve the sorter
    pub fn new(cx: &mut CompilationContext, child: Box<dyn OperatorTranslator>, keys: Vec<SortSpec>) -> Result<Self> {
        let output_types = child.output_types().to_vec();
        if let Some(key) = keys.iter().find(|k| k.column as usize >= output_types.len()) {
            return Err(Error::invalid_input(format!(
                "sort key column {} is outside the {} input columns",
                key.column,
                output_types.len()
            )));
        }
        let sorter = cx.register_state::<Sorter>("sorter");
        Ok(Self {
            child,
            keys,
            output_types,
            sorter,
        })
    }
}

impl OperatorTranslator for OrderByTranslator {
    fn name(&self) -> &'static str {
        "OrderBy"
    }

    fn output_types(&self) -> &[TypeId] {
        &self.output_types
    }

    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.child.initialize_state(cx, b)?;
        let sorter = b.state_addr(self.sorter);
        let columns: Vec<u32> = self.keys.iter().map(|k| k.column).collect();
        let descending: Vec<bool> = self.keys.iter().map(|k| k.descending).collect();
        let columns = b.const_u32_list(&columns);
        let descending = b.const_bool_list(&descending);
        let init = cx.code().sorter_init_fn();
        b.call_void(init, &[sorter, columns, descending]);
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, consume: &mut Consume<'_>) -> Result<()> {
        self.child.produce(cx, b, &mut |cx, b, row| {
            let tuple = b.make_tuple(&row.columns);
            let sorter = b.state_addr(self.sorter);
            let append = cx.code().sorter_append_fn();
            b.call_void(append, &[sorter, tuple]);
            Ok(())
        })?;

        let sorter = b.state_addr(self.sorter);
        let sort = cx.code().sorter_sort_fn();
        b.call_void(sort, &[sorter]);
        let num_rows = cx.code().sorter_num_rows_fn();
        let count = b.call(num_rows, &[sorter]);
        let read = cx.code().sorter_row_fn();
        let width = self.output_types.len();
        let zero = b.const_u32(0);
        b.range_loop(zero, count, 1, |b, i| {
            let tuple = b.call(read, &[sorter, i]);
            let columns = b.unpack_tuple(tuple, width);
            consume(cx, b, &Row::values(columns))
        })
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        let sorter = b.state_addr(self.sorter);
        let destroy = cx.code().sorter_destroy_fn();
        b.call_void(destroy, &[sorter]);
        self.child.tear_down_state(cx, b)
    }
}
