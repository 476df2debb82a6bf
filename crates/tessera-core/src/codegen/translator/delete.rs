use super::{Consume, OperatorTranslator};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::error::{Error, Result};
use crate::proxy::StateId;
use crate::runtime::Deleter;
use crate::storage::Oid;
use crate::types::TypeId;

/// Deletes every row its scan child produces
#[derive(Debug)]
pub struct DeleteTranslator {
    table_oid: Oid,
    child: Box<dyn OperatorTranslator>,
    deleter: StateId,
}

impl DeleteTranslator {
    /// Reserve the deleter for `table_oid`
    pub fn new(cx: &mut CompilationContext, table_oid: Oid, child: Box<dyn OperatorTranslator>) -> Result<Self> {
        cx.table_slot(table_oid)?;
        let deleter = cx.register_state::<Deleter>("deleter");
        Ok(Self {
            table_oid,
            child,
            deleter,
        })
    }
}

impl OperatorTranslator for DeleteTranslator {
    fn name(&self) -> &'static str {
        "Delete"
    }

    fn output_types(&self) -> &[TypeId] {
        &[]
    }

    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.child.initialize_state(cx, b)?;
        let deleter = b.state_addr(self.deleter);
        let table = cx.load_table(b, self.table_oid)?;
        let ctx = cx.load_ctx(b);
        let init = cx.code().deleter_init_fn();
        b.call_void(init, &[deleter, table, ctx]);
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, _consume: &mut Consume<'_>) -> Result<()> {
        let child = self.child.name();
        self.child.produce(cx, b, &mut |cx, b, row| {
            let location = row
                .location
                .ok_or_else(|| Error::codegen(format!("delete input from {child} carries no tuple location")))?;
            let deleter = b.state_addr(self.deleter);
            let delete = cx.code().deleter_delete_fn();
            b.call_void(delete, &[deleter, location.tile_group_id, location.offset]);
            Ok(())
        })
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        let deleter = b.state_addr(self.deleter);
        let tear_down = cx.code().deleter_tear_down_fn();
        b.call_void(tear_down, &[deleter]);
        self.child.tear_down_state(cx, b)
    }
}
