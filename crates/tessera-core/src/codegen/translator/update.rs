use super::expression::compile;
use super::{Consume, OperatorTranslator};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::ir::Inst;
use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::proxy::StateId;
use crate::runtime::Updater;
use crate::storage::Oid;
use crate::types::TypeId;

/// Rewrites target columns of every row its scan child produces
///
/// Columns outside the targets are copied from the old version. Updates
/// touching the primary key are emitted as delete plus re-insert.
#[derive(Debug)]
pub struct UpdateTranslator {
    table_oid: Oid,
    child: Box<dyn OperatorTranslator>,
    targets: Vec<(u32, Expr)>,
    target_types: Vec<TypeId>,
    direct_map: Vec<u32>,
    updates_primary_key: bool,
    updater: StateId,
}

impl UpdateTranslator {
    /// Check the targets and reserve the updater
    pub fn new(
        cx: &mut CompilationContext,
        table_oid: Oid,
        child: Box<dyn OperatorTranslator>,
        targets: Vec<(u32, Expr)>,
    ) -> Result<Self> {
        let table = cx.table(table_oid)?;
        let schema = table.schema();
        let mut target_types = Vec::with_capacity(targets.len());
        for (column, expr) in &targets {
            let ty = schema
                .column(*column as usize)
                .map(|c| c.type_id)
                .ok_or_else(|| Error::catalog(format!("table '{}' has no column {column}", table.name())))?;
            expr.return_type(&[child.output_types()])?;
            target_types.push(ty);
        }
        let target_columns: Vec<u32> = targets.iter().map(|(c, _)| *c).collect();
        let direct_map = (0..schema.column_count() as u32)
            .filter(|c| !target_columns.contains(c))
            .flat_map(|c| [c, c])
            .collect();
        let updates_primary_key = table.touches_primary_key(&target_columns);
        cx.table_slot(table_oid)?;
        let updater = cx.register_state::<Updater>("updater");
        Ok(Self {
            table_oid,
            child,
            targets,
            target_types,
            direct_map,
            updates_primary_key,
            updater,
        })
    }
}

impl OperatorTranslator for UpdateTranslator {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn output_types(&self) -> &[TypeId] {
        &[]
    }

    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.child.initialize_state(cx, b)?;
        let updater = b.state_addr(self.updater);
        let table = cx.load_table(b, self.table_oid)?;
        let ctx = cx.load_ctx(b);
        let target_columns: Vec<u32> = self.targets.iter().map(|(c, _)| *c).collect();
        let target_columns = b.const_u32_list(&target_columns);
        let direct_map = b.const_u32_list(&self.direct_map);
        let init = cx.code().updater_init_fn();
        b.call_void(init, &[updater, table, ctx, target_columns, direct_map]);
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, _consume: &mut Consume<'_>) -> Result<()> {
        let child = self.child.name();
        let update = if self.updates_primary_key {
            cx.code().updater_update_pk_fn()
        } else {
            cx.code().updater_update_fn()
        };
        self.child.produce(cx, b, &mut |cx, b, row| {
            let location = row
                .location
                .ok_or_else(|| Error::codegen(format!("update input from {child} carries no tuple location")))?;
            let mut values = Vec::with_capacity(self.targets.len());
            for ((_, expr), &to) in self.targets.iter().zip(&self.target_types) {
                let src = compile(cx, b, expr, &[&row.columns])?;
                let dst = b.reg();
                b.emit(Inst::Cast { dst, src, to });
                values.push(dst);
            }
            let values = b.make_tuple(&values);
            let updater = b.state_addr(self.updater);
            b.call_void(update, &[updater, location.tile_group_id, location.offset, values]);
            Ok(())
        })
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        let updater = b.state_addr(self.updater);
        let tear_down = cx.code().updater_tear_down_fn();
        b.call_void(tear_down, &[updater]);
        self.child.tear_down_state(cx, b)
    }
}
