use super::expression::compile;
use super::{Consume, OperatorTranslator, build};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::ir::{Inst, Reg};
use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::planner::InsertSource;
use crate::proxy::StateId;
use crate::runtime::Inserter;
use crate::storage::Oid;
use crate::types::TypeId;

#[derive(Debug)]
enum Source {
    Values(Vec<Vec<Expr>>),
    Child(Box<dyn OperatorTranslator>),
}

/// Inserts literal rows or the rows of a child plan
#[derive(Debug)]
pub struct InsertTranslator {
    table_oid: Oid,
    column_types: Vec<TypeId>,
    source: Source,
    inserter: StateId,
}

impl InsertTranslator {
    /// Check row widths against the table and reserve the inserter
    pub fn new(cx: &mut CompilationContext, table_oid: Oid, source: &InsertSource) -> Result<Self> {
        let table = cx.table(table_oid)?;
        let column_types: Vec<TypeId> = table.schema().columns().iter().map(|c| c.type_id).collect();
        let width_error = |got: usize| {
            Error::invalid_input(format!(
                "table '{}' has {} columns, insert row has {got}",
                table.name(),
                column_types.len()
            ))
        };
        let source = match source {
            InsertSource::Values(rows) => {
                for row in rows {
                    if row.len() != column_types.len() {
                        return Err(width_error(row.len()));
                    }
                    if let Some(expr) = row.iter().find(|e| !e.is_row_independent()) {
                        return Err(Error::invalid_input(format!("insert value {expr} references a column")));
                    }
                }
                Source::Values(rows.clone())
            }
            InsertSource::Child(plan) => {
                let child = build(plan, cx, false)?;
                if child.output_types().len() != column_types.len() {
                    return Err(width_error(child.output_types().len()));
                }
                Source::Child(child)
            }
        };
        cx.table_slot(table_oid)?;
        let inserter = cx.register_state::<Inserter>("inserter");
        Ok(Self {
            table_oid,
            column_types,
            source,
            inserter,
        })
    }

    fn insert_row(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, values: &[Reg]) {
        let cast: Vec<Reg> = values
            .iter()
            .zip(&self.column_types)
            .map(|(&src, &to)| {
                let dst = b.reg();
                b.emit(Inst::Cast { dst, src, to });
                dst
            })
            .collect();
        let row = b.make_tuple(&cast);
        let inserter = b.state_addr(self.inserter);
        let insert = cx.code().inserter_insert_fn();
        b.call_void(insert, &[inserter, row]);
    }
}

impl OperatorTranslator for InsertTranslator {
    fn name(&self) -> &'static str {
        "Insert"
    }

    fn output_types(&self) -> &[TypeId] {
        &[]
    }

    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        if let Source::Child(child) = &self.source {
            child.initialize_state(cx, b)?;
        }
        let inserter = b.state_addr(self.inserter);
        let table = cx.load_table(b, self.table_oid)?;
        let ctx = cx.load_ctx(b);
        let init = cx.code().inserter_init_fn();
        b.call_void(init, &[inserter, table, ctx]);
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, _consume: &mut Consume<'_>) -> Result<()> {
        match &self.source {
            Source::Values(rows) => {
                for row in rows {
                    let values = row
                        .iter()
                        .map(|expr| compile(cx, b, expr, &[]))
                        .collect::<Result<Vec<_>>>()?;
                    self.insert_row(cx, b, &values);
                }
                Ok(())
            }
            Source::Child(child) => child.produce(cx, b, &mut |cx, b, row| {
                self.insert_row(cx, b, &row.columns);
                Ok(())
            }),
        }
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        let inserter = b.state_addr(self.inserter);
        let tear_down = cx.code().inserter_tear_down_fn();
        b.call_void(tear_down, &[inserter]);
        if let Source::Child(child) = &self.source {
            child.tear_down_state(cx, b)?;
        }
        Ok(())
    }
}
