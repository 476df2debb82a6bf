use super::expression::compile_all;
use super::{Consume, OperatorTranslator, Row};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::error::Result;
use crate::expression::Expr;
use crate::types::TypeId;

/// Computes output expressions over each child row
#[derive(Debug)]
pub struct ProjectionTranslator {
    child: Box<dyn OperatorTranslator>,
    targets: Vec<Expr>,
    output_types: Vec<TypeId>,
}

impl ProjectionTranslator {
    /// Type-check the targets against the child's output
    pub fn new(child: Box<dyn OperatorTranslator>, targets: Vec<Expr>) -> Result<Self> {
        let output_types = targets
            .iter()
            .map(|t| t.return_type(&[child.output_types()]))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            child,
            targets,
            output_types,
        })
    }
}

impl OperatorTranslator for ProjectionTranslator {
    fn name(&self) -> &'static str {
        "Projection"
    }

    fn output_types(&self) -> &[TypeId] {
        &self.output_types
    }

    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.child.initialize_state(cx, b)
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, consume: &mut Consume<'_>) -> Result<()> {
        let targets = &self.targets;
        self.child.produce(cx, b, &mut |cx, b, row| {
            let columns = compile_all(cx, b, targets, &[&row.columns])?;
            consume(cx, b, &Row::values(columns))
        })
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.child.tear_down_state(cx, b)
    }
}
