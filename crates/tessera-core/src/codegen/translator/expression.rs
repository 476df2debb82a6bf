//! Scalar expression code generation
//!
//! Expressions compile to straight-line SQL value instructions over the
//! registers of their input rows. AND / OR evaluate both sides; null
//! handling lives in the value instructions themselves.

use super::super::builder::FunctionBuilder;
use super::super::compilation_context::CompilationContext;
use super::super::ir::{Inst, LogicOp, Reg};
use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::runtime::BuiltinFunction;
use crate::types::{CompareOp, TypeId};

/// Emit `expr`; `inputs[t][c]` holds column `c` of input row `t`
pub fn compile(cx: &mut CompilationContext, b: &mut FunctionBuilder, expr: &Expr, inputs: &[&[Reg]]) -> Result<Reg> {
    let reg = match expr {
        Expr::Column { tuple, column } => {
            return inputs
                .get(*tuple as usize)
                .and_then(|row| row.get(*column as usize))
                .copied()
                .ok_or_else(|| Error::codegen(format!("column ({tuple}, {column}) is not bound")));
        }
        Expr::Constant(value) => b.value(value.clone()),
        Expr::Parameter { index, type_id } => {
            let ctx = cx.load_ctx(b);
            let index = b.const_u32(*index);
            let param = cx.code().ctx_param_fn();
            let raw = b.call(param, &[ctx, index]);
            let dst = b.reg();
            b.emit(Inst::Cast {
                dst,
                src: raw,
                to: *type_id,
            });
            dst
        }
        Expr::Arith { op, left, right } => {
            let lhs = compile(cx, b, left, inputs)?;
            let rhs = compile(cx, b, right, inputs)?;
            let dst = b.reg();
            b.emit(Inst::Arith { dst, op: *op, lhs, rhs });
            dst
        }
        Expr::Negate(inner) => {
            let src = compile(cx, b, inner, inputs)?;
            let dst = b.reg();
            b.emit(Inst::Negate { dst, src });
            dst
        }
        Expr::Compare { op, left, right } => {
            let lhs = compile(cx, b, left, inputs)?;
            let rhs = compile(cx, b, right, inputs)?;
            compare(b, *op, lhs, rhs)
        }
        Expr::And(left, right) => logic(cx, b, LogicOp::And, left, right, inputs)?,
        Expr::Or(left, right) => logic(cx, b, LogicOp::Or, left, right, inputs)?,
        Expr::Not(inner) => {
            let src = compile(cx, b, inner, inputs)?;
            let dst = b.reg();
            b.emit(Inst::Not { dst, src });
            dst
        }
        Expr::IsNull { expr, negated } => {
            let src = compile(cx, b, expr, inputs)?;
            let dst = b.reg();
            b.emit(Inst::IsNull {
                dst,
                src,
                negated: *negated,
            });
            dst
        }
        Expr::Cast { expr, to } => {
            let src = compile(cx, b, expr, inputs)?;
            let dst = b.reg();
            b.emit(Inst::Cast { dst, src, to: *to });
            dst
        }
        Expr::Function { func, args } => call_builtin(cx, b, *func, args, inputs)?,
        Expr::Like { expr, pattern } => {
            let args = [expr.as_ref().clone(), pattern.as_ref().clone()];
            call_builtin(cx, b, BuiltinFunction::Like, &args, inputs)?
        }
    };
    Ok(reg)
}

/// Emit a predicate and reduce it to a machine boolean (null fails)
pub fn compile_filter(
    cx: &mut CompilationContext,
    b: &mut FunctionBuilder,
    predicate: &Expr,
    inputs: &[&[Reg]],
) -> Result<Reg> {
    let value = compile(cx, b, predicate, inputs)?;
    Ok(b.truthy(value))
}

/// Emit each expression over the same inputs
pub fn compile_all(
    cx: &mut CompilationContext,
    b: &mut FunctionBuilder,
    exprs: &[Expr],
    inputs: &[&[Reg]],
) -> Result<Vec<Reg>> {
    exprs.iter().map(|e| compile(cx, b, e, inputs)).collect()
}

/// SQL comparison of two registers
pub fn compare(b: &mut FunctionBuilder, op: CompareOp, lhs: Reg, rhs: Reg) -> Reg {
    let dst = b.reg();
    b.emit(Inst::Compare { dst, op, lhs, rhs });
    dst
}

/// SQL AND of two boolean registers
pub fn and(b: &mut FunctionBuilder, lhs: Reg, rhs: Reg) -> Reg {
    let dst = b.reg();
    b.emit(Inst::Logic {
        dst,
        op: LogicOp::And,
        lhs,
        rhs,
    });
    dst
}

fn logic(
    cx: &mut CompilationContext,
    b: &mut FunctionBuilder,
    op: LogicOp,
    left: &Expr,
    right: &Expr,
    inputs: &[&[Reg]],
) -> Result<Reg> {
    let lhs = compile(cx, b, left, inputs)?;
    let rhs = compile(cx, b, right, inputs)?;
    let dst = b.reg();
    b.emit(Inst::Logic { dst, op, lhs, rhs });
    Ok(dst)
}

fn call_builtin(
    cx: &mut CompilationContext,
    b: &mut FunctionBuilder,
    func: BuiltinFunction,
    args: &[Expr],
    inputs: &[&[Reg]],
) -> Result<Reg> {
    let (min, max) = func.arity();
    if args.len() < min || args.len() > max {
        return Err(Error::invalid_input(format!(
            "{} takes {min}..={max} arguments, got {}",
            func.symbol(),
            args.len()
        )));
    }
    let mut regs = compile_all(cx, b, args, inputs)?;
    for index in args.len()..max {
        let default = func
            .default_arg(index)
            .ok_or_else(|| Error::internal(format!("{} has no default for argument {index}", func.symbol())))?;
        regs.push(b.value(default));
    }
    let (natives, types) = cx.code().registries();
    let id = func.register(natives, types);
    Ok(b.call(id, &regs))
}

/// Check that a predicate is boolean over the given input types
pub fn check_predicate(predicate: &Expr, inputs: &[&[TypeId]]) -> Result<()> {
    let ty = predicate.return_type(inputs)?;
    if ty != TypeId::Boolean {
        return Err(Error::type_mismatch("BOOLEAN predicate", ty.name()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::ir::FuncRef;
    use crate::codegen::interpreter;
    use crate::config::EngineConfig;
    use crate::proxy::Datum;
    use crate::storage::StorageManager;
    use crate::types::Value;
    use std::sync::Arc;

    fn eval(expr: &Expr, row: Vec<Value>) -> Result<Value> {
        let storage = Arc::new(StorageManager::new(1, 8));
        let mut cx = CompilationContext::new("expr", storage, EngineConfig::default());
        let mut b = FunctionBuilder::new("eval", 0);
        let regs: Vec<Reg> = row.into_iter().map(|v| b.value(v)).collect();
        let out = compile(&mut cx, &mut b, expr, &[&regs])?;
        b.ret(Some(out));
        let function = b.finish()?;
        let (mut code, state) = cx.into_parts();
        code.add(function)?;
        let layout = state.finalize(code.types(), "expr_state");
        let (module, _) = code.finish()?;
        let state = Arc::new(layout.instantiate());
        match interpreter::run(&Arc::new(module), FuncRef(0), &state, vec![])? {
            Datum::Value(v) => Ok(v),
            other => Err(Error::type_mismatch("value", other.kind())),
        }
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let expr = Expr::compare(
            CompareOp::GreaterThan,
            Expr::arith(crate::types::ArithOp::Multiply, Expr::col(0), Expr::lit(Value::Integer(2))),
            Expr::col(1),
        );
        let out = eval(&expr, vec![Value::Integer(5), Value::BigInt(9)]).unwrap();
        assert_eq!(out, Value::Boolean(true));
    }

    #[test]
    fn test_three_valued_and() {
        let null_cmp = Expr::eq(Expr::col(0), Expr::lit(Value::Integer(1)));
        let false_cmp = Expr::eq(Expr::lit(Value::Integer(1)), Expr::lit(Value::Integer(2)));
        let out = eval(&Expr::and(null_cmp.clone(), false_cmp), vec![Value::null(TypeId::Integer)]).unwrap();
        assert_eq!(out, Value::Boolean(false));
        let out = eval(&Expr::not(null_cmp), vec![Value::null(TypeId::Integer)]).unwrap();
        assert!(out.is_null());
    }

    #[test]
    fn test_builtin_with_default_argument() {
        let expr = Expr::call("ltrim", vec![Expr::col(0)]).unwrap();
        let out = eval(&expr, vec![Value::varchar("  hi")]).unwrap();
        assert_eq!(out.as_str(), Some("hi"));
    }

    #[test]
    fn test_unbound_column_is_rejected() {
        assert!(eval(&Expr::col(3), vec![Value::Integer(1)]).is_err());
    }
}
