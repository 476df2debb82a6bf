//! IR interpreter
//!
//! Executes module functions against a runtime state. Every activation owns
//! a register file and its locals; state slots are shared with worker tasks
//! started through `MakeTask`.

use super::ir::{FuncRef, Inst, IntOp, IrFunction, IrModule, LogicOp, Reg};
use crate::error::{Error, Result};
use crate::proxy::{CallEnv, Datum, SlotRef, TaskFunction, Tuple, expect_value, truthy};
use crate::runtime::{LocalState, RuntimeState, TaskInfo};
use crate::types::{CmpBool, Value};
use crate::runtime::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Control-flow outcome of a block
enum Flow {
    Next,
    Break,
    Continue,
    Return(Datum),
}

/// Run `func` of `module` with `args` bound to its parameter registers
pub fn run(
    module: &Arc<IrModule>,
    func: FuncRef,
    state: &Arc<RuntimeState>,
    args: Vec<Datum>,
) -> Result<Datum> {
    let function = module.function(func)?;
    if args.len() != function.num_params() as usize {
        return Err(Error::codegen(format!(
            "{} takes {} arguments, got {}",
            function.name(),
            function.num_params(),
            args.len()
        )));
    }
    let mut frame = Frame::new(module, function, state, args);
    tracing::trace!(function = function.name(), "enter");
    match frame.block(&function.body)? {
        Flow::Return(value) => Ok(value),
        Flow::Next => Ok(Datum::Void),
        Flow::Break | Flow::Continue => Err(Error::codegen(format!(
            "{}: break/continue escaped the function",
            function.name()
        ))),
    }
}

struct Frame<'a> {
    module: &'a Arc<IrModule>,
    function: &'a IrFunction,
    state: &'a Arc<RuntimeState>,
    regs: Vec<Datum>,
    locals: LocalState,
}

fn int_like(template: &Datum, value: i128) -> Result<Datum> {
    let out_of_range = || Error::out_of_range(format!("{value} overflows a {} counter", template.kind()));
    Ok(match template {
        Datum::I32(_) => Datum::I32(i32::try_from(value).map_err(|_| out_of_range())?),
        Datum::U32(_) => Datum::U32(u32::try_from(value).map_err(|_| out_of_range())?),
        Datum::I64(_) => Datum::I64(i64::try_from(value).map_err(|_| out_of_range())?),
        Datum::U64(_) => Datum::U64(u64::try_from(value).map_err(|_| out_of_range())?),
        other => {
            return Err(Error::codegen(format!(
                "{} datum is not a machine integer",
                other.kind()
            )));
        }
    })
}

fn int_of(datum: &Datum) -> Result<i128> {
    datum
        .as_int()
        .ok_or_else(|| Error::codegen(format!("expected a machine integer, found {}", datum.kind())))
}

impl<'a> Frame<'a> {
    fn new(
        module: &'a Arc<IrModule>,
        function: &'a IrFunction,
        state: &'a Arc<RuntimeState>,
        args: Vec<Datum>,
    ) -> Self {
        let mut regs = vec![Datum::Void; function.num_regs() as usize];
        for (reg, arg) in regs.iter_mut().zip(args) {
            *reg = arg;
        }
        Self {
            module,
            function,
            state,
            regs,
            locals: LocalState::new(&function.locals),
        }
    }

    fn get(&self, reg: Reg) -> Result<&Datum> {
        self.regs.get(reg.0 as usize).ok_or_else(|| {
            Error::codegen(format!("{}: register {reg} out of range", self.function.name()))
        })
    }

    fn set(&mut self, reg: Reg, datum: Datum) -> Result<()> {
        let name = self.function.name();
        let slot = self
            .regs
            .get_mut(reg.0 as usize)
            .ok_or_else(|| Error::codegen(format!("{name}: register {reg} out of range")))?;
        *slot = datum;
        Ok(())
    }

    fn value(&self, reg: Reg) -> Result<&Value> {
        expect_value(self.get(reg)?)
    }

    fn sql_bool(&self, reg: Reg) -> Result<CmpBool> {
        CmpBool::from_value(self.value(reg)?)
    }

    fn block(&mut self, block: &[Inst]) -> Result<Flow> {
        for inst in block {
            match self.inst(inst)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    /// Loop body outcome: `None` keeps iterating
    fn loop_body(&mut self, body: &[Inst]) -> Result<Option<Flow>> {
        Ok(match self.block(body)? {
            Flow::Next | Flow::Continue => None,
            Flow::Break => Some(Flow::Next),
            ret @ Flow::Return(_) => Some(ret),
        })
    }

    fn inst(&mut self, inst: &Inst) -> Result<Flow> {
        match inst {
            Inst::Const { dst, value } => self.set(*dst, value.clone())?,
            Inst::Move { dst, src } => {
                let value = self.get(*src)?.clone();
                self.set(*dst, value)?;
            }
            Inst::LoadState { dst, slot } => {
                let value = self.state.load(*slot)?;
                self.set(*dst, value)?;
            }
            Inst::StoreState { slot, src } => self.state.store(*slot, self.get(*src)?.clone())?,
            Inst::StateAddr { dst, slot } => self.set(*dst, Datum::Ptr(SlotRef::State(*slot)))?,
            Inst::LocalAddr { dst, slot } => self.set(*dst, Datum::Ptr(SlotRef::Local(*slot)))?,
            Inst::StatePtr { dst } => self.set(*dst, Datum::object(Arc::clone(self.state)))?,
            Inst::Arith { dst, op, lhs, rhs } => {
                let result = self.value(*lhs)?.arith(*op, self.value(*rhs)?)?;
                self.set(*dst, Datum::Value(result))?;
            }
            Inst::Negate { dst, src } => {
                let result = self.value(*src)?.negate()?;
                self.set(*dst, Datum::Value(result))?;
            }
            Inst::Compare { dst, op, lhs, rhs } => {
                let result = self.value(*lhs)?.compare(*op, self.value(*rhs)?)?;
                self.set(*dst, Datum::Value(result.to_value()))?;
            }
            Inst::Logic { dst, op, lhs, rhs } => {
                let (l, r) = (self.sql_bool(*lhs)?, self.sql_bool(*rhs)?);
                let result = match op {
                    LogicOp::And => l.and(r),
                    LogicOp::Or => l.or(r),
                };
                self.set(*dst, Datum::Value(result.to_value()))?;
            }
            Inst::Not { dst, src } => {
                let result = self.sql_bool(*src)?.not();
                self.set(*dst, Datum::Value(result.to_value()))?;
            }
            Inst::IsNull { dst, src, negated } => {
                let is_null = self.value(*src)?.is_null();
                self.set(*dst, Datum::Value(Value::Boolean(is_null != *negated)))?;
            }
            Inst::Cast { dst, src, to } => {
                let result = self.value(*src)?.cast_as(*to)?;
                self.set(*dst, Datum::Value(result))?;
            }
            Inst::Truthy { dst, src } => {
                let passes = truthy(self.get(*src)?)?;
                self.set(*dst, Datum::Bool(passes))?;
            }
            Inst::IntBinary { dst, op, lhs, rhs } => {
                let template = self.get(*lhs)?;
                let (l, r) = (int_of(template)?, int_of(self.get(*rhs)?)?);
                let result = match op {
                    IntOp::Add => int_like(template, l + r)?,
                    IntOp::Sub => int_like(template, l - r)?,
                    IntOp::Mul => int_like(template, l * r)?,
                    IntOp::Min => int_like(template, l.min(r))?,
                    IntOp::Lt => Datum::Bool(l < r),
                    IntOp::Le => Datum::Bool(l <= r),
                    IntOp::Gt => Datum::Bool(l > r),
                    IntOp::Ge => Datum::Bool(l >= r),
                    IntOp::Eq => Datum::Bool(l == r),
                    IntOp::Ne => Datum::Bool(l != r),
                };
                self.set(*dst, result)?;
            }
            Inst::Call {
                dst,
                function,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|r| self.get(*r).cloned())
                    .collect::<Result<Vec<_>>>()?;
                let mut env = CallEnv::new(self.state, &mut self.locals);
                let result = self.module.natives().invoke(*function, &mut env, &args)?;
                if let Some(dst) = dst {
                    self.set(*dst, result)?;
                }
            }
            Inst::LoadField { dst, object, field } => {
                let value = field.load(self.get(*object)?)?;
                self.set(*dst, value)?;
            }
            Inst::MakeTuple { dst, elems } => {
                let values = elems
                    .iter()
                    .map(|r| self.value(*r).cloned())
                    .collect::<Result<Vec<_>>>()?;
                self.set(*dst, Datum::Tuple(Tuple::new(values)))?;
            }
            Inst::TupleGet { dst, tuple, index } => {
                let value = match self.get(*tuple)? {
                    Datum::Tuple(t) => t.values().get(*index as usize).cloned().ok_or_else(|| {
                        Error::codegen(format!(
                            "tuple of width {} has no column {index}",
                            t.values().len()
                        ))
                    })?,
                    other => return Err(Error::type_mismatch("tuple", other.kind())),
                };
                self.set(*dst, Datum::Value(value))?;
            }
            Inst::ListLen { dst, list } => {
                let len = match self.get(*list)? {
                    Datum::List(items) => items.len(),
                    other => return Err(Error::type_mismatch("list", other.kind())),
                };
                let len = u32::try_from(len).map_err(|_| Error::out_of_range("list too long"))?;
                self.set(*dst, Datum::U32(len))?;
            }
            Inst::ListGet { dst, list, index } => {
                let index = int_of(self.get(*index)?)?;
                let item = match self.get(*list)? {
                    Datum::List(items) => usize::try_from(index)
                        .ok()
                        .and_then(|i| items.get(i))
                        .cloned()
                        .ok_or_else(|| {
                            Error::out_of_range(format!("list index {index} of {}", items.len()))
                        })?,
                    other => return Err(Error::type_mismatch("list", other.kind())),
                };
                self.set(*dst, item)?;
            }
            Inst::MakeTask { dst, function } => {
                let task = task_function(self.module, *function)?;
                self.set(*dst, Datum::Task(task))?;
            }
            Inst::If {
                cond,
                then_body,
                else_body,
            } => {
                let taken = truthy(self.get(*cond)?)?;
                return self.block(if taken { then_body } else { else_body });
            }
            Inst::Loop {
                var,
                start,
                end,
                step,
                body,
            } => {
                let template = self.get(*start)?.clone();
                let (mut i, end) = (int_of(&template)?, int_of(self.get(*end)?)?);
                while i < end {
                    self.set(*var, int_like(&template, i)?)?;
                    if let Some(flow) = self.loop_body(body)? {
                        return Ok(flow);
                    }
                    i += i128::from(*step);
                }
            }
            Inst::While { header, cond, body } => loop {
                match self.block(header)? {
                    Flow::Next => {}
                    other => return Ok(other),
                }
                if !truthy(self.get(*cond)?)? {
                    break;
                }
                if let Some(flow) = self.loop_body(body)? {
                    return Ok(flow);
                }
            },
            Inst::ForEach { item, list, body } => {
                let items = match self.get(*list)? {
                    Datum::List(items) => Arc::clone(items),
                    other => return Err(Error::type_mismatch("list", other.kind())),
                };
                for element in items.iter() {
                    self.set(*item, element.clone())?;
                    if let Some(flow) = self.loop_body(body)? {
                        return Ok(flow);
                    }
                }
            }
            Inst::Guard { body, finally } => {
                // a panicking native call still runs the cleanup block
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.block(body)))
                    .unwrap_or_else(|payload| {
                        Err(Error::executor(format!(
                            "guarded block panicked: {}",
                            panic_message(payload.as_ref())
                        )))
                    });
                let cleanup = self.block(finally);
                return match (outcome, cleanup) {
                    (Err(error), Err(cleanup_error)) => {
                        tracing::warn!(%cleanup_error, "cleanup block failed after an error");
                        Err(error)
                    }
                    (Err(error), Ok(_)) => Err(error),
                    (Ok(_), Err(cleanup_error)) => Err(cleanup_error),
                    (Ok(flow), Ok(Flow::Next)) => Ok(flow),
                    (Ok(_), Ok(cleanup_flow)) => Ok(cleanup_flow),
                };
            }
            Inst::Break => return Ok(Flow::Break),
            Inst::Continue => return Ok(Flow::Continue),
            Inst::Return { value } => {
                let value = match value {
                    Some(reg) => self.get(*reg)?.clone(),
                    None => Datum::Void,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }
}

/// Thread pool task running `function` with the task info as argument
fn task_function(module: &Arc<IrModule>, function: FuncRef) -> Result<TaskFunction> {
    let name = module.function(function)?.name().to_string();
    let module = Arc::clone(module);
    Ok(TaskFunction::new(
        name,
        move |state: Arc<RuntimeState>, task: Arc<TaskInfo>| {
            run(&module, function, &state, vec![Datum::object(task)]).map(|_| ())
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::builder::FunctionBuilder;
    use crate::proxy::{FunctionRegistry, TypeRegistry};
    use crate::runtime::RuntimeStateBuilder;
    use crate::types::{ArithOp, CompareOp};

    fn module_of(functions: Vec<IrFunction>, natives: FunctionRegistry) -> Arc<IrModule> {
        let module = IrModule {
            name: "test".into(),
            functions,
            natives,
        };
        module.verify().unwrap();
        Arc::new(module)
    }

    fn empty_state() -> Arc<RuntimeState> {
        let mut types = TypeRegistry::new();
        Arc::new(RuntimeStateBuilder::new().finalize(&mut types, "S").instantiate())
    }

    #[test]
    fn test_loop_with_break_sums() {
        let mut b = FunctionBuilder::new("sum_until", 1);
        let limit = b.param(0).unwrap();
        let zero = b.const_u32(0);
        let ten = b.const_u32(10);
        let acc = b.reg();
        b.emit(Inst::Const {
            dst: acc,
            value: Datum::U32(0),
        });
        b.range_loop(zero, ten, 1, |b, i| {
            let stop = b.int_op(IntOp::Ge, i, limit);
            b.if_then(stop, |b| {
                b.brk();
                Ok(())
            })?;
            let next = b.int_op(IntOp::Add, acc, i);
            b.emit(Inst::Move { dst: acc, src: next });
            Ok(())
        })
        .unwrap();
        b.ret(Some(acc));
        let module = module_of(vec![b.finish().unwrap()], FunctionRegistry::new());

        let out = run(&module, FuncRef(0), &empty_state(), vec![Datum::U32(4)]).unwrap();
        assert!(matches!(out, Datum::U32(6)));
    }

    #[test]
    fn test_sql_ops_and_null_filter() {
        let mut b = FunctionBuilder::new("expr", 0);
        let x = b.value(Value::Integer(40));
        let y = b.value(Value::Integer(2));
        let sum = b.reg();
        b.emit(Inst::Arith {
            dst: sum,
            op: ArithOp::Add,
            lhs: x,
            rhs: y,
        });
        let null = b.value(Value::null(crate::types::TypeId::Integer));
        let cmp = b.reg();
        b.emit(Inst::Compare {
            dst: cmp,
            op: CompareOp::Equal,
            lhs: sum,
            rhs: null,
        });
        let passes = b.truthy(cmp);
        let out = b.make_tuple(&[sum, cmp]);
        b.if_then(passes, |b| {
            b.ret(None);
            Ok(())
        })
        .unwrap();
        b.ret(Some(out));
        let module = module_of(vec![b.finish().unwrap()], FunctionRegistry::new());

        let out = run(&module, FuncRef(0), &empty_state(), vec![]).unwrap();
        let Datum::Tuple(t) = out else {
            panic!("expected a tuple");
        };
        assert_eq!(t.values()[0], Value::Integer(42));
        assert!(t.values()[1].is_null());
    }

    #[test]
    fn test_guard_runs_finally_on_error() {
        let mut types = TypeRegistry::new();
        let mut natives = FunctionRegistry::new();
        let fail = natives.register(&mut types, "fail", || -> Result<()> {
            Err(Error::executor("boom"))
        });
        let mut sb = RuntimeStateBuilder::new();
        let flag = sb.register_datum("flag", crate::proxy::NativeType::Bool);
        let state = Arc::new(sb.finalize(&mut types, "S").instantiate());

        let mut b = FunctionBuilder::new("guarded", 0);
        b.guard(
            |b| {
                b.call_void(fail, &[]);
                Ok(())
            },
            |b| {
                let t = b.constant(true);
                b.store_state(flag, t);
                Ok(())
            },
        )
        .unwrap();
        let module = module_of(vec![b.finish().unwrap()], natives);

        let err = run(&module, FuncRef(0), &state, vec![]).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(matches!(state.load(flag).unwrap(), Datum::Bool(true)));
    }

    #[test]
    fn test_guard_runs_finally_on_panic() {
        let mut types = TypeRegistry::new();
        let mut natives = FunctionRegistry::new();
        let explode = natives.register(&mut types, "explode", || -> Result<()> { panic!("kaboom") });
        let mut sb = RuntimeStateBuilder::new();
        let flag = sb.register_datum("flag", crate::proxy::NativeType::Bool);
        let state = Arc::new(sb.finalize(&mut types, "S").instantiate());

        let mut b = FunctionBuilder::new("guarded", 0);
        b.guard(
            |b| {
                b.call_void(explode, &[]);
                Ok(())
            },
            |b| {
                let t = b.constant(true);
                b.store_state(flag, t);
                Ok(())
            },
        )
        .unwrap();
        let module = module_of(vec![b.finish().unwrap()], natives);

        let err = run(&module, FuncRef(0), &state, vec![]).unwrap_err();
        assert!(matches!(&err, Error::Executor(m) if m.contains("kaboom")));
        assert!(matches!(state.load(flag).unwrap(), Datum::Bool(true)));
    }

    #[test]
    fn test_counter_overflow_is_an_error() {
        let mut b = FunctionBuilder::new("overflow", 0);
        let max = b.const_u32(u32::MAX);
        let one = b.const_u32(1);
        let out = b.int_op(IntOp::Add, max, one);
        b.ret(Some(out));
        let module = module_of(vec![b.finish().unwrap()], FunctionRegistry::new());
        assert!(run(&module, FuncRef(0), &empty_state(), vec![]).is_err());
    }
}
