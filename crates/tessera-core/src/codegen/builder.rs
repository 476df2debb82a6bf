//! Emitting IR functions
//!
//! Structured control flow is built with closures: the builder opens a new
//! block, the closure emits into it, and the builder wraps the block into
//! the enclosing instruction.

use super::ir::{FieldAccess, FuncRef, Inst, IntOp, IrFunction, Reg};
use crate::error::{Error, Result};
use crate::proxy::{Datum, FunctionId, LocalId, StateId};
use crate::runtime::LocalSlot;
use crate::types::Value;

/// Builds one [`IrFunction`]
pub struct FunctionBuilder {
    name: String,
    num_params: u32,
    next_reg: u32,
    locals: Vec<LocalSlot>,
    blocks: Vec<Vec<Inst>>,
}

impl FunctionBuilder {
    /// Start a function whose parameters occupy `%0..%num_params`
    pub fn new(name: impl Into<String>, num_params: u32) -> Self {
        Self {
            name: name.into(),
            num_params,
            next_reg: num_params,
            locals: Vec::new(),
            blocks: vec![Vec::new()],
        }
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register of parameter `index`
    pub fn param(&self, index: u32) -> Result<Reg> {
        if index >= self.num_params {
            return Err(Error::codegen(format!(
                "{} has no parameter {index}",
                self.name
            )));
        }
        Ok(Reg(index))
    }

    /// Fresh register
    pub fn reg(&mut self) -> Reg {
        let reg = Reg(self.next_reg);
        self.next_reg += 1;
        reg
    }

    /// Append an instruction to the open block
    pub fn emit(&mut self, inst: Inst) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(inst);
        }
    }

    fn with_dst(&mut self, make: impl FnOnce(Reg) -> Inst) -> Reg {
        let dst = self.reg();
        let inst = make(dst);
        self.emit(inst);
        dst
    }

    /// Constant datum
    pub fn constant(&mut self, value: impl Into<Datum>) -> Reg {
        let value = value.into();
        self.with_dst(|dst| Inst::Const { dst, value })
    }

    /// Constant SQL value
    pub fn value(&mut self, value: Value) -> Reg {
        self.constant(Datum::Value(value))
    }

    /// Constant `u32`
    pub fn const_u32(&mut self, value: u32) -> Reg {
        self.constant(Datum::U32(value))
    }

    /// Constant list of `u32`
    pub fn const_u32_list(&mut self, values: &[u32]) -> Reg {
        let items: Vec<Datum> = values.iter().map(|&v| Datum::U32(v)).collect();
        self.constant(Datum::List(items.into()))
    }

    /// Constant list of machine booleans
    pub fn const_bool_list(&mut self, values: &[bool]) -> Reg {
        let items: Vec<Datum> = values.iter().map(|&v| Datum::Bool(v)).collect();
        self.constant(Datum::List(items.into()))
    }

    /// Reserve a per-activation local
    pub fn add_local(&mut self, slot: LocalSlot) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(slot);
        id
    }

    /// Pointer to a local
    pub fn local_addr(&mut self, slot: LocalId) -> Reg {
        self.with_dst(|dst| Inst::LocalAddr { dst, slot })
    }

    /// Pointer to a native state slot
    pub fn state_addr(&mut self, slot: StateId) -> Reg {
        self.with_dst(|dst| Inst::StateAddr { dst, slot })
    }

    /// Read a datum state slot
    pub fn load_state(&mut self, slot: StateId) -> Reg {
        self.with_dst(|dst| Inst::LoadState { dst, slot })
    }

    /// Write a datum state slot
    pub fn store_state(&mut self, slot: StateId, src: Reg) {
        self.emit(Inst::StoreState { slot, src });
    }

    /// The runtime state as an object
    pub fn state_ptr(&mut self) -> Reg {
        self.with_dst(|dst| Inst::StatePtr { dst })
    }

    /// Call returning a value
    pub fn call(&mut self, function: FunctionId, args: &[Reg]) -> Reg {
        let args = args.to_vec();
        self.with_dst(|dst| Inst::Call {
            dst: Some(dst),
            function,
            args,
        })
    }

    /// Call discarding the result
    pub fn call_void(&mut self, function: FunctionId, args: &[Reg]) {
        self.emit(Inst::Call {
            dst: None,
            function,
            args: args.to_vec(),
        });
    }

    /// Machine-integer operation
    pub fn int_op(&mut self, op: IntOp, lhs: Reg, rhs: Reg) -> Reg {
        self.with_dst(|dst| Inst::IntBinary { dst, op, lhs, rhs })
    }

    /// Filter outcome of a SQL boolean
    pub fn truthy(&mut self, src: Reg) -> Reg {
        self.with_dst(|dst| Inst::Truthy { dst, src })
    }

    /// Load a proxy struct field
    pub fn load_field(&mut self, object: Reg, field: FieldAccess) -> Reg {
        self.with_dst(|dst| Inst::LoadField { dst, object, field })
    }

    /// Tuple of SQL values
    pub fn make_tuple(&mut self, elems: &[Reg]) -> Reg {
        let elems = elems.to_vec();
        self.with_dst(|dst| Inst::MakeTuple { dst, elems })
    }

    /// Column of a tuple
    pub fn tuple_get(&mut self, tuple: Reg, index: u32) -> Reg {
        self.with_dst(|dst| Inst::TupleGet { dst, tuple, index })
    }

    /// Every column of a tuple of known width
    pub fn unpack_tuple(&mut self, tuple: Reg, width: usize) -> Vec<Reg> {
        (0..width as u32).map(|i| self.tuple_get(tuple, i)).collect()
    }

    /// Length of a list
    pub fn list_len(&mut self, list: Reg) -> Reg {
        self.with_dst(|dst| Inst::ListLen { dst, list })
    }

    /// Element of a list
    pub fn list_get(&mut self, list: Reg, index: Reg) -> Reg {
        self.with_dst(|dst| Inst::ListGet { dst, list, index })
    }

    /// Task closure over a module function
    pub fn make_task(&mut self, function: FuncRef) -> Reg {
        self.with_dst(|dst| Inst::MakeTask { dst, function })
    }

    fn nested(&mut self, emit: impl FnOnce(&mut Self) -> Result<()>) -> Result<Vec<Inst>> {
        self.blocks.push(Vec::new());
        let result = emit(self);
        let block = self
            .blocks
            .pop()
            .ok_or_else(|| Error::internal("builder block stack underflow"))?;
        result.map(|_| block)
    }

    /// `if cond { then }`
    pub fn if_then(&mut self, cond: Reg, then: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let then_body = self.nested(then)?;
        self.emit(Inst::If {
            cond,
            then_body,
            else_body: Vec::new(),
        });
        Ok(())
    }

    /// `if cond { then } else { otherwise }`
    pub fn if_else(
        &mut self,
        cond: Reg,
        then: impl FnOnce(&mut Self) -> Result<()>,
        otherwise: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let then_body = self.nested(then)?;
        let else_body = self.nested(otherwise)?;
        self.emit(Inst::If {
            cond,
            then_body,
            else_body,
        });
        Ok(())
    }

    /// [`FunctionBuilder::if_else`] whose branches both borrow `shared`
    pub fn if_else_with<S: ?Sized>(
        &mut self,
        cond: Reg,
        shared: &mut S,
        then: impl FnOnce(&mut Self, &mut S) -> Result<()>,
        otherwise: impl FnOnce(&mut Self, &mut S) -> Result<()>,
    ) -> Result<()> {
        let then_body = self.nested(|b| then(b, shared))?;
        let else_body = self.nested(|b| otherwise(b, shared))?;
        self.emit(Inst::If {
            cond,
            then_body,
            else_body,
        });
        Ok(())
    }

    /// `for var in (start..end).step_by(step) { body(var) }`
    pub fn range_loop(
        &mut self,
        start: Reg,
        end: Reg,
        step: u32,
        body: impl FnOnce(&mut Self, Reg) -> Result<()>,
    ) -> Result<()> {
        let var = self.reg();
        let body = self.nested(|b| body(b, var))?;
        self.emit(Inst::Loop {
            var,
            start,
            end,
            step,
            body,
        });
        Ok(())
    }

    /// `while header() { body }`
    pub fn while_loop(
        &mut self,
        header: impl FnOnce(&mut Self) -> Result<Reg>,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let mut cond = None;
        let header = self.nested(|b| {
            cond = Some(header(b)?);
            Ok(())
        })?;
        let cond = cond.ok_or_else(|| Error::internal("while header produced no condition"))?;
        let body = self.nested(body)?;
        self.emit(Inst::While { header, cond, body });
        Ok(())
    }

    /// `for item in list { body(item) }`
    pub fn for_each(&mut self, list: Reg, body: impl FnOnce(&mut Self, Reg) -> Result<()>) -> Result<()> {
        let item = self.reg();
        let body = self.nested(|b| body(b, item))?;
        self.emit(Inst::ForEach { item, list, body });
        Ok(())
    }

    /// `body` followed by `finally`, which also runs when `body` fails
    pub fn guard(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<()>,
        finally: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let body = self.nested(body)?;
        let finally = self.nested(finally)?;
        self.emit(Inst::Guard { body, finally });
        Ok(())
    }

    /// Leave the innermost loop
    pub fn brk(&mut self) {
        self.emit(Inst::Break);
    }

    /// Return from the function
    pub fn ret(&mut self, value: Option<Reg>) {
        self.emit(Inst::Return { value });
    }

    /// Close the function
    pub fn finish(mut self) -> Result<IrFunction> {
        if self.blocks.len() != 1 {
            return Err(Error::codegen(format!(
                "{} finished with {} open blocks",
                self.name,
                self.blocks.len() - 1
            )));
        }
        let body = self.blocks.pop().unwrap_or_default();
        Ok(IrFunction {
            name: self.name,
            num_params: self.num_params,
            num_regs: self.next_reg,
            locals: self.locals,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks_close() {
        let mut b = FunctionBuilder::new("f", 1);
        let n = b.param(0).unwrap();
        let zero = b.const_u32(0);
        b.range_loop(zero, n, 1, |b, i| {
            let c = b.int_op(IntOp::Eq, i, zero);
            b.if_then(c, |b| {
                b.brk();
                Ok(())
            })
        })
        .unwrap();
        b.ret(None);
        let f = b.finish().unwrap();
        assert_eq!(f.body().len(), 3);
        assert_eq!(f.instruction_count(), 6);
        assert!(f.num_regs() >= 4);
    }

    #[test]
    fn test_failed_block_is_discarded() {
        let mut b = FunctionBuilder::new("f", 0);
        let c = b.constant(true);
        let err = b.if_then(c, |_| Err(Error::codegen("boom")));
        assert!(err.is_err());
        assert!(b.param(0).is_err());
        let f = b.finish().unwrap();
        assert_eq!(f.body().len(), 1);
    }
}
