//! Structured register IR
//!
//! A compiled query is a module of functions over an unbounded register
//! file. Control flow is structured (if, range loop, while, for-each,
//! guarded finally-blocks), so a function body is a tree of instruction
//! blocks and never contains jumps.

use crate::error::{Error, Result};
use crate::proxy::{
    Datum, FunctionId, FunctionRegistry, LocalId, ProxyStruct, ProxyType, StateId, TypeRegistry,
};
use crate::runtime::LocalSlot;
use crate::types::{ArithOp, CompareOp, TypeId};
use std::any::Any;
use std::fmt;

/// Virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u32);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Function of the same module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef(pub u32);

/// Machine-integer operation on counters, offsets and ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// smaller operand
    Min,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl IntOp {
    /// Mnemonic
    pub fn mnemonic(self) -> &'static str {
        match self {
            IntOp::Add => "add",
            IntOp::Sub => "sub",
            IntOp::Mul => "mul",
            IntOp::Min => "min",
            IntOp::Lt => "lt",
            IntOp::Le => "le",
            IntOp::Gt => "gt",
            IntOp::Ge => "ge",
            IntOp::Eq => "eq",
            IntOp::Ne => "ne",
        }
    }

    /// Whether the result is a machine boolean
    pub fn is_predicate(self) -> bool {
        !matches!(self, IntOp::Add | IntOp::Sub | IntOp::Mul | IntOp::Min)
    }
}

/// Three-valued connective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    /// `AND`
    And,
    /// `OR`
    Or,
}

type FieldLoader = fn(&Datum, usize) -> Result<Datum>;

fn load_field_of<T: ProxyStruct + Any + Send + Sync>(object: &Datum, index: usize) -> Result<Datum> {
    match object {
        Datum::Object(object) => object
            .downcast_ref::<T>()
            .ok_or_else(|| Error::codegen(format!("object is not a {}", std::any::type_name::<T>())))?
            .load_field(index),
        other => Err(Error::codegen(format!("cannot load a field of a {} datum", other.kind()))),
    }
}

/// Resolved field of a proxy struct
#[derive(Clone)]
pub struct FieldAccess {
    type_name: String,
    field: &'static str,
    index: usize,
    loader: FieldLoader,
}

impl FieldAccess {
    /// Field `field` of `T`, checked against the registered descriptor
    pub fn of<T: ProxyStruct + Any + Send + Sync>(
        types: &mut TypeRegistry,
        field: &str,
    ) -> Result<Self> {
        let ty = <T as ProxyType>::native_type(types);
        let desc = ty
            .descriptor()
            .ok_or_else(|| Error::codegen("field access on a type without a descriptor"))?;
        let index = T::field_index(field)
            .ok_or_else(|| Error::codegen(format!("{} has no field '{field}'", desc.name())))?;
        if desc.field(field).map(|(i, _)| i) != Some(index) {
            return Err(Error::internal(format!(
                "descriptor of {} disagrees with its native field order",
                desc.name()
            )));
        }
        Ok(Self {
            type_name: desc.name().to_string(),
            field: T::FIELDS[index],
            index,
            loader: load_field_of::<T>,
        })
    }

    /// Load the field from an object datum
    pub fn load(&self, object: &Datum) -> Result<Datum> {
        (self.loader)(object, self.index)
    }
}

impl fmt::Debug for FieldAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field)
    }
}

/// One IR instruction
#[derive(Debug, Clone)]
pub enum Inst {
    /// `dst = value`
    Const {
        /// Destination
        dst: Reg,
        /// Constant
        value: Datum,
    },
    /// `dst = src`
    Move {
        /// Destination
        dst: Reg,
        /// Source
        src: Reg,
    },
    /// Read a datum slot of the runtime state
    LoadState {
        /// Destination
        dst: Reg,
        /// Slot
        slot: StateId,
    },
    /// Write a datum slot of the runtime state
    StoreState {
        /// Slot
        slot: StateId,
        /// Source
        src: Reg,
    },
    /// Pointer to a native state slot
    StateAddr {
        /// Destination
        dst: Reg,
        /// Slot
        slot: StateId,
    },
    /// Pointer to a local of the running activation
    LocalAddr {
        /// Destination
        dst: Reg,
        /// Local
        slot: LocalId,
    },
    /// The runtime state itself as an object
    StatePtr {
        /// Destination
        dst: Reg,
    },
    /// SQL arithmetic
    Arith {
        /// Destination
        dst: Reg,
        /// Operator
        op: ArithOp,
        /// Left operand
        lhs: Reg,
        /// Right operand
        rhs: Reg,
    },
    /// SQL unary minus
    Negate {
        /// Destination
        dst: Reg,
        /// Operand
        src: Reg,
    },
    /// SQL comparison producing a BOOLEAN value
    Compare {
        /// Destination
        dst: Reg,
        /// Operator
        op: CompareOp,
        /// Left operand
        lhs: Reg,
        /// Right operand
        rhs: Reg,
    },
    /// SQL AND / OR
    Logic {
        /// Destination
        dst: Reg,
        /// Connective
        op: LogicOp,
        /// Left operand
        lhs: Reg,
        /// Right operand
        rhs: Reg,
    },
    /// SQL NOT
    Not {
        /// Destination
        dst: Reg,
        /// Operand
        src: Reg,
    },
    /// `IS [NOT] NULL`
    IsNull {
        /// Destination
        dst: Reg,
        /// Operand
        src: Reg,
        /// `IS NOT NULL`
        negated: bool,
    },
    /// SQL cast
    Cast {
        /// Destination
        dst: Reg,
        /// Operand
        src: Reg,
        /// Target type
        to: TypeId,
    },
    /// Filter outcome of a SQL boolean as a machine boolean
    Truthy {
        /// Destination
        dst: Reg,
        /// Operand
        src: Reg,
    },
    /// Machine-integer arithmetic or comparison
    IntBinary {
        /// Destination
        dst: Reg,
        /// Operation
        op: IntOp,
        /// Left operand
        lhs: Reg,
        /// Right operand
        rhs: Reg,
    },
    /// Call a registered native function
    Call {
        /// Destination, if the result is used
        dst: Option<Reg>,
        /// Callee
        function: FunctionId,
        /// Arguments, receiver first for member functions
        args: Vec<Reg>,
    },
    /// Load a field of a proxy struct object
    LoadField {
        /// Destination
        dst: Reg,
        /// Struct object
        object: Reg,
        /// Field
        field: FieldAccess,
    },
    /// Materialize SQL values into a tuple
    MakeTuple {
        /// Destination
        dst: Reg,
        /// Elements
        elems: Vec<Reg>,
    },
    /// Column of a tuple
    TupleGet {
        /// Destination
        dst: Reg,
        /// Tuple
        tuple: Reg,
        /// Column
        index: u32,
    },
    /// Length of a list as `u32`
    ListLen {
        /// Destination
        dst: Reg,
        /// List
        list: Reg,
    },
    /// Element of a list
    ListGet {
        /// Destination
        dst: Reg,
        /// List
        list: Reg,
        /// Machine-integer index
        index: Reg,
    },
    /// Closure running a module function as a thread pool task
    MakeTask {
        /// Destination
        dst: Reg,
        /// Task body; takes the task info as its only parameter
        function: FuncRef,
    },
    /// Conditional
    If {
        /// Machine or SQL boolean
        cond: Reg,
        /// Taken branch
        then_body: Vec<Inst>,
        /// Other branch
        else_body: Vec<Inst>,
    },
    /// `for var in (start..end).step_by(step)`
    Loop {
        /// Induction variable
        var: Reg,
        /// First value
        start: Reg,
        /// Exclusive bound
        end: Reg,
        /// Increment
        step: u32,
        /// Body
        body: Vec<Inst>,
    },
    /// `loop { header; if !cond { break } body }`
    While {
        /// Recomputes `cond`
        header: Vec<Inst>,
        /// Loop condition
        cond: Reg,
        /// Body
        body: Vec<Inst>,
    },
    /// Iterate a list
    ForEach {
        /// Element register
        item: Reg,
        /// List
        list: Reg,
        /// Body
        body: Vec<Inst>,
    },
    /// Run `finally` after `body` whether or not it fails
    Guard {
        /// Protected block
        body: Vec<Inst>,
        /// Cleanup block
        finally: Vec<Inst>,
    },
    /// Leave the innermost loop
    Break,
    /// Next iteration of the innermost loop
    Continue,
    /// Leave the function
    Return {
        /// Returned register
        value: Option<Reg>,
    },
}

/// One IR function
#[derive(Clone)]
pub struct IrFunction {
    pub(crate) name: String,
    pub(crate) num_params: u32,
    pub(crate) num_regs: u32,
    pub(crate) locals: Vec<LocalSlot>,
    pub(crate) body: Vec<Inst>,
}

impl IrFunction {
    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parameters (registers `%0..`)
    pub fn num_params(&self) -> u32 {
        self.num_params
    }

    /// Size of the register file
    pub fn num_regs(&self) -> u32 {
        self.num_regs
    }

    /// Top-level instructions
    pub fn body(&self) -> &[Inst] {
        &self.body
    }

    /// Total instruction count, nested blocks included
    pub fn instruction_count(&self) -> usize {
        fn count(block: &[Inst]) -> usize {
            block
                .iter()
                .map(|inst| {
                    1 + match inst {
                        Inst::If {
                            then_body,
                            else_body,
                            ..
                        } => count(then_body) + count(else_body),
                        Inst::Loop { body, .. } | Inst::ForEach { body, .. } => count(body),
                        Inst::While { header, body, .. } => count(header) + count(body),
                        Inst::Guard { body, finally } => count(body) + count(finally),
                        _ => 0,
                    }
                })
                .sum()
        }
        count(&self.body)
    }
}

impl fmt::Debug for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrFunction")
            .field("name", &self.name)
            .field("num_params", &self.num_params)
            .field("num_regs", &self.num_regs)
            .field("instructions", &self.instruction_count())
            .finish()
    }
}

/// Finished compilation unit: functions plus the natives they call
pub struct IrModule {
    pub(crate) name: String,
    pub(crate) functions: Vec<IrFunction>,
    pub(crate) natives: FunctionRegistry,
}

impl IrModule {
    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Function by reference
    pub fn function(&self, func: FuncRef) -> Result<&IrFunction> {
        self.functions
            .get(func.0 as usize)
            .ok_or_else(|| Error::codegen(format!("module {} has no function #{}", self.name, func.0)))
    }

    /// All functions
    pub fn functions(&self) -> &[IrFunction] {
        &self.functions
    }

    /// Native functions the module calls
    pub fn natives(&self) -> &FunctionRegistry {
        &self.natives
    }

    /// Check register bounds, callee arities and function references
    pub fn verify(&self) -> Result<()> {
        for function in &self.functions {
            let mut verifier = Verifier {
                module: self,
                function,
                loop_depth: 0,
            };
            verifier.block(&function.body)?;
        }
        Ok(())
    }
}

impl fmt::Debug for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrModule")
            .field("name", &self.name)
            .field("functions", &self.functions)
            .field("natives", &self.natives.len())
            .finish()
    }
}

struct Verifier<'a> {
    module: &'a IrModule,
    function: &'a IrFunction,
    loop_depth: usize,
}

impl Verifier<'_> {
    fn fail(&self, msg: impl fmt::Display) -> Error {
        Error::codegen(format!("{}: {msg}", self.function.name))
    }

    fn reg(&self, reg: Reg) -> Result<()> {
        if reg.0 >= self.function.num_regs {
            return Err(self.fail(format_args!("register {reg} out of range")));
        }
        Ok(())
    }

    fn regs(&self, regs: &[Reg]) -> Result<()> {
        regs.iter().try_for_each(|r| self.reg(*r))
    }

    fn loop_body(&mut self, body: &[Inst]) -> Result<()> {
        self.loop_depth += 1;
        let result = self.block(body);
        self.loop_depth -= 1;
        result
    }

    fn block(&mut self, block: &[Inst]) -> Result<()> {
        for inst in block {
            match inst {
                Inst::Const { dst, .. }
                | Inst::LoadState { dst, .. }
                | Inst::StateAddr { dst, .. }
                | Inst::StatePtr { dst } => self.reg(*dst)?,
                Inst::LocalAddr { dst, slot } => {
                    self.reg(*dst)?;
                    if slot.0 as usize >= self.function.locals.len() {
                        return Err(self.fail(format_args!("local {} out of range", slot.0)));
                    }
                }
                Inst::StoreState { src, .. } => self.reg(*src)?,
                Inst::Move { dst, src }
                | Inst::Negate { dst, src }
                | Inst::Not { dst, src }
                | Inst::IsNull { dst, src, .. }
                | Inst::Cast { dst, src, .. }
                | Inst::Truthy { dst, src } => self.regs(&[*dst, *src])?,
                Inst::Arith { dst, lhs, rhs, .. }
                | Inst::Compare { dst, lhs, rhs, .. }
                | Inst::Logic { dst, lhs, rhs, .. }
                | Inst::IntBinary { dst, lhs, rhs, .. } => self.regs(&[*dst, *lhs, *rhs])?,
                Inst::Call {
                    dst,
                    function,
                    args,
                } => {
                    if let Some(dst) = dst {
                        self.reg(*dst)?;
                    }
                    self.regs(args)?;
                    let native = self.module.natives.get(*function)?;
                    if native.signature().arity() != args.len() {
                        return Err(self.fail(format_args!(
                            "{} called with {} arguments",
                            native.symbol(),
                            args.len()
                        )));
                    }
                }
                Inst::LoadField { dst, object, .. } => self.regs(&[*dst, *object])?,
                Inst::MakeTuple { dst, elems } => {
                    self.reg(*dst)?;
                    self.regs(elems)?;
                }
                Inst::TupleGet { dst, tuple, .. } => self.regs(&[*dst, *tuple])?,
                Inst::ListLen { dst, list } => self.regs(&[*dst, *list])?,
                Inst::ListGet { dst, list, index } => self.regs(&[*dst, *list, *index])?,
                Inst::MakeTask { dst, function } => {
                    self.reg(*dst)?;
                    let task = self.module.function(*function)?;
                    if task.num_params != 1 {
                        return Err(self.fail(format_args!(
                            "task body {} must take exactly the task info",
                            task.name
                        )));
                    }
                }
                Inst::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.reg(*cond)?;
                    self.block(then_body)?;
                    self.block(else_body)?;
                }
                Inst::Loop {
                    var,
                    start,
                    end,
                    step,
                    body,
                } => {
                    self.regs(&[*var, *start, *end])?;
                    if *step == 0 {
                        return Err(self.fail("loop step must be positive"));
                    }
                    self.loop_body(body)?;
                }
                Inst::While { header, cond, body } => {
                    self.reg(*cond)?;
                    self.block(header)?;
                    self.loop_body(body)?;
                }
                Inst::ForEach { item, list, body } => {
                    self.regs(&[*item, *list])?;
                    self.loop_body(body)?;
                }
                Inst::Guard { body, finally } => {
                    self.block(body)?;
                    self.block(finally)?;
                }
                Inst::Break | Inst::Continue => {
                    if self.loop_depth == 0 {
                        return Err(self.fail("break/continue outside of a loop"));
                    }
                }
                Inst::Return { value } => {
                    if let Some(value) = value {
                        self.reg(*value)?;
                    }
                }
            }
        }
        Ok(())
    }
}

struct Printer<'a> {
    natives: &'a FunctionRegistry,
    functions: &'a [IrFunction],
}

impl Printer<'_> {
    fn regs(regs: &[Reg]) -> String {
        regs.iter().map(Reg::to_string).collect::<Vec<_>>().join(", ")
    }

    fn block(&self, f: &mut fmt::Formatter<'_>, block: &[Inst], depth: usize) -> fmt::Result {
        for inst in block {
            self.inst(f, inst, depth)?;
        }
        Ok(())
    }

    fn inst(&self, f: &mut fmt::Formatter<'_>, inst: &Inst, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match inst {
            Inst::Const { dst, value } => writeln!(f, "{pad}{dst} = const {value}"),
            Inst::Move { dst, src } => writeln!(f, "{pad}{dst} = {src}"),
            Inst::LoadState { dst, slot } => writeln!(f, "{pad}{dst} = load state[{}]", slot.0),
            Inst::StoreState { slot, src } => writeln!(f, "{pad}store state[{}], {src}", slot.0),
            Inst::StateAddr { dst, slot } => writeln!(f, "{pad}{dst} = &state[{}]", slot.0),
            Inst::LocalAddr { dst, slot } => writeln!(f, "{pad}{dst} = &local[{}]", slot.0),
            Inst::StatePtr { dst } => writeln!(f, "{pad}{dst} = runtime_state"),
            Inst::Arith { dst, op, lhs, rhs } => writeln!(f, "{pad}{dst} = {lhs} {op} {rhs}"),
            Inst::Negate { dst, src } => writeln!(f, "{pad}{dst} = -{src}"),
            Inst::Compare { dst, op, lhs, rhs } => {
                writeln!(f, "{pad}{dst} = {lhs} {} {rhs}", op.symbol())
            }
            Inst::Logic { dst, op, lhs, rhs } => {
                let op = match op {
                    LogicOp::And => "and",
                    LogicOp::Or => "or",
                };
                writeln!(f, "{pad}{dst} = {lhs} {op} {rhs}")
            }
            Inst::Not { dst, src } => writeln!(f, "{pad}{dst} = not {src}"),
            Inst::IsNull { dst, src, negated } => {
                let op = if *negated { "is_not_null" } else { "is_null" };
                writeln!(f, "{pad}{dst} = {op} {src}")
            }
            Inst::Cast { dst, src, to } => writeln!(f, "{pad}{dst} = cast {src} as {to}"),
            Inst::Truthy { dst, src } => writeln!(f, "{pad}{dst} = truthy {src}"),
            Inst::IntBinary { dst, op, lhs, rhs } => {
                writeln!(f, "{pad}{dst} = {} {lhs}, {rhs}", op.mnemonic())
            }
            Inst::Call {
                dst,
                function,
                args,
            } => {
                let callee = self
                    .natives
                    .get(*function)
                    .map_or_else(|_| format!("#{}", function.0), |p| p.symbol().to_string());
                match dst {
                    Some(dst) => writeln!(f, "{pad}{dst} = call {callee}({})", Self::regs(args)),
                    None => writeln!(f, "{pad}call {callee}({})", Self::regs(args)),
                }
            }
            Inst::LoadField { dst, object, field } => {
                writeln!(f, "{pad}{dst} = load {object}->{field:?}")
            }
            Inst::MakeTuple { dst, elems } => {
                writeln!(f, "{pad}{dst} = tuple({})", Self::regs(elems))
            }
            Inst::TupleGet { dst, tuple, index } => writeln!(f, "{pad}{dst} = {tuple}[{index}]"),
            Inst::ListLen { dst, list } => writeln!(f, "{pad}{dst} = len {list}"),
            Inst::ListGet { dst, list, index } => writeln!(f, "{pad}{dst} = {list}[{index}]"),
            Inst::MakeTask { dst, function } => {
                let name = self
                    .functions
                    .get(function.0 as usize)
                    .map_or("?", |func| func.name.as_str());
                writeln!(f, "{pad}{dst} = task @{name}")
            }
            Inst::If {
                cond,
                then_body,
                else_body,
            } => {
                writeln!(f, "{pad}if {cond} {{")?;
                self.block(f, then_body, depth + 1)?;
                if !else_body.is_empty() {
                    writeln!(f, "{pad}}} else {{")?;
                    self.block(f, else_body, depth + 1)?;
                }
                writeln!(f, "{pad}}}")
            }
            Inst::Loop {
                var,
                start,
                end,
                step,
                body,
            } => {
                writeln!(f, "{pad}for {var} in {start}..{end} step {step} {{")?;
                self.block(f, body, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            Inst::While { header, cond, body } => {
                writeln!(f, "{pad}while {{")?;
                self.block(f, header, depth + 1)?;
                writeln!(f, "{pad}}} {cond} {{")?;
                self.block(f, body, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            Inst::ForEach { item, list, body } => {
                writeln!(f, "{pad}for {item} in {list} {{")?;
                self.block(f, body, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            Inst::Guard { body, finally } => {
                writeln!(f, "{pad}try {{")?;
                self.block(f, body, depth + 1)?;
                writeln!(f, "{pad}}} finally {{")?;
                self.block(f, finally, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            Inst::Break => writeln!(f, "{pad}break"),
            Inst::Continue => writeln!(f, "{pad}continue"),
            Inst::Return { value: Some(v) } => writeln!(f, "{pad}ret {v}"),
            Inst::Return { value: None } => writeln!(f, "{pad}ret"),
        }
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        let printer = Printer {
            natives: &self.natives,
            functions: &self.functions,
        };
        for function in &self.functions {
            let params = (0..function.num_params)
                .map(|i| Reg(i).to_string())
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "\nfn @{}({params}) {{", function.name)?;
            for (i, local) in function.locals.iter().enumerate() {
                writeln!(f, "  ; local[{i}] {}: {}", local.name(), local.native_type())?;
            }
            printer.block(f, &function.body, 1)?;
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}
