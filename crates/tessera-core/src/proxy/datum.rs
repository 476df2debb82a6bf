//! Runtime values flowing through generated code
//!
//! Registers of the generated program hold [`Datum`]s. Native functions see
//! them through the [`NativeArg`] / [`NativeRet`] conversions, which are also
//! what the function registry uses to derive call signatures.

use super::types::{NativeType, ProxyType, TypeRegistry};
use crate::error::{Error, Result};
use crate::runtime::{RuntimeState, TaskInfo};
use crate::types::{TypeId, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Index of a slot in the per-query [`RuntimeState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// Index of a per-activation local slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

/// Pointer to a native object living in a state or local slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRef {
    /// Shared runtime-state slot
    State(StateId),
    /// Slot private to one function activation
    Local(LocalId),
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRef::State(id) => write!(f, "&state[{}]", id.0),
            SlotRef::Local(id) => write!(f, "&local[{}]", id.0),
        }
    }
}

/// Body of a unit of work submitted to the executor thread pool
#[derive(Clone)]
pub struct TaskFunction {
    name: Arc<str>,
    body: Arc<dyn Fn(Arc<RuntimeState>, Arc<TaskInfo>) -> Result<()> + Send + Sync>,
}

impl TaskFunction {
    /// Wrap a closure
    pub fn new(
        name: impl Into<Arc<str>>,
        body: impl Fn(Arc<RuntimeState>, Arc<TaskInfo>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the task
    pub fn run(&self, state: Arc<RuntimeState>, task: Arc<TaskInfo>) -> Result<()> {
        (self.body)(state, task)
    }
}

impl fmt::Debug for TaskFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskFunction({})", self.name)
    }
}

/// A materialized row of SQL values
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple(pub Arc<[Value]>);

impl Tuple {
    /// Build from values
    pub fn new(values: Vec<Value>) -> Self {
        Self(values.into())
    }

    /// Column values
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Copy out
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.to_vec()
    }
}

/// Content of one register
#[derive(Clone, Default)]
pub enum Datum {
    /// Unset register or void return
    #[default]
    Void,
    /// Machine boolean
    Bool(bool),
    /// Machine `i32`
    I32(i32),
    /// Machine `u32` (tile group ids, tuple offsets, counts)
    U32(u32),
    /// Machine `i64`
    I64(i64),
    /// Machine `u64`
    U64(u64),
    /// Machine `f64`
    F64(f64),
    /// SQL value
    Value(Value),
    /// Materialized row
    Tuple(Tuple),
    /// List of data
    List(Arc<[Datum]>),
    /// Shared native object
    Object(Arc<dyn Any + Send + Sync>),
    /// Pointer to a slot-resident native object
    Ptr(SlotRef),
    /// Task body
    Task(TaskFunction),
}

impl Datum {
    /// Wrap a shared object
    pub fn object<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Datum::Object(object)
    }

    /// Variant name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Void => "void",
            Datum::Bool(_) => "bool",
            Datum::I32(_) => "i32",
            Datum::U32(_) => "u32",
            Datum::I64(_) => "i64",
            Datum::U64(_) => "u64",
            Datum::F64(_) => "f64",
            Datum::Value(_) => "value",
            Datum::Tuple(_) => "tuple",
            Datum::List(_) => "list",
            Datum::Object(_) => "object",
            Datum::Ptr(_) => "ptr",
            Datum::Task(_) => "task",
        }
    }

    /// Machine integer widened to `i128`
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Datum::I32(v) => Some(*v as i128),
            Datum::U32(v) => Some(*v as i128),
            Datum::I64(v) => Some(*v as i128),
            Datum::U64(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// SQL value, if this register holds one
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Datum::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Machine boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::codegen(format!("expected {expected} datum, found {}", self.kind()))
    }
}

impl fmt::Debug for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Void => f.write_str("void"),
            Datum::Bool(v) => write!(f, "{v}"),
            Datum::I32(v) => write!(f, "{v}i32"),
            Datum::U32(v) => write!(f, "{v}u32"),
            Datum::I64(v) => write!(f, "{v}i64"),
            Datum::U64(v) => write!(f, "{v}u64"),
            Datum::F64(v) => write!(f, "{v}f64"),
            Datum::Value(v) => write!(f, "{v:?}"),
            Datum::Tuple(t) => write!(f, "{:?}", t.values()),
            Datum::List(items) => f.debug_list().entries(items.iter()).finish(),
            Datum::Object(_) => f.write_str("<object>"),
            Datum::Ptr(slot) => write!(f, "{slot}"),
            Datum::Task(task) => write!(f, "{task:?}"),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Value(Value::Varchar(v)) => write!(f, "'{}'", v.to_text()),
            Datum::Value(v) => write!(f, "{v}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl From<Value> for Datum {
    fn from(v: Value) -> Self {
        Datum::Value(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<u32> for Datum {
    fn from(v: u32) -> Self {
        Datum::U32(v)
    }
}

impl From<u64> for Datum {
    fn from(v: u64) -> Self {
        Datum::U64(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::I64(v)
    }
}

/// Conversion from a register into a native argument
pub trait NativeArg: ProxyType + Sized {
    /// Extract the argument
    fn from_datum(datum: &Datum) -> Result<Self>;
}

/// Conversion from a native return value into a register
pub trait NativeRet {
    /// Descriptor of the returned value
    fn ret_type(types: &mut TypeRegistry) -> NativeType;

    /// Store the result, propagating native errors
    fn into_datum(self) -> Result<Datum>;
}

macro_rules! scalar_datum {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl NativeArg for $ty {
                fn from_datum(datum: &Datum) -> Result<Self> {
                    match datum {
                        Datum::$variant(v) => Ok(*v),
                        other => Err(other.mismatch(stringify!($ty))),
                    }
                }
            }

            impl NativeRet for $ty {
                fn ret_type(types: &mut TypeRegistry) -> NativeType {
                    <$ty as ProxyType>::native_type(types)
                }

                fn into_datum(self) -> Result<Datum> {
                    Ok(Datum::$variant(self))
                }
            }
        )*
    };
}

scalar_datum! {
    bool => Bool,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
}

impl NativeArg for Value {
    fn from_datum(datum: &Datum) -> Result<Self> {
        match datum {
            Datum::Value(v) => Ok(v.clone()),
            other => Err(other.mismatch("value")),
        }
    }
}

impl NativeRet for Value {
    fn ret_type(_types: &mut TypeRegistry) -> NativeType {
        NativeType::SqlValue
    }

    fn into_datum(self) -> Result<Datum> {
        Ok(Datum::Value(self))
    }
}

impl ProxyType for Tuple {
    fn native_type(_types: &mut TypeRegistry) -> NativeType {
        NativeType::SqlValue.pointer_to()
    }
}

impl NativeArg for Tuple {
    fn from_datum(datum: &Datum) -> Result<Self> {
        match datum {
            Datum::Tuple(t) => Ok(t.clone()),
            other => Err(other.mismatch("tuple")),
        }
    }
}

impl NativeRet for Tuple {
    fn ret_type(types: &mut TypeRegistry) -> NativeType {
        Tuple::native_type(types)
    }

    fn into_datum(self) -> Result<Datum> {
        Ok(Datum::Tuple(self))
    }
}

impl ProxyType for TaskFunction {
    fn native_type(types: &mut TypeRegistry) -> NativeType {
        let params = vec![
            RuntimeState::native_type(types).pointer_to(),
            TaskInfo::native_type(types).pointer_to(),
        ];
        NativeType::Function(Arc::new(super::Signature::new(params, NativeType::Void)))
    }
}

impl NativeArg for TaskFunction {
    fn from_datum(datum: &Datum) -> Result<Self> {
        match datum {
            Datum::Task(task) => Ok(task.clone()),
            other => Err(other.mismatch("task")),
        }
    }
}

impl<T: ProxyType + Any + Send + Sync> NativeArg for Arc<T> {
    fn from_datum(datum: &Datum) -> Result<Self> {
        match datum {
            Datum::Object(object) => object.clone().downcast::<T>().map_err(|_| {
                Error::codegen(format!(
                    "object is not a {}",
                    std::any::type_name::<T>()
                ))
            }),
            other => Err(other.mismatch("object")),
        }
    }
}

impl<T: ProxyType + Any + Send + Sync> NativeRet for Arc<T> {
    fn ret_type(types: &mut TypeRegistry) -> NativeType {
        T::native_type(types).pointer_to()
    }

    fn into_datum(self) -> Result<Datum> {
        Ok(Datum::Object(self))
    }
}

impl<T: NativeArg> NativeArg for Vec<T> {
    fn from_datum(datum: &Datum) -> Result<Self> {
        match datum {
            Datum::List(items) => items.iter().map(T::from_datum).collect(),
            other => Err(other.mismatch("list")),
        }
    }
}

impl<T: NativeRet> NativeRet for Vec<T> {
    fn ret_type(types: &mut TypeRegistry) -> NativeType {
        T::ret_type(types).pointer_to()
    }

    fn into_datum(self) -> Result<Datum> {
        let items = self
            .into_iter()
            .map(NativeRet::into_datum)
            .collect::<Result<Vec<_>>>()?;
        Ok(Datum::List(items.into()))
    }
}

impl NativeRet for () {
    fn ret_type(_types: &mut TypeRegistry) -> NativeType {
        NativeType::Void
    }

    fn into_datum(self) -> Result<Datum> {
        Ok(Datum::Void)
    }
}

impl<T: NativeRet> NativeRet for Result<T> {
    fn ret_type(types: &mut TypeRegistry) -> NativeType {
        T::ret_type(types)
    }

    fn into_datum(self) -> Result<Datum> {
        self?.into_datum()
    }
}

/// SQL value held by a register, or a typed error
pub fn expect_value(datum: &Datum) -> Result<&Value> {
    datum
        .as_value()
        .ok_or_else(|| Error::type_mismatch("SQL value", datum.kind()))
}

/// SQL boolean held by a register, interpreted as a filter outcome
///
/// Only a non-null `true` passes.
pub fn truthy(datum: &Datum) -> Result<bool> {
    match datum {
        Datum::Bool(b) => Ok(*b),
        Datum::Value(Value::Boolean(b)) => Ok(*b),
        Datum::Value(Value::Null(TypeId::Boolean)) => Ok(false),
        Datum::Value(v) => Err(Error::type_mismatch("BOOLEAN", v.type_id().name())),
        other => Err(other.mismatch("boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl ProxyType for Probe {
        fn native_type(types: &mut TypeRegistry) -> NativeType {
            types.opaque_type::<Probe>("Probe")
        }
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(u32::from_datum(&Datum::U32(7)).unwrap(), 7);
        assert!(u32::from_datum(&Datum::U64(7)).is_err());
        assert!(matches!(true.into_datum().unwrap(), Datum::Bool(true)));
    }

    #[test]
    fn test_object_downcast() {
        let datum = Datum::object(Arc::new(Probe));
        assert!(<Arc<Probe>>::from_datum(&datum).is_ok());
        let wrong = Datum::object(Arc::new(5u32));
        assert!(matches!(
            <Arc<Probe>>::from_datum(&wrong),
            Err(Error::Codegen(_))
        ));
    }

    #[test]
    fn test_result_return_propagates() {
        let failed: Result<Value> = Err(Error::DivideByZero);
        assert_eq!(failed.into_datum().unwrap_err(), Error::DivideByZero);
    }

    #[test]
    fn test_truthy_treats_null_as_false() {
        assert!(!truthy(&Datum::Value(Value::null(TypeId::Boolean))).unwrap());
        assert!(truthy(&Datum::Value(Value::boolean(true))).unwrap());
        assert!(truthy(&Datum::Value(Value::integer(1))).is_err());
    }
}
