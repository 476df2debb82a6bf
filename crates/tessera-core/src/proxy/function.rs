//! Native function registry
//!
//! Signatures are derived from the Rust type of the registered function:
//! free functions implement [`NativeFunction`], methods taking `&mut self`
//! or `&self` implement [`MemberFunction`] with the receiver pointer as the
//! first parameter. Each symbol is registered once per compilation; later
//! registrations under the same symbol return the existing id.

use super::datum::{Datum, NativeArg, NativeRet, SlotRef};
use super::types::{NativeType, ProxyType, TypeRegistry};
use crate::error::{Error, Result};
use crate::runtime::{LocalState, RuntimeState};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Native call signature
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Parameter types, receiver first for member functions
    pub params: Vec<NativeType>,
    /// Return type
    pub ret: NativeType,
}

impl Signature {
    /// Build a signature
    pub fn new(params: Vec<NativeType>, ret: NativeType) -> Self {
        Self { params, ret }
    }

    /// Number of parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Environment a native function runs in
pub struct CallEnv<'a> {
    state: &'a Arc<RuntimeState>,
    locals: &'a mut LocalState,
}

impl<'a> CallEnv<'a> {
    /// Environment over a runtime state and one activation's locals
    pub fn new(state: &'a Arc<RuntimeState>, locals: &'a mut LocalState) -> Self {
        Self { state, locals }
    }

    /// Shared runtime state
    pub fn state(&self) -> &Arc<RuntimeState> {
        self.state
    }

    /// Exclusive access to a slot-resident object
    pub fn with_mut<T: Any, R>(&mut self, slot: SlotRef, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        match slot {
            SlotRef::State(id) => self.state.with_native_mut(id, f),
            SlotRef::Local(id) => self.locals.with_mut(id, f),
        }
    }

    /// Shared access to a slot-resident or reference-counted object
    pub fn with_ref<T: Any + Send + Sync, R>(
        &mut self,
        receiver: &Datum,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R> {
        match receiver {
            Datum::Ptr(SlotRef::State(id)) => self.state.with_native(*id, f),
            Datum::Ptr(SlotRef::Local(id)) => self.locals.with_mut(*id, |v: &mut T| f(v)),
            Datum::Object(object) => object
                .downcast_ref::<T>()
                .map(f)
                .ok_or_else(|| Error::codegen(format!("receiver is not a {}", std::any::type_name::<T>()))),
            other => Err(Error::codegen(format!("{} datum cannot be a receiver", other.kind()))),
        }
    }
}

fn next_arg<'d>(args: &mut std::slice::Iter<'d, Datum>) -> Result<&'d Datum> {
    args.next()
        .ok_or_else(|| Error::codegen("native call is missing an argument"))
}

/// A free function callable from generated code
pub trait NativeFunction<Args>: Send + Sync + 'static {
    /// Derived signature
    fn signature(types: &mut TypeRegistry) -> Signature;

    /// Call with converted arguments
    fn call_native(&self, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum>;
}

/// Receiver marker for `&mut self` methods
pub struct Mut;

/// Receiver marker for `&self` methods
pub struct Ref;

/// A method callable from generated code; the receiver is the first argument
pub trait MemberFunction<T, M, Args>: Send + Sync + 'static {
    /// Derived signature, receiver pointer first
    fn signature(types: &mut TypeRegistry) -> Signature;

    /// Call with converted arguments
    fn call_member(&self, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum>;
}

macro_rules! impl_native_function {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> NativeFunction<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: NativeRet,
            $($arg: NativeArg,)*
        {
            fn signature(types: &mut TypeRegistry) -> Signature {
                let params = vec![$(<$arg as ProxyType>::native_type(types)),*];
                Signature::new(params, R::ret_type(types))
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call_native(&self, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum> {
                let mut args = args.iter();
                $(let $arg = <$arg as NativeArg>::from_datum(next_arg(&mut args)?)?;)*
                (self)($($arg),*).into_datum()
            }
        }

        impl<F, T, R, $($arg,)*> MemberFunction<T, Mut, ($($arg,)*)> for F
        where
            F: Fn(&mut T, $($arg),*) -> R + Send + Sync + 'static,
            T: ProxyType + Any + Send + Sync,
            R: NativeRet,
            $($arg: NativeArg,)*
        {
            fn signature(types: &mut TypeRegistry) -> Signature {
                let params = vec![T::native_type(types).pointer_to() $(, <$arg as ProxyType>::native_type(types))*];
                Signature::new(params, R::ret_type(types))
            }

            #[allow(non_snake_case, unused_mut)]
            fn call_member(&self, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum> {
                let mut args = args.iter();
                let slot = match next_arg(&mut args)? {
                    Datum::Ptr(slot) => *slot,
                    other => {
                        return Err(Error::codegen(format!(
                            "mutable receiver must be a slot pointer, found {}",
                            other.kind()
                        )));
                    }
                };
                $(let $arg = <$arg as NativeArg>::from_datum(next_arg(&mut args)?)?;)*
                env.with_mut(slot, |receiver: &mut T| (self)(receiver, $($arg),*))?
                    .into_datum()
            }
        }

        impl<F, T, R, $($arg,)*> MemberFunction<T, Ref, ($($arg,)*)> for F
        where
            F: Fn(&T, $($arg),*) -> R + Send + Sync + 'static,
            T: ProxyType + Any + Send + Sync,
            R: NativeRet,
            $($arg: NativeArg,)*
        {
            fn signature(types: &mut TypeRegistry) -> Signature {
                let params = vec![T::native_type(types).pointer_to() $(, <$arg as ProxyType>::native_type(types))*];
                Signature::new(params, R::ret_type(types))
            }

            #[allow(non_snake_case, unused_mut)]
            fn call_member(&self, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum> {
                let mut args = args.iter();
                let receiver = next_arg(&mut args)?;
                $(let $arg = <$arg as NativeArg>::from_datum(next_arg(&mut args)?)?;)*
                env.with_ref(receiver, |receiver: &T| (self)(receiver, $($arg),*))?
                    .into_datum()
            }
        }
    };
}

impl_native_function!();
impl_native_function!(A1);
impl_native_function!(A1, A2);
impl_native_function!(A1, A2, A3);
impl_native_function!(A1, A2, A3, A4);
impl_native_function!(A1, A2, A3, A4, A5);
impl_native_function!(A1, A2, A3, A4, A5, A6);

trait Invoke: Send + Sync {
    fn invoke(&self, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum>;
}

struct Free<F, Args> {
    f: F,
    _args: PhantomData<fn() -> Args>,
}

impl<F: NativeFunction<Args>, Args: 'static> Invoke for Free<F, Args> {
    fn invoke(&self, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum> {
        self.f.call_native(env, args)
    }
}

struct Member<F, T, M, Args> {
    f: F,
    _marker: PhantomData<fn() -> (T, M, Args)>,
}

impl<F, T, M, Args> Invoke for Member<F, T, M, Args>
where
    F: MemberFunction<T, M, Args>,
    T: 'static,
    M: 'static,
    Args: 'static,
{
    fn invoke(&self, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum> {
        self.f.call_member(env, args)
    }
}

/// Handle of a registered function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

/// A registered native function
#[derive(Clone)]
pub struct ProxyFunction {
    symbol: String,
    signature: Signature,
    invoker: Arc<dyn Invoke>,
}

impl ProxyFunction {
    /// Stable symbol name
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Call signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl fmt::Debug for ProxyFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.symbol, self.signature)
    }
}

/// Functions registered for one compilation
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: Vec<ProxyFunction>,
    by_symbol: HashMap<String, FunctionId>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, symbol: &str, signature: Signature, invoker: Arc<dyn Invoke>) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        tracing::trace!(symbol, %signature, "registering native function");
        self.functions.push(ProxyFunction {
            symbol: symbol.to_string(),
            signature,
            invoker,
        });
        self.by_symbol.insert(symbol.to_string(), id);
        id
    }

    /// Register a free function under `symbol`
    pub fn register<Args: 'static, F: NativeFunction<Args>>(
        &mut self,
        types: &mut TypeRegistry,
        symbol: &str,
        f: F,
    ) -> FunctionId {
        if let Some(id) = self.lookup(symbol) {
            return id;
        }
        let signature = F::signature(types);
        self.insert(
            symbol,
            signature,
            Arc::new(Free {
                f,
                _args: PhantomData,
            }),
        )
    }

    /// Register a method under `symbol`
    pub fn register_member<T: 'static, M: 'static, Args: 'static, F: MemberFunction<T, M, Args>>(
        &mut self,
        types: &mut TypeRegistry,
        symbol: &str,
        f: F,
    ) -> FunctionId {
        if let Some(id) = self.lookup(symbol) {
            return id;
        }
        let signature = F::signature(types);
        self.insert(
            symbol,
            signature,
            Arc::new(Member {
                f,
                _marker: PhantomData,
            }),
        )
    }

    /// Id of an already registered symbol
    pub fn lookup(&self, symbol: &str) -> Option<FunctionId> {
        self.by_symbol.get(symbol).copied()
    }

    /// Registered function
    pub fn get(&self, id: FunctionId) -> Result<&ProxyFunction> {
        self.functions
            .get(id.0 as usize)
            .ok_or_else(|| Error::codegen(format!("unknown function id {}", id.0)))
    }

    /// Call a registered function
    pub fn invoke(&self, id: FunctionId, env: &mut CallEnv<'_>, args: &[Datum]) -> Result<Datum> {
        let function = self.get(id)?;
        if args.len() != function.signature.arity() {
            return Err(Error::codegen(format!(
                "{} expects {} arguments, got {}",
                function.symbol,
                function.signature.arity(),
                args.len()
            )));
        }
        function.invoker.invoke(env, args)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// No functions registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered functions in id order
    pub fn iter(&self) -> impl Iterator<Item = (FunctionId, &ProxyFunction)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i as u32), f))
    }
}
