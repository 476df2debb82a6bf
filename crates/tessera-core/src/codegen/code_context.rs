//! Module under construction
//!
//! Owns the native function and type registries of one compilation and the
//! functions emitted so far. Task bodies are referenced before they are
//! emitted, so function slots can be reserved and defined later.

use super::ir::{FuncRef, IrFunction, IrModule};
use crate::error::{Error, Result};
use crate::proxy::{FunctionId, FunctionRegistry, MemberFunction, NativeFunction, TypeRegistry};

/// Functions, natives and types of one module
pub struct CodeContext {
    name: String,
    functions: Vec<Option<IrFunction>>,
    natives: FunctionRegistry,
    types: TypeRegistry,
}

impl CodeContext {
    /// Empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            natives: FunctionRegistry::new(),
            types: TypeRegistry::new(),
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type registry
    pub fn types(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    /// Native registry and type registry together
    pub fn registries(&mut self) -> (&mut FunctionRegistry, &mut TypeRegistry) {
        (&mut self.natives, &mut self.types)
    }

    /// Register a free native function
    pub fn register<Args: 'static, F: NativeFunction<Args>>(&mut self, symbol: &str, f: F) -> FunctionId {
        self.natives.register(&mut self.types, symbol, f)
    }

    /// Register a native method
    pub fn register_member<T: 'static, M: 'static, Args: 'static, F: MemberFunction<T, M, Args>>(
        &mut self,
        symbol: &str,
        f: F,
    ) -> FunctionId {
        self.natives.register_member(&mut self.types, symbol, f)
    }

    /// Reserve a function slot to be defined later
    pub fn reserve(&mut self) -> FuncRef {
        let func = FuncRef(self.functions.len() as u32);
        self.functions.push(None);
        func
    }

    /// Define a reserved slot
    pub fn define(&mut self, func: FuncRef, function: IrFunction) -> Result<()> {
        let slot = self
            .functions
            .get_mut(func.0 as usize)
            .ok_or_else(|| Error::codegen(format!("function #{} was never reserved", func.0)))?;
        if slot.is_some() {
            return Err(Error::codegen(format!(
                "function #{} ({}) defined twice",
                func.0,
                function.name()
            )));
        }
        tracing::trace!(function = function.name(), instructions = function.instruction_count(), "defined");
        *slot = Some(function);
        Ok(())
    }

    /// Append a finished function
    pub fn add(&mut self, function: IrFunction) -> Result<FuncRef> {
        let func = self.reserve();
        self.define(func, function)?;
        Ok(func)
    }

    /// Close the module; every reserved slot must be defined
    pub fn finish(self) -> Result<(IrModule, TypeRegistry)> {
        let functions = self
            .functions
            .into_iter()
            .enumerate()
            .map(|(i, f)| f.ok_or_else(|| Error::codegen(format!("function #{i} reserved but never defined"))))
            .collect::<Result<Vec<_>>>()?;
        let module = IrModule {
            name: self.name,
            functions,
            natives: self.natives,
        };
        module.verify()?;
        Ok((module, self.types))
    }
}
