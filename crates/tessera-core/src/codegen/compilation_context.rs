//! Shared state of one query compilation
//!
//! Translators reach the module under construction, the runtime state
//! layout and the catalog through a [`CompilationContext`]. Handles every
//! query needs (executor context, result consumer, bound tables) live in
//! datum slots of the runtime state; generated code reloads them where it
//! needs them instead of threading registers across functions.

use super::builder::FunctionBuilder;
use super::code_context::CodeContext;
use super::ir::Reg;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::executor::ExecutorContext;
use crate::proxy::{LocalId, NativeType, ProxyType, StateId};
use crate::runtime::{ConsumerHandle, LocalSlot, RuntimeStateBuilder};
use crate::storage::{DataTable, Oid, StorageManager};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Everything translators share while a plan is compiled
pub struct CompilationContext {
    code: CodeContext,
    state: RuntimeStateBuilder,
    storage: Arc<StorageManager>,
    config: EngineConfig,
    ctx_slot: StateId,
    consumer_slot: StateId,
    tables: BTreeMap<Oid, StateId>,
    names: HashMap<String, u32>,
}

impl CompilationContext {
    /// Fresh context for a query named `name`
    pub fn new(name: &str, storage: Arc<StorageManager>, config: EngineConfig) -> Self {
        let mut code = CodeContext::new(name);
        let mut state = RuntimeStateBuilder::new();
        let ctx_type = ExecutorContext::native_type(code.types()).pointer_to();
        let ctx_slot = state.register_datum("executor_context", ctx_type);
        let consumer_type = ConsumerHandle::native_type(code.types()).pointer_to();
        let consumer_slot = state.register_datum("consumer", consumer_type);
        Self {
            code,
            state,
            storage,
            config,
            ctx_slot,
            consumer_slot,
            tables: BTreeMap::new(),
            names: HashMap::new(),
        }
    }

    /// Module under construction
    pub fn code(&mut self) -> &mut CodeContext {
        &mut self.code
    }

    /// Engine configuration the query is compiled for
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Catalog
    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// Slot holding the executor context
    pub fn ctx_slot(&self) -> StateId {
        self.ctx_slot
    }

    /// Slot holding the result consumer
    pub fn consumer_slot(&self) -> StateId {
        self.consumer_slot
    }

    /// Name unique within this compilation
    pub fn unique_name(&mut self, prefix: &str) -> String {
        let counter = self.names.entry(prefix.to_string()).or_insert(0);
        let name = if *counter == 0 {
            prefix.to_string()
        } else {
            format!("{prefix}_{counter}")
        };
        *counter += 1;
        name
    }

    /// Reserve a state slot holding a default-constructed `T`
    pub fn register_state<T: ProxyType + Default + Any + Send + Sync>(&mut self, name: &str) -> StateId {
        let name = self.unique_name(name);
        self.state.register::<T>(self.code.types(), &name)
    }

    /// Reserve a datum state slot
    pub fn register_datum(&mut self, name: &str, ty: NativeType) -> StateId {
        let name = self.unique_name(name);
        self.state.register_datum(&name, ty)
    }

    /// Add a local of type `T` to the function being built
    pub fn local<T: ProxyType + Default + Any + Send + Sync>(&mut self, b: &mut FunctionBuilder, name: &str) -> LocalId {
        b.add_local(LocalSlot::of::<T>(self.code.types(), name))
    }

    /// Catalog entry of a table
    pub fn table(&self, oid: Oid) -> Result<Arc<DataTable>> {
        self.storage.table(oid)
    }

    /// Slot the table handle is bound to during `init`
    pub fn table_slot(&mut self, oid: Oid) -> Result<StateId> {
        if let Some(slot) = self.tables.get(&oid) {
            return Ok(*slot);
        }
        let table = self.table(oid)?;
        let ty = DataTable::native_type(self.code.types()).pointer_to();
        let slot = self.register_datum(&format!("table_{}", table.name()), ty);
        self.tables.insert(oid, slot);
        Ok(slot)
    }

    /// Tables referenced by the query and their slots, by oid
    pub fn tables(&self) -> impl Iterator<Item = (Oid, StateId)> + '_ {
        self.tables.iter().map(|(oid, slot)| (*oid, *slot))
    }

    /// Load the executor context
    pub fn load_ctx(&self, b: &mut FunctionBuilder) -> Reg {
        b.load_state(self.ctx_slot)
    }

    /// Load the result consumer
    pub fn load_consumer(&self, b: &mut FunctionBuilder) -> Reg {
        b.load_state(self.consumer_slot)
    }

    /// Load a bound table handle
    pub fn load_table(&mut self, b: &mut FunctionBuilder, oid: Oid) -> Result<Reg> {
        let slot = self.table_slot(oid)?;
        Ok(b.load_state(slot))
    }

    /// Split into the module and the state layout builder
    pub fn into_parts(self) -> (CodeContext, RuntimeStateBuilder) {
        (self.code, self.state)
    }
}
