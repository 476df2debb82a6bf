//! Executable form of a compiled plan

use super::interpreter;
use super::ir::{FuncRef, IrModule};
use crate::error::{Error, Result};
use crate::executor::ExecutorContext;
use crate::proxy::{Datum, StateId};
use crate::runtime::{ConsumerHandle, QueryResultConsumer, RuntimeState, RuntimeStateLayout};
use crate::types::TypeId;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Time spent in each compilation phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CompileStats {
    /// Translator tree construction and state reservation
    pub setup_ms: f64,
    /// Emitting the init, plan and tear-down functions
    pub ir_gen_ms: f64,
    /// Finalizing the module: state layout and verification
    pub jit_ms: f64,
}

impl CompileStats {
    /// Sum of all phases
    pub fn total_ms(&self) -> f64 {
        self.setup_ms + self.ir_gen_ms + self.jit_ms
    }
}

/// Entry points of a compiled module
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryPoints {
    pub(crate) init: FuncRef,
    pub(crate) plan: FuncRef,
    pub(crate) tear_down: FuncRef,
}

/// Slots the caller binds before running
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundSlots {
    pub(crate) ctx: StateId,
    pub(crate) consumer: StateId,
}

/// A plan compiled to an IR module with `init`, `plan` and `tear_down`
/// functions over one runtime state layout
///
/// The query itself is immutable; each execution instantiates a fresh
/// runtime state, so a cached query can run in several transactions at
/// once.
pub struct CompiledQuery {
    module: Arc<IrModule>,
    entry: EntryPoints,
    slots: BoundSlots,
    layout: RuntimeStateLayout,
    output_types: Vec<TypeId>,
    fingerprint: u64,
    stats: CompileStats,
}

impl CompiledQuery {
    pub(crate) fn new(
        module: IrModule,
        entry: EntryPoints,
        slots: BoundSlots,
        layout: RuntimeStateLayout,
        output_types: Vec<TypeId>,
        fingerprint: u64,
        stats: CompileStats,
    ) -> Self {
        Self {
            module: Arc::new(module),
            entry,
            slots,
            layout,
            output_types,
            fingerprint,
            stats,
        }
    }

    /// Run the query in `ctx`'s transaction, handing output rows to
    /// `consumer`; returns the processed-tuple count
    ///
    /// `tear_down` runs even when `init` or `plan` fail. Transaction
    /// protocol failures are not errors: they leave the transaction flagged
    /// and the count short.
    pub fn execute(&self, ctx: Arc<ExecutorContext>, consumer: Arc<dyn QueryResultConsumer>) -> Result<u64> {
        let state = Arc::new(self.layout.instantiate());
        state.store(self.slots.ctx, Datum::object(ctx))?;
        state.store(self.slots.consumer, Datum::object(Arc::new(ConsumerHandle::new(consumer))))?;

        let result = self
            .call(self.entry.init, &state)
            .and_then(|_| self.call(self.entry.plan, &state));
        let cleanup = self.call(self.entry.tear_down, &state);
        let processed = match (result, cleanup) {
            (Ok(processed), Ok(_)) => processed,
            (Ok(_), Err(error)) => return Err(error),
            (Err(error), Ok(_)) => return Err(error),
            (Err(error), Err(cleanup)) => {
                warn!(query = self.module.name(), %cleanup, "tear_down failed after a failed execution");
                return Err(error);
            }
        };
        let processed = processed
            .as_int()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| Error::internal(format!("plan returned a {} instead of a count", processed.kind())))?;
        debug!(query = self.module.name(), processed, "executed compiled query");
        Ok(processed)
    }

    fn call(&self, func: FuncRef, state: &Arc<RuntimeState>) -> Result<Datum> {
        interpreter::run(&self.module, func, state, Vec::new())
    }

    /// Compiled module
    pub fn module(&self) -> &IrModule {
        &self.module
    }

    /// Column types of the rows delivered to the consumer
    pub fn output_types(&self) -> &[TypeId] {
        &self.output_types
    }

    /// Fingerprint of the plan this query was compiled from
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Compilation timings
    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    /// Runtime state layout
    pub fn state_layout(&self) -> &RuntimeStateLayout {
        &self.layout
    }

    /// Readable IR listing
    pub fn dump(&self) -> String {
        self.module.to_string()
    }
}

impl fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledQuery")
            .field("module", &self.module.name())
            .field("functions", &self.module.functions().len())
            .field("state_slots", &self.layout.len())
            .field("output_types", &self.output_types)
            .field("stats", &self.stats)
            .finish()
    }
}
