//! Per-query runtime state
//!
//! Translators reserve slots while a query is prepared. The finished layout
//! is a named struct descriptor (one field per slot) plus a constructor per
//! slot; every execution instantiates a fresh [`RuntimeState`] from it.
//!
//! Native slots hold runtime support objects (deleters, hash tables,
//! latches) that generated code reaches through slot pointers. Datum slots
//! hold shared handles (executor context, tables) installed by generated
//! init code.

use crate::error::{Error, Result};
use crate::proxy::{
    Datum, LocalId, NativeType, ProxyType, StateId, StructSchema, TypeDescriptor, TypeRegistry,
};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::Arc;

type Constructor = fn() -> Box<dyn Any + Send + Sync>;

fn construct<T: Default + Any + Send + Sync>() -> Box<dyn Any + Send + Sync> {
    Box::new(T::default())
}

#[derive(Clone)]
enum SlotInit {
    Native(Constructor),
    Datum,
}

#[derive(Clone)]
struct SlotDef {
    name: String,
    ty: NativeType,
    init: SlotInit,
}

enum Slot {
    Native(Box<dyn Any + Send + Sync>),
    Datum(Datum),
}

/// Collects slot reservations while translators are prepared
#[derive(Clone, Default)]
pub struct RuntimeStateBuilder {
    slots: Vec<SlotDef>,
}

impl RuntimeStateBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot holding a default-constructed native object
    pub fn register<T: ProxyType + Default + Any + Send + Sync>(
        &mut self,
        types: &mut TypeRegistry,
        name: &str,
    ) -> StateId {
        let ty = T::native_type(types);
        self.push(name, ty, SlotInit::Native(construct::<T>))
    }

    /// Reserve a slot holding a datum written by generated code
    pub fn register_datum(&mut self, name: &str, ty: NativeType) -> StateId {
        self.push(name, ty, SlotInit::Datum)
    }

    fn push(&mut self, name: &str, ty: NativeType, init: SlotInit) -> StateId {
        let id = StateId(self.slots.len() as u32);
        tracing::trace!(slot = id.0, name, %ty, "reserved runtime state slot");
        self.slots.push(SlotDef {
            name: name.to_string(),
            ty,
            init,
        });
        id
    }

    /// Number of reserved slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No slots reserved
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Freeze the layout
    pub fn finalize(self, types: &mut TypeRegistry, name: &str) -> RuntimeStateLayout {
        let mut schema = StructSchema::new(name);
        for slot in &self.slots {
            schema.push_field(slot.name.clone(), slot.ty.clone());
        }
        let descriptor = types.register(schema.build());
        RuntimeStateLayout {
            slots: self.slots,
            descriptor,
        }
    }
}

/// Frozen slot layout of a compiled query
#[derive(Clone)]
pub struct RuntimeStateLayout {
    slots: Vec<SlotDef>,
    descriptor: Arc<TypeDescriptor>,
}

impl RuntimeStateLayout {
    /// Struct descriptor with one field per slot
    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot name
    pub fn slot_name(&self, id: StateId) -> Option<&str> {
        self.slots.get(id.0 as usize).map(|s| s.name.as_str())
    }

    /// Fresh state for one execution
    pub fn instantiate(&self) -> RuntimeState {
        let slots = self
            .slots
            .iter()
            .map(|def| {
                RwLock::new(match def.init {
                    SlotInit::Native(ctor) => Slot::Native(ctor()),
                    SlotInit::Datum => Slot::Datum(Datum::Void),
                })
            })
            .collect();
        RuntimeState {
            slots,
            names: self.slots.iter().map(|s| s.name.clone()).collect(),
            task_error: Mutex::new(None),
        }
    }
}

/// Runtime memory of one query execution, shared with worker tasks
pub struct RuntimeState {
    slots: Vec<RwLock<Slot>>,
    names: Vec<String>,
    task_error: Mutex<Option<Error>>,
}

crate::proxy_opaque!(RuntimeState => "RuntimeState");

impl RuntimeState {
    fn slot(&self, id: StateId) -> Result<&RwLock<Slot>> {
        self.slots
            .get(id.0 as usize)
            .ok_or_else(|| Error::codegen(format!("runtime state has no slot {}", id.0)))
    }

    fn slot_name(&self, id: StateId) -> &str {
        self.names.get(id.0 as usize).map_or("?", String::as_str)
    }

    /// Exclusive access to a native slot
    pub fn with_native_mut<T: Any, R>(&self, id: StateId, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.slot(id)?.write();
        match &mut *guard {
            Slot::Native(object) => object.downcast_mut::<T>().map(f).ok_or_else(|| {
                Error::codegen(format!(
                    "slot '{}' does not hold a {}",
                    self.slot_name(id),
                    std::any::type_name::<T>()
                ))
            }),
            Slot::Datum(_) => Err(Error::codegen(format!(
                "slot '{}' holds a datum, not a native object",
                self.slot_name(id)
            ))),
        }
    }

    /// Shared access to a native slot
    pub fn with_native<T: Any, R>(&self, id: StateId, f: impl FnOnce(&T) -> R) -> Result<R> {
        let guard = self.slot(id)?.read();
        match &*guard {
            Slot::Native(object) => object.downcast_ref::<T>().map(f).ok_or_else(|| {
                Error::codegen(format!(
                    "slot '{}' does not hold a {}",
                    self.slot_name(id),
                    std::any::type_name::<T>()
                ))
            }),
            Slot::Datum(_) => Err(Error::codegen(format!(
                "slot '{}' holds a datum, not a native object",
                self.slot_name(id)
            ))),
        }
    }

    /// Read a datum slot
    pub fn load(&self, id: StateId) -> Result<Datum> {
        match &*self.slot(id)?.read() {
            Slot::Datum(datum) => Ok(datum.clone()),
            Slot::Native(_) => Err(Error::codegen(format!(
                "slot '{}' holds a native object; load a pointer instead",
                self.slot_name(id)
            ))),
        }
    }

    /// Write a datum slot
    pub fn store(&self, id: StateId, datum: Datum) -> Result<()> {
        match &mut *self.slot(id)?.write() {
            Slot::Datum(slot) => {
                *slot = datum;
                Ok(())
            }
            Slot::Native(_) => Err(Error::codegen(format!(
                "slot '{}' holds a native object and cannot be overwritten",
                self.slot_name(id)
            ))),
        }
    }

    /// Remember the first error raised by a worker task
    pub fn record_task_error(&self, error: Error) {
        let mut slot = self.task_error.lock();
        if slot.is_none() {
            tracing::warn!(%error, "parallel task failed");
            *slot = Some(error);
        }
    }

    /// Re-raise a recorded task error in the calling pipeline
    pub fn raise_task_error(&self) -> Result<()> {
        match self.task_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Slots private to one function activation
#[derive(Default)]
pub struct LocalState {
    slots: Vec<Box<dyn Any + Send + Sync>>,
}

impl LocalState {
    /// Construct every local of a function
    pub fn new(constructors: &[LocalSlot]) -> Self {
        Self {
            slots: constructors.iter().map(|c| (c.ctor)()).collect(),
        }
    }

    /// Exclusive access to a local
    pub fn with_mut<T: Any, R>(&mut self, id: LocalId, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.downcast_mut::<T>())
            .map(f)
            .ok_or_else(|| {
                Error::codegen(format!(
                    "local {} does not hold a {}",
                    id.0,
                    std::any::type_name::<T>()
                ))
            })
    }
}

/// Declaration of a per-activation local slot
#[derive(Clone)]
pub struct LocalSlot {
    name: String,
    ty: NativeType,
    ctor: Constructor,
}

impl LocalSlot {
    /// Local holding a default-constructed `T`
    pub fn of<T: ProxyType + Default + Any + Send + Sync>(types: &mut TypeRegistry, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: T::native_type(types),
            ctor: construct::<T>,
        }
    }

    /// Slot name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot type
    pub fn native_type(&self) -> &NativeType {
        &self.ty
    }
}
