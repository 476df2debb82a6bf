//! Query compilation
//!
//! Bound plans become modules of a structured register IR. Each plan
//! operator has a translator that emits its part of the code following the
//! produce/consume model, so a whole pipeline runs inside one loop nest and
//! only leaves it for calls into the runtime support objects.
//!
//! ```text
//! PlanNode ──build──▶ translator tree ──produce/consume──▶ IrModule
//!                                                            │
//!                        CompiledQuery::execute ◀── interpreter
//! ```

pub mod builder;
mod cache;
pub mod code_context;
pub mod compilation_context;
mod compiler;
pub mod interpreter;
pub mod ir;
mod natives;
mod query;
pub mod translator;

pub use builder::FunctionBuilder;
pub use cache::{CacheKey, QueryCache, QueryCacheStatistics};
pub use code_context::CodeContext;
pub use compilation_context::CompilationContext;
pub use compiler::QueryCompiler;
pub use ir::{FieldAccess, FuncRef, Inst, IntOp, IrFunction, IrModule, LogicOp, Reg};
pub use natives::{hash_tuple, scan_tasks, storage_table, table_scan_bounds, table_tile_group};
pub use query::{CompileStats, CompiledQuery};
