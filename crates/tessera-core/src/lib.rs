//! Tessera Core - Query Compilation Engine
//!
//! This crate turns bound logical query plans into executable programs and
//! provides everything those programs call into at run time:
//! - SQL value model (arithmetic with overflow checks, comparison, casts,
//!   hashing, serialization)
//! - Proxy layer describing native struct layouts and call signatures to
//!   the generator
//! - Runtime support objects (hash table, bloom filter, sorter, deleter,
//!   updater, inserter, index scan iterator, thread pool, latch)
//! - Tuple ownership and visibility protocol against an MVCC transaction
//!   manager
//! - Produce/consume translators emitting a register IR, plus the
//!   interpreter that runs it
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │       Query Compiler / Query Cache          │
//! │   (PlanNode -> translators -> IR program)   │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │      Compiled Query (init/plan/teardown)    │
//! │   (IR interpreter, parallel task fan-out)   │
//! └──────────────┬──────────────────────────────┘
//!                │ proxy calls
//! ┌──────────────┴──────────────────────────────┐
//! │          Runtime Support Objects            │
//! │ (Hash Table, Bloom, Sorter, Deleter, ...)   │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │   Transaction Manager / Storage (in-memory) │
//! │ (Ownership, Versions, Tile Groups, Indexes) │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codegen;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod executor;
pub mod expression;
pub mod planner;
pub mod proxy;
pub mod runtime;
pub mod storage;
pub mod types;

pub use codegen::{CompileStats, CompiledQuery, QueryCache, QueryCompiler};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use executor::ExecutorContext;
pub use expression::Expr;
pub use planner::PlanNode;
pub use types::{TypeId, Value};
