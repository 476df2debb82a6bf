//! Transaction collaborator and the ownership/visibility protocol
//!
//! Compiled scan, update and delete operators never touch tuple version
//! headers directly. They go through [`TransactionManager`] (ownership,
//! version installation, commit and abort) and [`TransactionRuntime`]
//! (batched visibility checks).

mod manager;
mod runtime;
mod transaction;

pub use manager::{TimestampOrderingTransactionManager, TransactionManager};
pub use runtime::TransactionRuntime;
pub use transaction::TransactionContext;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Isolation level of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Reads are registered and block later writers
    #[default]
    Serializable,
    /// Snapshot reads
    Snapshot,
    /// Reads are registered
    RepeatableRead,
    /// Reads are never registered
    ReadCommitted,
}

/// Outcome flag of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    /// No failure recorded
    Success,
    /// A protocol step failed; the transaction must abort
    Failure,
    /// Rolled back
    Aborted,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResultType::Success => "SUCCESS",
            ResultType::Failure => "FAILURE",
            ResultType::Aborted => "ABORTED",
        })
    }
}

/// Visibility of a version to a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityType {
    /// Not part of the transaction's snapshot
    Invisible,
    /// A delete marker the transaction can see
    Deleted,
    /// Readable
    Ok,
}

/// Access recorded in a read/write set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RwType {
    /// Registered read
    Read,
    /// Read holding ownership
    ReadOwn,
    /// Superseded by a new version
    Update,
    /// Created by the transaction
    Insert,
    /// Deleted by the transaction
    Delete,
    /// Created and then deleted by the transaction
    InsDel,
}
