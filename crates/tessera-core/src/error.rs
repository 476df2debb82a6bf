//! Error types for Tessera Core

use thiserror::Error;

/// Result type alias using Tessera Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the query compilation core
///
/// Value-level failures (type mismatch, out-of-range, divide-by-zero, bad
/// input text) are raised synchronously and surface to the client as query
/// execution errors. Transaction-protocol failures are NOT represented here:
/// they are reported through the transaction result flag.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Operand types are not compatible for the requested operation
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type
        actual: String,
    },

    /// Numeric value does not fit the target type
    #[error("Numeric value out of range: {0}")]
    OutOfRange(String),

    /// Division or modulo by zero
    #[error("Division by zero")]
    DivideByZero,

    /// Text could not be parsed as the requested type
    #[error("Invalid input syntax: {0}")]
    InvalidInput(String),

    /// Operation is not defined for the type
    #[error("Incompatible operation: {0}")]
    Incompatible(String),

    /// Malformed generated code or translator misuse
    #[error("Codegen error: {0}")]
    Codegen(String),

    /// Unknown table, tile group or index
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Storage collaborator errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transaction protocol misuse
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Runtime execution errors (task failures, pool shut down)
    #[error("Executor error: {0}")]
    Executor(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Value (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an out-of-range error
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an incompatible operation error
    pub fn incompatible(msg: impl Into<String>) -> Self {
        Self::Incompatible(msg.into())
    }

    /// Create a codegen error
    pub fn codegen(msg: impl Into<String>) -> Self {
        Self::Codegen(msg.into())
    }

    /// Create a catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create an executor error
    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is a value-level error raised by the type system
    pub fn is_value_error(&self) -> bool {
        matches!(
            self,
            Self::TypeMismatch { .. }
                | Self::OutOfRange(_)
                | Self::DivideByZero
                | Self::InvalidInput(_)
                | Self::Incompatible(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::type_mismatch("INTEGER", "VARCHAR");
        assert_eq!(err.to_string(), "Type mismatch: expected INTEGER, got VARCHAR");
        assert_eq!(Error::DivideByZero.to_string(), "Division by zero");
    }

    #[test]
    fn test_value_error_classification() {
        assert!(Error::out_of_range("x").is_value_error());
        assert!(Error::DivideByZero.is_value_error());
        assert!(!Error::catalog("missing").is_value_error());
        assert!(!Error::internal("bug").is_value_error());
    }
}
