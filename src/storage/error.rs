//! Storage-specific error types.
//!
//! The statement layer distinguishes three failure classes, each with its own
//! type so callers can tell a code defect from a runtime failure:
//!
//! - [`DescriptorParsingError`]: the descriptor text is invalid (prepare time).
//! - [`IllegalPatchError`]: parameters do not match the signature (bind time).
//! - [`StatementExecutionError`]: the backend failed (execution time).
//!
//! [`StorageError`] is the umbrella returned by everything else.

use thiserror::Error;

use crate::storage::types::ValueType;

/// A statement descriptor failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse descriptor '{descriptor}': {message}")]
pub struct DescriptorParsingError {
    /// The descriptor text as given.
    pub descriptor: String,
    /// What was wrong with it.
    pub message: String,
}

impl DescriptorParsingError {
    pub(crate) fn new(descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            message: message.into(),
        }
    }
}

/// Parameters supplied to a parsed statement do not match its signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalPatchError {
    /// Number of supplied parameters differs from the declared count.
    #[error("expected {expected} parameters, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    /// Index is outside `0..count`.
    #[error("parameter index {index} out of range (statement takes {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// Value type differs from the declared placeholder type.
    #[error("parameter {index}: expected {expected}, got {actual}")]
    TypeMismatch {
        index: usize,
        expected: ValueType,
        actual: ValueType,
    },

    /// A parameter was never bound.
    #[error("parameter {index} is not bound")]
    Unbound { index: usize },

    /// The same index was supplied more than once.
    #[error("parameter {index} supplied more than once")]
    Duplicate { index: usize },

    /// A double is NaN or infinite; stored records only hold finite numbers.
    #[error("parameter {index}: double must be finite")]
    NonFiniteDouble { index: usize },

    /// A bound `LIMIT` value is not positive.
    #[error("limit must be positive, got {0}")]
    InvalidLimit(i64),
}

/// Executing a bound statement failed.
#[derive(Debug, Error)]
pub enum StatementExecutionError {
    /// Parameters could not be patched into the statement.
    #[error("illegal patch: {0}")]
    Patch(#[from] IllegalPatchError),

    /// `execute()` was called on a query.
    #[error("statement is a query, use execute_query()")]
    NotAWrite,

    /// `execute_query()` was called on a write.
    #[error("statement is a write, use execute()")]
    NotAQuery,

    /// The category was never registered with the storage.
    #[error("category '{0}' is not registered")]
    UnknownCategory(String),

    /// Work was submitted after the dispatcher stopped accepting it.
    #[error("storage is shut down, statement rejected")]
    Rejected,

    /// Pojo (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend-level failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    DescriptorParsing(#[from] DescriptorParsingError),

    #[error(transparent)]
    IllegalPatch(#[from] IllegalPatchError),

    #[error(transparent)]
    StatementExecution(#[from] StatementExecutionError),

    /// Category definition is malformed.
    #[error("invalid category: {0}")]
    InvalidCategory(String),

    /// Cursor was advanced past its last element.
    #[error("no more elements in cursor")]
    NoSuchElement,

    /// Failed to hand work to a dispatch worker.
    #[error("failed to send job to dispatch worker")]
    ChannelSend,

    /// File I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (e.g., thread join failure).
    #[error("internal error: {0}")]
    Internal(String),
}
