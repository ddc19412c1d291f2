//! Storage Layer
//!
//! Typed statement execution over pluggable backends, with an order-preserving
//! write queue:
//! - **Statements**: descriptor text compiled once into a read or write, bound per call
//! - **Queue**: one worker thread applies writes in issue order; reads run inline
//!
//! # Components
//!
//! - [`Category`] / [`Key`] / [`Value`]: the schema statements are checked against
//! - [`StatementDescriptor`] / [`CompiledStatement`]: descriptor compilation
//! - [`PreparedStatement`] / [`Cursor`]: binding and execution
//! - [`Storage`] / [`StatementBackend`]: backend traits
//! - [`QueuedStorage`] / [`QueuedStorageBuilder`]: the ordered dispatch decorator
//! - [`MemoryStorage`]: in-process backing engine
//! - [`dao`]: one-shot helpers and "latest samples" getters

mod actor;
mod builder;
mod connection;
mod cursor;
pub mod dao;
mod descriptor;
mod error;
mod memory;
mod prepared;
mod queued;
mod statement;
mod traits;
mod types;

pub use actor::{DispatchHandle, Dispatcher, Job};
pub use builder::{DEFAULT_DRAIN_TIMEOUT, QueuedStorageBuilder, QueuedStorageConfig};
pub use connection::{Connection, ConnectionStatus};
pub use cursor::Cursor;
pub use descriptor::{CompiledStatement, StatementDescriptor, compile};
pub use error::{DescriptorParsingError, IllegalPatchError, StatementExecutionError, StorageError};
pub use memory::{MEMORY_URL, MemoryBackend, MemoryStorage};
pub use prepared::{
    BackendParsedStatement, BackendPreparedStatement, PreparedStatement, StatementCache, prepare,
};
pub use queued::QueuedStorage;
pub use statement::{
    BoundQuery, BoundStatement, BoundWrite, ComparisonOperator, DEFAULT_STATUS_FAILURE,
    DEFAULT_STATUS_SUCCESS, DataModifyingStatement, Expression, ParsedStatement,
    PreparedParameter, Query, QueryKind, SortDirection, Statement, StatementKind, WriteKind,
};
pub use traits::{StatementBackend, Storage};
pub use types::{AggregateCount, Category, Key, Pojo, Record, Schema, Value, ValueType};
