//! Storage and backend traits.

use std::io::Read;
use std::sync::Arc;

use crate::storage::connection::Connection;
use crate::storage::descriptor::StatementDescriptor;
use crate::storage::error::{DescriptorParsingError, StatementExecutionError, StorageError};
use crate::storage::prepared::PreparedStatement;
use crate::storage::statement::{BoundQuery, BoundWrite};
use crate::storage::types::{Category, Pojo, Record};

/// A pluggable storage backend.
///
/// Write-shaped operations are `prepare_statement(..).execute()`, `save_file`
/// and `purge`; everything else is a read or metadata.
pub trait Storage: Send + Sync + 'static {
    /// Declare a category. Registering the same category twice is a no-op.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidCategory` if a different schema is
    /// already registered under the same name.
    fn register_category<T: Pojo>(&self, category: &Category<T>) -> Result<(), StorageError>;

    /// Compile (or fetch from cache) and wrap a descriptor for binding.
    ///
    /// # Errors
    /// Returns `DescriptorParsingError` if the descriptor does not compile.
    fn prepare_statement<T: Pojo>(
        &self,
        descriptor: &StatementDescriptor<T>,
    ) -> Result<Box<dyn PreparedStatement<T>>, DescriptorParsingError>;

    /// Store `data` under `name`, replacing any previous file.
    fn save_file(&self, name: &str, data: Box<dyn Read + Send>) -> Result<(), StorageError>;

    /// Open the file stored under `name`, if any.
    fn load_file(&self, name: &str) -> Result<Option<Box<dyn Read + Send>>, StorageError>;

    /// Delete everything recorded for `agent_id`.
    fn purge(&self, agent_id: &str) -> Result<(), StorageError>;

    fn connection(&self) -> Arc<Connection>;

    /// Release backend resources. Further use is undefined.
    fn shutdown(&self);
}

impl<S: Storage> Storage for Arc<S> {
    fn register_category<T: Pojo>(&self, category: &Category<T>) -> Result<(), StorageError> {
        (**self).register_category(category)
    }

    fn prepare_statement<T: Pojo>(
        &self,
        descriptor: &StatementDescriptor<T>,
    ) -> Result<Box<dyn PreparedStatement<T>>, DescriptorParsingError> {
        (**self).prepare_statement(descriptor)
    }

    fn save_file(&self, name: &str, data: Box<dyn Read + Send>) -> Result<(), StorageError> {
        (**self).save_file(name, data)
    }

    fn load_file(&self, name: &str) -> Result<Option<Box<dyn Read + Send>>, StorageError> {
        (**self).load_file(name)
    }

    fn purge(&self, agent_id: &str) -> Result<(), StorageError> {
        (**self).purge(agent_id)
    }

    fn connection(&self) -> Arc<Connection> {
        (**self).connection()
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

/// Executes bound statements for the generic prepared-statement machinery.
///
/// Backends implement this once and get descriptor compilation, caching and
/// parameter binding from [`prepare`](crate::storage::prepared::prepare).
pub trait StatementBackend: Send + Sync + 'static {
    /// Records matching a bound query, already filtered, sorted and limited.
    /// A count query yields one `{"count": n}` record.
    fn find(&self, query: &BoundQuery) -> Result<Vec<Record>, StatementExecutionError>;

    /// Apply a bound write and return its status code.
    fn apply(&self, write: &BoundWrite) -> Result<i32, StatementExecutionError>;
}
