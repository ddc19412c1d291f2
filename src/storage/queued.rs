//! Order-preserving queued storage decorator.
//!
//! [`QueuedStorage`] wraps any [`Storage`] and routes every write through one
//! dispatch worker, so writes reach the delegate in exactly the order their
//! `execute()` calls were issued, whichever threads issued them. Reads run on
//! the caller's thread.
//!
//! | Operation | Path |
//! |---|---|
//! | `PreparedStatement::execute`, `purge` | statement worker (`<name>-writes`) |
//! | `save_file` | file worker (`<name>-files`) |
//! | `execute_query`, `load_file`, `register_category`, `connection` | synchronous |

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::storage::actor::{DispatchHandle, Dispatcher};
use crate::storage::builder::{QueuedStorageBuilder, QueuedStorageConfig};
use crate::storage::connection::Connection;
use crate::storage::cursor::Cursor;
use crate::storage::descriptor::StatementDescriptor;
use crate::storage::error::{
    DescriptorParsingError, IllegalPatchError, StatementExecutionError, StorageError,
};
use crate::storage::prepared::PreparedStatement;
use crate::storage::statement::{
    DEFAULT_STATUS_SUCCESS, DataModifyingStatement, ParsedStatement, PreparedParameter,
    Statement, StatementKind,
};
use crate::storage::traits::Storage;
use crate::storage::types::{Category, Pojo, Value, ValueType};

const PROXY_MISUSE: &str =
    "statement executed directly although the backing storage runs in a proxy";

// =============================================================================
// QueuedStorage
// =============================================================================

/// Storage decorator funnelling writes through a single ordered worker.
pub struct QueuedStorage<S: Storage> {
    delegate: Arc<S>,
    config: QueuedStorageConfig,
    executor: Dispatcher,
    file_executor: Dispatcher,
    shut_down: AtomicBool,
}

impl<S: Storage> QueuedStorage<S> {
    /// Wrap `delegate` with default settings.
    pub fn new(delegate: S) -> Result<Self, StorageError> {
        QueuedStorageBuilder::new().build(delegate)
    }

    pub(crate) fn with_config(delegate: S, config: QueuedStorageConfig) -> Result<Self, StorageError> {
        let executor = Dispatcher::spawn(format!("{}-writes", config.name))?;
        let file_executor = Dispatcher::spawn(format!("{}-files", config.name))?;

        tracing::info!(
            name = %config.name,
            proxied = config.backing_storage_in_proxy,
            "Queued storage started"
        );

        Ok(Self {
            delegate: Arc::new(delegate),
            config,
            executor,
            file_executor,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    pub fn config(&self) -> &QueuedStorageConfig {
        &self.config
    }

    pub fn is_backing_storage_in_proxy(&self) -> bool {
        self.config.backing_storage_in_proxy
    }

    /// Writes and purges queued but not yet applied.
    pub fn pending_writes(&self) -> usize {
        self.executor.pending()
    }

    /// Wait until everything queued so far on both workers has been applied.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed on either worker.
    ///
    /// # Errors
    /// Returns `StorageError::ChannelSend` after shutdown.
    pub fn flush(&self, timeout: Duration) -> Result<bool, StorageError> {
        Ok(self.executor.flush(timeout)? && self.file_executor.flush(timeout)?)
    }
}

impl<S: Storage> Storage for QueuedStorage<S> {
    fn register_category<T: Pojo>(&self, category: &Category<T>) -> Result<(), StorageError> {
        self.delegate.register_category(category)
    }

    fn prepare_statement<T: Pojo>(
        &self,
        descriptor: &StatementDescriptor<T>,
    ) -> Result<Box<dyn PreparedStatement<T>>, DescriptorParsingError> {
        let inner = self.delegate.prepare_statement(descriptor)?;
        Ok(Box::new(QueuedPreparedStatement {
            inner,
            executor: self.executor.handle(),
            backing_storage_in_proxy: self.config.backing_storage_in_proxy,
        }))
    }

    fn save_file(&self, name: &str, data: Box<dyn Read + Send>) -> Result<(), StorageError> {
        let delegate = Arc::clone(&self.delegate);
        let name = name.to_string();
        self.file_executor.submit(move || {
            if let Err(e) = delegate.save_file(&name, data) {
                tracing::warn!(file = %name, error = %e, "Queued file save failed");
            }
        })
    }

    fn load_file(&self, name: &str) -> Result<Option<Box<dyn Read + Send>>, StorageError> {
        self.delegate.load_file(name)
    }

    fn purge(&self, agent_id: &str) -> Result<(), StorageError> {
        let delegate = Arc::clone(&self.delegate);
        let agent_id = agent_id.to_string();
        self.executor.submit(move || {
            if let Err(e) = delegate.purge(&agent_id) {
                tracing::warn!(agent_id = %agent_id, error = %e, "Queued purge failed");
            }
        })
    }

    fn connection(&self) -> Arc<Connection> {
        self.delegate.connection()
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(name = %self.config.name, "Queued storage shutting down");
        self.executor.close();
        self.file_executor.close();

        let writes_drained = self.executor.await_termination(self.config.queue_drain_timeout);
        let files_drained = self.file_executor.await_termination(self.config.file_drain_timeout);

        self.delegate.shutdown();
        tracing::info!(
            name = %self.config.name,
            writes_drained,
            files_drained,
            "Queued storage stopped"
        );
    }
}

impl<S: Storage> Drop for QueuedStorage<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Statements
// =============================================================================

/// Prepared statement whose `execute()` is queued on the statement worker.
struct QueuedPreparedStatement<T> {
    inner: Box<dyn PreparedStatement<T>>,
    executor: DispatchHandle,
    backing_storage_in_proxy: bool,
}

impl<T: Pojo> PreparedStatement<T> for QueuedPreparedStatement<T> {
    fn set_parameter(&mut self, index: usize, value: Value) -> Result<(), IllegalPatchError> {
        self.inner.set_parameter(index, value)
    }

    fn parameters(&self) -> Result<Vec<PreparedParameter>, IllegalPatchError> {
        self.inner.parameters()
    }

    fn execute(&self) -> Result<i32, StatementExecutionError> {
        assert!(!self.backing_storage_in_proxy, "{PROXY_MISUSE}");

        let parsed = self.inner.parsed_statement();
        if parsed.kind().is_query() {
            return Err(StatementExecutionError::NotAWrite);
        }
        self.inner.parameters()?;

        let statement = self.inner.snapshot();
        let descriptor = parsed.descriptor().to_string();
        self.executor
            .submit(move || match statement.execute() {
                Ok(DEFAULT_STATUS_SUCCESS) => {}
                Ok(status) => {
                    tracing::warn!(descriptor = %descriptor, status, "Queued write reported failure");
                }
                Err(e) => {
                    tracing::warn!(descriptor = %descriptor, error = %e, "Queued write failed");
                }
            })
            .map_err(|_| StatementExecutionError::Rejected)?;

        Ok(DEFAULT_STATUS_SUCCESS)
    }

    fn execute_query(&self) -> Result<Cursor<T>, StatementExecutionError> {
        assert!(!self.backing_storage_in_proxy, "{PROXY_MISUSE}");
        self.inner.execute_query()
    }

    fn parsed_statement(&self) -> Arc<dyn ParsedStatement<T>> {
        let parsed = self.inner.parsed_statement();
        if self.backing_storage_in_proxy {
            Arc::new(QueuedParsedStatement {
                inner: parsed,
                executor: self.executor.clone(),
            })
        } else {
            parsed
        }
    }

    fn snapshot(&self) -> Box<dyn PreparedStatement<T>> {
        Box::new(QueuedPreparedStatement {
            inner: self.inner.snapshot(),
            executor: self.executor.clone(),
            backing_storage_in_proxy: self.backing_storage_in_proxy,
        })
    }
}

/// Parsed statement handed to a proxy: patched writes are queued when applied.
struct QueuedParsedStatement<T> {
    inner: Arc<dyn ParsedStatement<T>>,
    executor: DispatchHandle,
}

impl<T: Pojo> ParsedStatement<T> for QueuedParsedStatement<T> {
    fn descriptor(&self) -> &str {
        self.inner.descriptor()
    }

    fn kind(&self) -> StatementKind {
        self.inner.kind()
    }

    fn signature(&self) -> &[ValueType] {
        self.inner.signature()
    }

    fn patch(&self, params: &[PreparedParameter]) -> Result<Statement<T>, IllegalPatchError> {
        Ok(match self.inner.patch(params)? {
            Statement::Write(write) => Statement::Write(Box::new(QueuedWrite {
                inner: write,
                executor: self.executor.clone(),
            })),
            query @ Statement::Query(_) => query,
        })
    }
}

struct QueuedWrite<T> {
    inner: Box<dyn DataModifyingStatement<T>>,
    executor: DispatchHandle,
}

impl<T: Pojo> DataModifyingStatement<T> for QueuedWrite<T> {
    fn category(&self) -> &str {
        self.inner.category()
    }

    fn apply(self: Box<Self>) -> Result<i32, StatementExecutionError> {
        let QueuedWrite { inner, executor } = *self;
        let category = inner.category().to_string();
        executor
            .submit(move || {
                if let Err(e) = inner.apply() {
                    tracing::warn!(category = %category, error = %e, "Queued write failed");
                }
            })
            .map_err(|_| StatementExecutionError::Rejected)?;
        Ok(DEFAULT_STATUS_SUCCESS)
    }
}
