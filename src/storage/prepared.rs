//! Prepared statements and the generic machinery backends share.
//!
//! A backend implementing [`StatementBackend`] gets everything else for free:
//! [`prepare`] compiles through a [`StatementCache`], hands out a
//! [`BackendPreparedStatement`] for binding, and turns patched statements into
//! calls to `find` / `apply`.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::cursor::Cursor;
use crate::storage::descriptor::{self, CompiledStatement, StatementDescriptor};
use crate::storage::error::{DescriptorParsingError, IllegalPatchError, StatementExecutionError};
use crate::storage::statement::{
    BoundQuery, BoundStatement, BoundWrite, DataModifyingStatement, Expression, ParsedStatement,
    PreparedParameter, Query, SortDirection, Statement, StatementKind,
};
use crate::storage::traits::StatementBackend;
use crate::storage::types::{Key, Pojo, Schema, Value, ValueType};

// =============================================================================
// PreparedStatement
// =============================================================================

/// A compiled statement plus the parameter values bound so far.
///
/// Every typed setter funnels into [`set_parameter`](Self::set_parameter), so
/// wrappers only have to forward that one method.
pub trait PreparedStatement<T>: Send {
    /// Bind `value` at `index`.
    ///
    /// # Errors
    /// Returns `IllegalPatchError` if `index` is out of range or the value's
    /// type differs from the declared parameter type.
    fn set_parameter(&mut self, index: usize, value: Value) -> Result<(), IllegalPatchError>;

    /// All bound parameters, in index order.
    ///
    /// # Errors
    /// Returns `IllegalPatchError::Unbound` for the first missing index.
    fn parameters(&self) -> Result<Vec<PreparedParameter>, IllegalPatchError>;

    /// Run a write. Returns a status code.
    fn execute(&self) -> Result<i32, StatementExecutionError>;

    /// Run a query.
    fn execute_query(&self) -> Result<Cursor<T>, StatementExecutionError>;

    /// The compiled statement behind this one, for re-patching elsewhere.
    fn parsed_statement(&self) -> Arc<dyn ParsedStatement<T>>;

    /// Independent copy with the same bindings.
    fn snapshot(&self) -> Box<dyn PreparedStatement<T>>;

    fn set_string(&mut self, index: usize, value: &str) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::String(value.to_string()))
    }

    fn set_int(&mut self, index: usize, value: i32) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::Int(value))
    }

    fn set_long(&mut self, index: usize, value: i64) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::Long(value))
    }

    fn set_double(&mut self, index: usize, value: f64) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::Double(value))
    }

    fn set_boolean(&mut self, index: usize, value: bool) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::Boolean(value))
    }

    fn set_pojo(&mut self, index: usize, value: serde_json::Value) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::Pojo(value))
    }

    fn set_string_list(&mut self, index: usize, value: Vec<String>) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::StringList(value))
    }

    fn set_int_list(&mut self, index: usize, value: Vec<i32>) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::IntList(value))
    }

    fn set_long_list(&mut self, index: usize, value: Vec<i64>) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::LongList(value))
    }

    fn set_double_list(&mut self, index: usize, value: Vec<f64>) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::DoubleList(value))
    }

    fn set_boolean_list(&mut self, index: usize, value: Vec<bool>) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::BooleanList(value))
    }

    fn set_pojo_list(
        &mut self,
        index: usize,
        value: Vec<serde_json::Value>,
    ) -> Result<(), IllegalPatchError> {
        self.set_parameter(index, Value::PojoList(value))
    }
}

// =============================================================================
// Statement cache
// =============================================================================

type CacheKey = (String, Vec<Key>, String);

/// Compiled statements keyed by category and descriptor text.
///
/// A given (category, descriptor) pair is compiled at most once.
#[derive(Default)]
pub struct StatementCache {
    entries: Mutex<HashMap<CacheKey, Arc<CompiledStatement>>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the compiled form of `descriptor`, compiling it on first use.
    ///
    /// Failed compilations are not cached.
    pub fn get_or_compile(
        &self,
        schema: &Schema,
        descriptor: &str,
    ) -> Result<Arc<CompiledStatement>, DescriptorParsingError> {
        let key = (
            schema.name().to_string(),
            schema.keys().to_vec(),
            descriptor.to_string(),
        );

        let mut entries = self.entries.lock();
        if let Some(compiled) = entries.get(&key) {
            return Ok(Arc::clone(compiled));
        }

        let compiled = Arc::new(descriptor::compile(schema, descriptor)?);
        tracing::debug!(category = %schema.name(), descriptor, "Compiled statement");
        entries.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Prepare `descriptor` for execution against `backend`.
///
/// # Errors
/// Returns `DescriptorParsingError` if the descriptor does not compile.
pub fn prepare<T: Pojo>(
    cache: &StatementCache,
    backend: Arc<dyn StatementBackend>,
    descriptor: &StatementDescriptor<T>,
) -> Result<Box<dyn PreparedStatement<T>>, DescriptorParsingError> {
    let compiled = cache.get_or_compile(descriptor.category().schema(), descriptor.descriptor())?;
    let parsed = Arc::new(BackendParsedStatement::new(compiled, backend));
    Ok(Box::new(BackendPreparedStatement::new(parsed)))
}

// =============================================================================
// Backend statements
// =============================================================================

/// A compiled statement bound to the backend that will run it.
pub struct BackendParsedStatement<T> {
    compiled: Arc<CompiledStatement>,
    backend: Arc<dyn StatementBackend>,
    _pojo: PhantomData<fn() -> T>,
}

impl<T> BackendParsedStatement<T> {
    pub fn new(compiled: Arc<CompiledStatement>, backend: Arc<dyn StatementBackend>) -> Self {
        Self {
            compiled,
            backend,
            _pojo: PhantomData,
        }
    }
}

impl<T: Pojo> ParsedStatement<T> for BackendParsedStatement<T> {
    fn descriptor(&self) -> &str {
        self.compiled.descriptor()
    }

    fn kind(&self) -> StatementKind {
        self.compiled.kind()
    }

    fn signature(&self) -> &[ValueType] {
        self.compiled.signature()
    }

    fn patch(&self, params: &[PreparedParameter]) -> Result<Statement<T>, IllegalPatchError> {
        let backend = Arc::clone(&self.backend);
        Ok(match self.compiled.bind(params)? {
            BoundStatement::Query(query) => Statement::Query(Box::new(BackendQuery {
                query,
                backend,
                _pojo: PhantomData,
            })),
            BoundStatement::Write(write) => Statement::Write(Box::new(BackendWrite {
                write,
                backend,
                _pojo: PhantomData,
            })),
        })
    }
}

/// Parameter slots over a [`BackendParsedStatement`].
pub struct BackendPreparedStatement<T> {
    parsed: Arc<BackendParsedStatement<T>>,
    values: Vec<Option<Value>>,
}

impl<T: Pojo> BackendPreparedStatement<T> {
    pub fn new(parsed: Arc<BackendParsedStatement<T>>) -> Self {
        let values = vec![None; parsed.num_params()];
        Self { parsed, values }
    }

    fn patch(&self) -> Result<Statement<T>, StatementExecutionError> {
        let params = self.parameters()?;
        Ok(self.parsed.patch(&params)?)
    }
}

impl<T> Clone for BackendPreparedStatement<T> {
    fn clone(&self) -> Self {
        Self {
            parsed: Arc::clone(&self.parsed),
            values: self.values.clone(),
        }
    }
}

impl<T> fmt::Debug for BackendPreparedStatement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendPreparedStatement")
            .field("descriptor", &self.parsed.compiled.descriptor())
            .field("values", &self.values)
            .finish()
    }
}

impl<T: Pojo> PreparedStatement<T> for BackendPreparedStatement<T> {
    fn set_parameter(&mut self, index: usize, value: Value) -> Result<(), IllegalPatchError> {
        let count = self.values.len();
        let expected = *self
            .parsed
            .signature()
            .get(index)
            .ok_or(IllegalPatchError::IndexOutOfRange { index, count })?;
        let actual = value.value_type();
        if actual != expected {
            return Err(IllegalPatchError::TypeMismatch {
                index,
                expected,
                actual,
            });
        }
        if !value.is_finite() {
            return Err(IllegalPatchError::NonFiniteDouble { index });
        }
        self.values[index] = Some(value);
        Ok(())
    }

    fn parameters(&self) -> Result<Vec<PreparedParameter>, IllegalPatchError> {
        self.values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                value
                    .clone()
                    .map(|value| PreparedParameter::new(index, value))
                    .ok_or(IllegalPatchError::Unbound { index })
            })
            .collect()
    }

    fn execute(&self) -> Result<i32, StatementExecutionError> {
        match self.patch()? {
            Statement::Write(write) => write.apply(),
            Statement::Query(_) => Err(StatementExecutionError::NotAWrite),
        }
    }

    fn execute_query(&self) -> Result<Cursor<T>, StatementExecutionError> {
        match self.patch()? {
            Statement::Query(query) => query.execute(),
            Statement::Write(_) => Err(StatementExecutionError::NotAQuery),
        }
    }

    fn parsed_statement(&self) -> Arc<dyn ParsedStatement<T>> {
        self.parsed.clone()
    }

    fn snapshot(&self) -> Box<dyn PreparedStatement<T>> {
        Box::new(self.clone())
    }
}

struct BackendQuery<T> {
    query: BoundQuery,
    backend: Arc<dyn StatementBackend>,
    _pojo: PhantomData<fn() -> T>,
}

impl<T: Pojo> Query<T> for BackendQuery<T> {
    fn category(&self) -> &str {
        &self.query.category
    }

    fn set_where(&mut self, expression: Expression) {
        self.query.condition = Some(expression);
    }

    fn where_expression(&self) -> Option<&Expression> {
        self.query.condition.as_ref()
    }

    fn sort(&mut self, key: Key, direction: SortDirection) {
        self.query.sort.push((key, direction));
    }

    fn limit(&mut self, limit: usize) {
        self.query.limit = Some(limit);
    }

    fn execute(self: Box<Self>) -> Result<Cursor<T>, StatementExecutionError> {
        let records = self.backend.find(&self.query)?;
        Ok(Cursor::from_records(records))
    }
}

struct BackendWrite<T> {
    write: BoundWrite,
    backend: Arc<dyn StatementBackend>,
    _pojo: PhantomData<fn() -> T>,
}

impl<T: Pojo> DataModifyingStatement<T> for BackendWrite<T> {
    fn category(&self) -> &str {
        &self.write.category
    }

    fn apply(self: Box<Self>) -> Result<i32, StatementExecutionError> {
        self.backend.apply(&self.write)
    }
}
