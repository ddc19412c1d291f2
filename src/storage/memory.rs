//! In-memory backing storage.
//!
//! Keeps one table of [`Record`]s per registered category and a flat file
//! map. Statements are compiled through the shared [`StatementCache`] and
//! executed by [`MemoryBackend`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value as Json;

use crate::storage::connection::{Connection, ConnectionStatus};
use crate::storage::descriptor::StatementDescriptor;
use crate::storage::error::{DescriptorParsingError, StatementExecutionError, StorageError};
use crate::storage::prepared::{self, PreparedStatement, StatementCache};
use crate::storage::statement::{
    BoundQuery, BoundWrite, ComparisonOperator, DEFAULT_STATUS_SUCCESS, Expression, QueryKind,
    SortDirection, WriteKind,
};
use crate::storage::traits::{StatementBackend, Storage};
use crate::storage::types::{Category, Key, Pojo, Record};

/// Connection URL reported by [`MemoryStorage`].
pub const MEMORY_URL: &str = "memory://";

// =============================================================================
// Storage
// =============================================================================

/// Process-local storage engine.
pub struct MemoryStorage {
    backend: Arc<MemoryBackend>,
    cache: StatementCache,
    connection: Arc<Connection>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::default()),
            cache: StatementCache::new(),
            connection: Arc::new(Connection::new(MEMORY_URL, ConnectionStatus::Connected)),
        }
    }

    /// Number of records currently stored under `category`.
    pub fn record_count(&self, category: &str) -> Option<usize> {
        self.backend
            .tables
            .read()
            .get(category)
            .map(|table| table.records.len())
    }

    /// Number of distinct statements compiled so far.
    pub fn compiled_statements(&self) -> usize {
        self.cache.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn register_category<T: Pojo>(&self, category: &Category<T>) -> Result<(), StorageError> {
        let mut tables = self.backend.tables.write();
        match tables.get(category.name()) {
            Some(table) if table.keys == category.keys() => Ok(()),
            Some(_) => Err(StorageError::InvalidCategory(format!(
                "category '{}' is already registered with different keys",
                category.name()
            ))),
            None => {
                tracing::debug!(category = %category.name(), keys = category.keys().len(), "Category registered");
                tables.insert(
                    category.name().to_string(),
                    Table {
                        keys: category.keys().to_vec(),
                        records: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn prepare_statement<T: Pojo>(
        &self,
        descriptor: &StatementDescriptor<T>,
    ) -> Result<Box<dyn PreparedStatement<T>>, DescriptorParsingError> {
        let backend: Arc<dyn StatementBackend> = self.backend.clone();
        prepared::prepare(&self.cache, backend, descriptor)
    }

    fn save_file(&self, name: &str, mut data: Box<dyn Read + Send>) -> Result<(), StorageError> {
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)?;
        tracing::debug!(file = %name, size = bytes.len(), "File saved");
        self.backend.files.write().insert(name.to_string(), bytes);
        Ok(())
    }

    fn load_file(&self, name: &str) -> Result<Option<Box<dyn Read + Send>>, StorageError> {
        Ok(self.backend.files.read().get(name).map(|bytes| {
            let reader: Box<dyn Read + Send> = Box::new(io::Cursor::new(bytes.clone()));
            reader
        }))
    }

    fn purge(&self, agent_id: &str) -> Result<(), StorageError> {
        let agent = Json::from(agent_id);
        let mut removed = 0;
        for table in self.backend.tables.write().values_mut() {
            let before = table.records.len();
            table
                .records
                .retain(|record| record.get(Key::AGENT_ID.name()) != Some(&agent));
            removed += before - table.records.len();
        }
        tracing::info!(agent_id, removed, "Purged agent data");
        Ok(())
    }

    fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    fn shutdown(&self) {
        self.connection.set_status(ConnectionStatus::Disconnected);
    }
}

// =============================================================================
// Backend
// =============================================================================

struct Table {
    keys: Vec<Key>,
    records: Vec<Record>,
}

/// Executes bound statements against in-memory tables.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Table>>,
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl StatementBackend for MemoryBackend {
    fn find(&self, query: &BoundQuery) -> Result<Vec<Record>, StatementExecutionError> {
        let tables = self.tables.read();
        let table = tables
            .get(&query.category)
            .ok_or_else(|| StatementExecutionError::UnknownCategory(query.category.clone()))?;

        let mut rows: Vec<&Record> = table
            .records
            .iter()
            .filter(|record| matches(query.condition.as_ref(), record))
            .collect();

        if query.kind == QueryKind::Count {
            let mut count = Record::new();
            count.insert("count".to_string(), Json::from(rows.len() as i64));
            return Ok(vec![count]);
        }

        if !query.sort.is_empty() {
            rows.sort_by(|a, b| compare_records(&query.sort, a, b));
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows.into_iter().cloned().collect())
    }

    fn apply(&self, write: &BoundWrite) -> Result<i32, StatementExecutionError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&write.category)
            .ok_or_else(|| StatementExecutionError::UnknownCategory(write.category.clone()))?;
        let condition = write.condition.as_ref();

        let assignments = || {
            write
                .values
                .iter()
                .map(|(key, value)| (key.name().to_string(), value.to_json()))
        };

        let affected = match write.kind {
            WriteKind::Add => {
                table.records.push(assignments().collect());
                1
            }
            WriteKind::Replace => {
                table.records.retain(|record| !matches(condition, record));
                table.records.push(assignments().collect());
                1
            }
            WriteKind::Update => {
                let mut updated = 0;
                for record in table.records.iter_mut().filter(|r| matches(condition, r)) {
                    record.extend(assignments());
                    updated += 1;
                }
                updated
            }
            WriteKind::Remove => {
                let before = table.records.len();
                table.records.retain(|record| !matches(condition, record));
                before - table.records.len()
            }
        };

        tracing::trace!(statement = %write, affected, "Write applied");
        Ok(DEFAULT_STATUS_SUCCESS)
    }
}

// =============================================================================
// Evaluation
// =============================================================================

fn matches(condition: Option<&Expression>, record: &Record) -> bool {
    condition.is_none_or(|expr| evaluate(expr, record))
}

fn evaluate(expr: &Expression, record: &Record) -> bool {
    match expr {
        Expression::Compare { key, op, value } => match record.get(key.name()) {
            Some(field) => match compare_json(field, &value.to_json()) {
                Some(ordering) => op.holds(ordering),
                None => *op == ComparisonOperator::NotEqual,
            },
            None => *op == ComparisonOperator::NotEqual,
        },
        Expression::In { key, values } => match (record.get(key.name()), values.to_json()) {
            (Some(field), Json::Array(candidates)) => candidates
                .iter()
                .any(|candidate| compare_json(field, candidate) == Some(Ordering::Equal)),
            _ => false,
        },
        Expression::Not(inner) => !evaluate(inner, record),
        Expression::And(l, r) => evaluate(l, record) && evaluate(r, record),
        Expression::Or(l, r) => evaluate(l, record) || evaluate(r, record),
    }
}

/// Order two JSON values of the same kind; `None` if they are incomparable.
fn compare_json(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        (Json::Bool(x), Json::Bool(y)) => Some(x.cmp(y)),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

/// Missing fields sort first.
fn compare_records(sort: &[(Key, SortDirection)], a: &Record, b: &Record) -> Ordering {
    for (key, direction) in sort {
        let ordering = match (a.get(key.name()), b.get(key.name())) {
            (Some(x), Some(y)) => compare_json(x, y).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
