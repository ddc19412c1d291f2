//! Lazy, single-pass, forward-only result cursor.

use std::fmt;
use std::iter::Peekable;

use crate::storage::StorageError;
use crate::storage::types::{Pojo, Record};

type Rows<T> = Box<dyn Iterator<Item = Result<T, StorageError>> + Send>;

/// Results of a query, produced one at a time.
///
/// Rows are only materialized (deserialized) when advanced to.
pub struct Cursor<T> {
    rows: Peekable<Rows<T>>,
}

impl<T> Cursor<T> {
    pub fn new<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Result<T, StorageError>>,
        I::IntoIter: Send + 'static,
    {
        let rows: Rows<T> = Box::new(rows.into_iter());
        Self {
            rows: rows.peekable(),
        }
    }

    pub fn empty() -> Self
    where
        T: Send + 'static,
    {
        Self::new(std::iter::empty())
    }

    pub fn has_next(&mut self) -> bool {
        self.rows.peek().is_some()
    }

    /// Advance to the next row.
    ///
    /// # Errors
    /// `StorageError::NoSuchElement` once the cursor is exhausted, or the
    /// row's own deserialization error.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<T, StorageError> {
        self.rows.next().unwrap_or(Err(StorageError::NoSuchElement))
    }

    /// First row, if any. Consumes the cursor.
    pub fn head(mut self) -> Result<Option<T>, StorageError> {
        self.rows.next().transpose()
    }

    /// Drain every remaining row, stopping at the first error.
    pub fn collect_all(self) -> Result<Vec<T>, StorageError> {
        self.rows.collect()
    }
}

impl<T: Pojo> Cursor<T> {
    /// Cursor that deserializes each record into `T` as it is reached.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self::new(records.into_iter().map(|record| {
            serde_json::from_value(serde_json::Value::Object(record)).map_err(StorageError::from)
        }))
    }
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").finish_non_exhaustive()
    }
}
