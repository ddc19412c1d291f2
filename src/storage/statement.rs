//! Statement kinds, filter expressions and the executable statement traits.
//!
//! A descriptor is compiled once into a [`ParsedStatement`], which is tagged at
//! compile time as either a read or a write. Patching it with parameters yields
//! a [`Statement`]: a [`Query`] producing a [`Cursor`] or a
//! [`DataModifyingStatement`] producing a status code. The tag never changes
//! after compilation.

use std::fmt;
use std::ops::Not;
use std::str::FromStr;

use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::cursor::Cursor;
use crate::storage::error::{IllegalPatchError, StatementExecutionError};
use crate::storage::types::{Key, Value, ValueType};

// =============================================================================
// Constants
// =============================================================================

/// Status returned by a write that was applied (or queued) successfully.
pub const DEFAULT_STATUS_SUCCESS: i32 = 0;

/// Status returned by a write the backend could not apply.
pub const DEFAULT_STATUS_FAILURE: i32 = -1;

// =============================================================================
// Kinds
// =============================================================================

/// Read verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum QueryKind {
    #[strum(serialize = "QUERY")]
    Select,
    #[strum(serialize = "QUERY-COUNT")]
    Count,
}

/// Write verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum WriteKind {
    Add,
    Replace,
    Update,
    Remove,
}

/// Read/write classification of a compiled statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Query(QueryKind),
    Write(WriteKind),
}

impl StatementKind {
    pub fn is_query(self) -> bool {
        matches!(self, Self::Query(_))
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Write(_))
    }
}

impl FromStr for StatementKind {
    type Err = strum::ParseError;

    /// Parse a descriptor verb. Verbs are case-sensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryKind::from_str(s)
            .map(Self::Query)
            .or_else(|_| WriteKind::from_str(s).map(Self::Write))
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(kind) => kind.fmt(f),
            Self::Write(kind) => kind.fmt(f),
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// Binary comparison in a `WHERE` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum ComparisonOperator {
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
}

impl ComparisonOperator {
    /// Whether the operator needs an ordered key type.
    pub fn is_ordering(self) -> bool {
        !matches!(self, Self::Equal | Self::NotEqual)
    }

    /// Apply the operator to the ordering of `left` relative to `right`.
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;

        match self {
            Self::Equal => ordering == Equal,
            Self::NotEqual => ordering != Equal,
            Self::Less => ordering == Less,
            Self::LessEqual => ordering != Greater,
            Self::Greater => ordering == Greater,
            Self::GreaterEqual => ordering != Less,
        }
    }
}

/// Sort direction in a `SORT` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum SortDirection {
    #[strum(serialize = "ASC")]
    Ascending,
    #[strum(serialize = "DSC")]
    Descending,
}

/// A bound boolean filter over the keys of a category.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `'key' op value`
    Compare {
        key: Key,
        op: ComparisonOperator,
        value: Value,
    },
    /// `'key' IN [values]`; `values` is a list value.
    In { key: Key, values: Value },
    Not(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn compare(key: Key, op: ComparisonOperator, value: impl Into<Value>) -> Self {
        Self::Compare {
            key,
            op,
            value: value.into(),
        }
    }

    pub fn equal_to(key: Key, value: impl Into<Value>) -> Self {
        Self::compare(key, ComparisonOperator::Equal, value)
    }

    pub fn not_equal_to(key: Key, value: impl Into<Value>) -> Self {
        Self::compare(key, ComparisonOperator::NotEqual, value)
    }

    pub fn less_than(key: Key, value: impl Into<Value>) -> Self {
        Self::compare(key, ComparisonOperator::Less, value)
    }

    pub fn greater_than(key: Key, value: impl Into<Value>) -> Self {
        Self::compare(key, ComparisonOperator::Greater, value)
    }

    pub fn is_in(key: Key, values: impl Into<Value>) -> Self {
        Self::In {
            key,
            values: values.into(),
        }
    }

    pub fn and(self, other: Expression) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expression) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }
}

impl Not for Expression {
    type Output = Expression;

    fn not(self) -> Self::Output {
        Expression::Not(Box::new(self))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { key, op, value } => write!(f, "'{}' {op} {value}", key.name()),
            Self::In { key, values } => write!(f, "'{}' IN {values}", key.name()),
            Self::Not(inner) => write!(f, "NOT {inner}"),
            Self::And(l, r) => write!(f, "({l} AND {r})"),
            Self::Or(l, r) => write!(f, "({l} OR {r})"),
        }
    }
}

// =============================================================================
// Parameters and bound statements
// =============================================================================

/// A value bound to a free parameter of a parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedParameter {
    pub index: usize,
    /// Type the caller declared for this parameter.
    pub value_type: ValueType,
    pub value: Value,
}

impl PreparedParameter {
    /// Parameter whose declared type is the type of `value`.
    pub fn new(index: usize, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            index,
            value_type: value.value_type(),
            value,
        }
    }

    /// Parameter with an explicitly declared type, checked against the value at patch time.
    pub fn typed(index: usize, value_type: ValueType, value: Value) -> Self {
        Self {
            index,
            value_type,
            value,
        }
    }
}

/// A fully bound read, ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub category: String,
    pub kind: QueryKind,
    pub condition: Option<Expression>,
    pub sort: Vec<(Key, SortDirection)>,
    pub limit: Option<usize>,
}

/// A fully bound write, ready for a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundWrite {
    pub category: String,
    pub kind: WriteKind,
    /// `SET` assignments in declaration order.
    pub values: Vec<(Key, Value)>,
    pub condition: Option<Expression>,
}

impl fmt::Display for BoundWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.category)?;
        for (i, (key, value)) in self.values.iter().enumerate() {
            let lead = if i == 0 { " SET" } else { "," };
            write!(f, "{lead} '{}' = {value}", key.name())?;
        }
        if let Some(condition) = &self.condition {
            write!(f, " WHERE {condition}")?;
        }
        Ok(())
    }
}

/// Result of binding parameters into a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundStatement {
    Query(BoundQuery),
    Write(BoundWrite),
}

// =============================================================================
// Executable statements
// =============================================================================

/// A read-only statement; executing it never mutates storage.
pub trait Query<T>: Send {
    fn category(&self) -> &str;

    /// Replace the filter.
    fn set_where(&mut self, expression: Expression);

    fn where_expression(&self) -> Option<&Expression>;

    /// Append a sort key after any existing ones.
    fn sort(&mut self, key: Key, direction: SortDirection);

    fn limit(&mut self, limit: usize);

    fn execute(self: Box<Self>) -> Result<Cursor<T>, StatementExecutionError>;
}

/// A write; applying it returns a status code, never data.
pub trait DataModifyingStatement<T>: Send {
    fn category(&self) -> &str;

    fn apply(self: Box<Self>) -> Result<i32, StatementExecutionError>;
}

/// A patched statement, tagged by its compile-time kind.
pub enum Statement<T> {
    Query(Box<dyn Query<T>>),
    Write(Box<dyn DataModifyingStatement<T>>),
}

impl<T> fmt::Debug for Statement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(q) => f.debug_tuple("Query").field(&q.category()).finish(),
            Self::Write(w) => f.debug_tuple("Write").field(&w.category()).finish(),
        }
    }
}

/// Compiled form of a descriptor.
///
/// Shared across threads and re-patched any number of times.
pub trait ParsedStatement<T>: Send + Sync {
    /// Descriptor text this statement was compiled from.
    fn descriptor(&self) -> &str;

    fn kind(&self) -> StatementKind;

    /// Declared type of each free parameter, by index.
    fn signature(&self) -> &[ValueType];

    fn num_params(&self) -> usize {
        self.signature().len()
    }

    /// Bind `params` and produce an executable statement of the compiled kind.
    ///
    /// # Errors
    /// Returns `IllegalPatchError` if the parameters do not exactly match
    /// [`signature`](Self::signature).
    fn patch(&self, params: &[PreparedParameter]) -> Result<Statement<T>, IllegalPatchError>;
}
