//! Statement descriptors and their compiled form.
//!
//! A descriptor is a short text in a narrow CRUD language, for example
//!
//! ```text
//! ADD vm-info SET 'agentId' = ?s , 'vmId' = ?s , 'timeStamp' = ?l
//! QUERY vm-info WHERE 'vmId' = ?s AND 'timeStamp' > ?l SORT 'timeStamp' DSC LIMIT 1
//! QUERY-COUNT vm-info WHERE 'agentId' = ?s
//! ```
//!
//! Compilation checks the text against the category schema and records the
//! type of every free parameter (`?s`, `?l[`, ...). Binding later only has to
//! check the supplied parameters against that signature.

mod lexer;
mod parser;

use std::fmt;

use crate::storage::error::{DescriptorParsingError, IllegalPatchError};
use crate::storage::statement::{
    BoundQuery, BoundStatement, BoundWrite, ComparisonOperator, Expression, PreparedParameter,
    SortDirection, StatementKind,
};
use crate::storage::types::{Category, Key, Schema, Value, ValueType};

// =============================================================================
// Descriptor
// =============================================================================

/// A descriptor text paired with the category it operates on.
pub struct StatementDescriptor<T> {
    category: Category<T>,
    descriptor: String,
}

impl<T> StatementDescriptor<T> {
    pub fn new(category: Category<T>, descriptor: impl Into<String>) -> Self {
        Self {
            category,
            descriptor: descriptor.into(),
        }
    }

    pub fn category(&self) -> &Category<T> {
        &self.category
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Compile against the descriptor's own category.
    pub fn compile(&self) -> Result<CompiledStatement, DescriptorParsingError> {
        compile(self.category.schema(), &self.descriptor)
    }
}

impl<T> Clone for StatementDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            category: self.category.clone(),
            descriptor: self.descriptor.clone(),
        }
    }
}

impl<T> fmt::Debug for StatementDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementDescriptor")
            .field("category", &self.category.name())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<T> fmt::Display for StatementDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

/// Compile `descriptor` against `schema`.
///
/// # Errors
/// Returns `DescriptorParsingError` if the text is malformed, names another
/// category, references unknown keys, or mistypes a term.
pub fn compile(schema: &Schema, descriptor: &str) -> Result<CompiledStatement, DescriptorParsingError> {
    let tokens = lexer::tokenize(descriptor)
        .map_err(|message| DescriptorParsingError::new(descriptor, message))?;
    parser::Parser::new(schema, descriptor, tokens)
        .parse()
        .map_err(|message| DescriptorParsingError::new(descriptor, message))
}

// =============================================================================
// Compiled form
// =============================================================================

/// Right-hand side of an assignment or comparison.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Term {
    Param(usize),
    Literal(Value),
}

impl Term {
    fn resolve(&self, values: &[&Value]) -> Value {
        match self {
            Self::Param(index) => values[*index].clone(),
            Self::Literal(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Condition {
    Compare {
        key: Key,
        op: ComparisonOperator,
        term: Term,
    },
    In {
        key: Key,
        term: Term,
    },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    fn bind(&self, values: &[&Value]) -> Expression {
        match self {
            Self::Compare { key, op, term } => Expression::Compare {
                key: key.clone(),
                op: *op,
                value: term.resolve(values),
            },
            Self::In { key, term } => Expression::In {
                key: key.clone(),
                values: term.resolve(values),
            },
            Self::Not(inner) => Expression::Not(Box::new(inner.bind(values))),
            Self::And(l, r) => Expression::And(Box::new(l.bind(values)), Box::new(r.bind(values))),
            Self::Or(l, r) => Expression::Or(Box::new(l.bind(values)), Box::new(r.bind(values))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Limit {
    Fixed(usize),
    Param(usize),
}

/// A descriptor that passed every prepare-time check.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub(crate) descriptor: String,
    pub(crate) category: String,
    pub(crate) kind: StatementKind,
    pub(crate) signature: Vec<ValueType>,
    pub(crate) set_list: Vec<(Key, Term)>,
    pub(crate) condition: Option<Condition>,
    pub(crate) sort: Vec<(Key, SortDirection)>,
    pub(crate) limit: Option<Limit>,
}

impl CompiledStatement {
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn signature(&self) -> &[ValueType] {
        &self.signature
    }

    /// Substitute `params` for the free parameters.
    ///
    /// # Errors
    /// Returns `IllegalPatchError` unless exactly one parameter of the declared
    /// type is supplied for every index, and any bound limit is positive.
    pub fn bind(&self, params: &[PreparedParameter]) -> Result<BoundStatement, IllegalPatchError> {
        let values = self.resolve_params(params)?;
        let condition = self.condition.as_ref().map(|c| c.bind(&values));

        match self.kind {
            StatementKind::Query(kind) => {
                let limit = match self.limit {
                    None => None,
                    Some(Limit::Fixed(n)) => Some(n),
                    Some(Limit::Param(index)) => Some(positive_limit(index, values[index])?),
                };
                Ok(BoundStatement::Query(BoundQuery {
                    category: self.category.clone(),
                    kind,
                    condition,
                    sort: self.sort.clone(),
                    limit,
                }))
            }
            StatementKind::Write(kind) => Ok(BoundStatement::Write(BoundWrite {
                category: self.category.clone(),
                kind,
                values: self
                    .set_list
                    .iter()
                    .map(|(key, term)| (key.clone(), term.resolve(&values)))
                    .collect(),
                condition,
            })),
        }
    }

    fn resolve_params<'a>(
        &self,
        params: &'a [PreparedParameter],
    ) -> Result<Vec<&'a Value>, IllegalPatchError> {
        let count = self.signature.len();
        if params.len() != count {
            return Err(IllegalPatchError::ParameterCount {
                expected: count,
                actual: params.len(),
            });
        }

        let mut slots: Vec<Option<&Value>> = vec![None; count];
        for param in params {
            let index = param.index;
            let expected = *self
                .signature
                .get(index)
                .ok_or(IllegalPatchError::IndexOutOfRange { index, count })?;
            if slots[index].is_some() {
                return Err(IllegalPatchError::Duplicate { index });
            }
            for actual in [param.value_type, param.value.value_type()] {
                if actual != expected {
                    return Err(IllegalPatchError::TypeMismatch {
                        index,
                        expected,
                        actual,
                    });
                }
            }
            if !param.value.is_finite() {
                return Err(IllegalPatchError::NonFiniteDouble { index });
            }
            slots[index] = Some(&param.value);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(IllegalPatchError::Unbound { index }))
            .collect()
    }
}

fn positive_limit(index: usize, value: &Value) -> Result<usize, IllegalPatchError> {
    match value {
        Value::Int(n) if *n > 0 => Ok(*n as usize),
        Value::Int(n) => Err(IllegalPatchError::InvalidLimit(i64::from(*n))),
        other => Err(IllegalPatchError::TypeMismatch {
            index,
            expected: ValueType::Int,
            actual: other.value_type(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::statement::{QueryKind, WriteKind};
    use crate::storage::types::Record;

    fn vm_info() -> Category<Record> {
        Category::new(
            "vm-info",
            [
                Key::AGENT_ID,
                Key::VM_ID,
                Key::TIMESTAMP,
                Key::new("alive", ValueType::Boolean),
                Key::new("heapMb", ValueType::Double),
                Key::new("threads", ValueType::Int),
            ],
        )
        .unwrap()
    }

    fn compile_ok(text: &str) -> CompiledStatement {
        StatementDescriptor::new(vm_info(), text).compile().unwrap()
    }

    fn compile_err(text: &str) -> String {
        StatementDescriptor::new(vm_info(), text)
            .compile()
            .unwrap_err()
            .message
    }

    // =========================================================================
    // Compilation
    // =========================================================================

    #[test]
    fn test_compile_add_records_signature() {
        let stmt = compile_ok("ADD vm-info SET 'agentId' = ?s , 'vmId' = ?s , 'timeStamp' = ?l");

        assert_eq!(stmt.kind(), StatementKind::Write(WriteKind::Add));
        assert_eq!(
            stmt.signature(),
            &[ValueType::String, ValueType::String, ValueType::Long]
        );
    }

    #[test]
    fn test_compile_query_with_all_clauses() {
        let stmt = compile_ok(
            "QUERY vm-info WHERE 'agentId' = ?s AND NOT 'timeStamp' <= ?l OR 'vmId' IN ?s[ \
             SORT 'timeStamp' DSC , 'vmId' ASC LIMIT ?i",
        );

        assert_eq!(stmt.kind(), StatementKind::Query(QueryKind::Select));
        assert_eq!(
            stmt.signature(),
            &[
                ValueType::String,
                ValueType::Long,
                ValueType::StringList,
                ValueType::Int
            ]
        );
        assert_eq!(stmt.sort.len(), 2);
        assert_eq!(stmt.limit, Some(Limit::Param(3)));
    }

    #[test]
    fn test_compile_literals() {
        let stmt = compile_ok(
            "UPDATE vm-info SET 'alive' = false , 'heapMb' = 12.5 , 'threads' = 8 \
             WHERE 'vmId' = 'vm-42' AND 'timeStamp' >= 100L",
        );

        assert!(stmt.signature().is_empty());
        assert_eq!(
            stmt.set_list,
            vec![
                (Key::new("alive", ValueType::Boolean), Term::Literal(Value::Boolean(false))),
                (Key::new("heapMb", ValueType::Double), Term::Literal(Value::Double(12.5))),
                (Key::new("threads", ValueType::Int), Term::Literal(Value::Int(8))),
            ]
        );
    }

    #[test]
    fn test_compile_rejects_category_mismatch() {
        let message = compile_err("QUERY host-info");
        assert!(message.contains("host-info"), "{message}");
    }

    #[test]
    fn test_compile_rejects_unknown_key() {
        let message = compile_err("QUERY vm-info WHERE 'pid' = ?i");
        assert!(message.contains("unknown key 'pid'"), "{message}");
    }

    #[test]
    fn test_compile_rejects_type_mismatch() {
        assert!(compile_err("ADD vm-info SET 'timeStamp' = ?s").contains("timeStamp"));
        assert!(compile_err("QUERY vm-info WHERE 'timeStamp' = 100").contains("timeStamp"));
        assert!(compile_err("QUERY vm-info WHERE 'vmId' IN ?s").contains("vmId"));
        assert!(compile_err("QUERY vm-info WHERE 'alive' < ?b").contains("ordered"));
    }

    #[test]
    fn test_compile_enforces_clause_rules() {
        assert!(compile_err("ADD vm-info").contains("SET"));
        assert!(compile_err("ADD vm-info SET 'vmId' = ?s WHERE 'vmId' = ?s").contains("WHERE"));
        assert!(compile_err("UPDATE vm-info SET 'vmId' = ?s").contains("WHERE"));
        assert!(compile_err("REMOVE vm-info LIMIT 1").contains("LIMIT"));
        assert!(compile_err("QUERY vm-info SET 'vmId' = ?s").contains("SET"));
        assert!(compile_err("QUERY-COUNT vm-info SORT 'vmId' ASC").contains("SORT"));
        assert!(compile_err("QUERY vm-info LIMIT 0").contains("positive"));
        assert!(compile_err("QUERY vm-info LIMIT ?l").contains("int"));
    }

    #[test]
    fn test_compile_rejects_duplicate_set_key() {
        let message = compile_err("ADD vm-info SET 'vmId' = ?s , 'vmId' = ?s");
        assert!(message.contains("more than once"), "{message}");
    }

    #[test]
    fn test_compile_rejects_syntax_errors() {
        compile_err("");
        compile_err("SELECT vm-info");
        compile_err("QUERY vm-info WHERE 'vmId' = ");
        compile_err("QUERY vm-info WHERE 'vmId' ?s");
        compile_err("QUERY vm-info WHERE 'vmId = ?s");
        compile_err("QUERY vm-info SORT 'vmId' UP");
        compile_err("QUERY vm-info LIMIT 1 extra");
        compile_err("ADD vm-info SET 'vmId' = ?x");
    }

    // =========================================================================
    // Binding
    // =========================================================================

    #[test]
    fn test_bind_query() {
        let stmt = compile_ok("QUERY vm-info WHERE 'vmId' = ?s SORT 'timeStamp' DSC LIMIT ?i");
        let bound = stmt
            .bind(&[PreparedParameter::new(1, 5), PreparedParameter::new(0, "vm-42")])
            .unwrap();

        assert_eq!(
            bound,
            BoundStatement::Query(BoundQuery {
                category: "vm-info".to_string(),
                kind: QueryKind::Select,
                condition: Some(Expression::equal_to(Key::VM_ID, "vm-42")),
                sort: vec![(Key::TIMESTAMP, SortDirection::Descending)],
                limit: Some(5),
            })
        );
    }

    #[test]
    fn test_bind_write() {
        let stmt = compile_ok("ADD vm-info SET 'vmId' = ?s , 'timeStamp' = ?l");
        let bound = stmt
            .bind(&[PreparedParameter::new(0, "vm-42"), PreparedParameter::new(1, 100i64)])
            .unwrap();

        let BoundStatement::Write(write) = bound else {
            panic!("expected a write");
        };
        assert_eq!(write.kind, WriteKind::Add);
        assert_eq!(
            write.values,
            vec![(Key::VM_ID, Value::from("vm-42")), (Key::TIMESTAMP, Value::Long(100))]
        );
        assert_eq!(write.condition, None);
    }

    #[test]
    fn test_bind_rejects_bad_parameters() {
        let stmt = compile_ok("ADD vm-info SET 'vmId' = ?s , 'timeStamp' = ?l");

        assert_eq!(
            stmt.bind(&[PreparedParameter::new(0, "vm-42")]),
            Err(IllegalPatchError::ParameterCount {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            stmt.bind(&[PreparedParameter::new(0, "vm-42"), PreparedParameter::new(1, 100)]),
            Err(IllegalPatchError::TypeMismatch {
                index: 1,
                expected: ValueType::Long,
                actual: ValueType::Int
            })
        );
        assert_eq!(
            stmt.bind(&[PreparedParameter::new(0, "a"), PreparedParameter::new(0, "b")]),
            Err(IllegalPatchError::Duplicate { index: 0 })
        );
        assert_eq!(
            stmt.bind(&[PreparedParameter::new(0, "a"), PreparedParameter::new(2, 1i64)]),
            Err(IllegalPatchError::IndexOutOfRange { index: 2, count: 2 })
        );
        assert_eq!(
            stmt.bind(&[
                PreparedParameter::new(0, "a"),
                PreparedParameter::typed(1, ValueType::Long, Value::Int(1)),
            ]),
            Err(IllegalPatchError::TypeMismatch {
                index: 1,
                expected: ValueType::Long,
                actual: ValueType::Int
            })
        );
    }

    #[test]
    fn test_bind_rejects_non_finite_doubles() {
        let cpu = Category::<Record>::new(
            "cpu-stats",
            [Key::VM_ID, Key::new("cpuLoad", ValueType::Double)],
        )
        .unwrap();
        let stmt = compile(cpu.schema(), "ADD cpu-stats SET 'vmId' = ?s , 'cpuLoad' = ?d").unwrap();

        for load in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                stmt.bind(&[PreparedParameter::new(0, "vm-1"), PreparedParameter::new(1, load)]),
                Err(IllegalPatchError::NonFiniteDouble { index: 1 })
            );
        }
        assert!(
            stmt.bind(&[PreparedParameter::new(0, "vm-1"), PreparedParameter::new(1, 0.5)])
                .is_ok()
        );
    }

    #[test]
    fn test_bind_rejects_non_positive_limit() {
        let stmt = compile_ok("QUERY vm-info LIMIT ?i");
        assert_eq!(
            stmt.bind(&[PreparedParameter::new(0, 0)]),
            Err(IllegalPatchError::InvalidLimit(0))
        );
    }
}
