//! Core data types for the storage layer.
//!
//! This module defines the schema vocabulary every statement is checked against:
//!
//! - [`Category`]: a named collection of entities with an ordered key set
//! - [`Key`]: a named, typed field of a category
//! - [`ValueType`] / [`Value`]: the closed set of types a key or parameter may carry
//! - [`Pojo`]: marker for entity types persisted under a category

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::StorageError;

/// A JSON object, the unit of storage in document-shaped backends.
pub type Record = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Pojo
// =============================================================================

/// Marker for entity types persisted under a [`Category`].
///
/// Any serde round-trippable type qualifies; backends exchange pojos as
/// [`Record`]s.
pub trait Pojo: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Schema-less pojo, used when categories are declared at runtime.
impl Pojo for Record {}

/// Result row of a `QUERY-COUNT` statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCount {
    /// Number of matching entities.
    pub count: i64,
}

impl Pojo for AggregateCount {}

// =============================================================================
// Value types
// =============================================================================

/// Type of a key or of a statement parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
pub enum ValueType {
    #[serde(rename = "string")]
    #[strum(serialize = "string")]
    String,
    #[serde(rename = "int")]
    #[strum(serialize = "int")]
    Int,
    #[serde(rename = "long")]
    #[strum(serialize = "long")]
    Long,
    #[serde(rename = "double")]
    #[strum(serialize = "double")]
    Double,
    #[serde(rename = "boolean")]
    #[strum(serialize = "boolean")]
    Boolean,
    #[serde(rename = "pojo")]
    #[strum(serialize = "pojo")]
    Pojo,
    #[serde(rename = "string[]")]
    #[strum(serialize = "string[]")]
    StringList,
    #[serde(rename = "int[]")]
    #[strum(serialize = "int[]")]
    IntList,
    #[serde(rename = "long[]")]
    #[strum(serialize = "long[]")]
    LongList,
    #[serde(rename = "double[]")]
    #[strum(serialize = "double[]")]
    DoubleList,
    #[serde(rename = "boolean[]")]
    #[strum(serialize = "boolean[]")]
    BooleanList,
    #[serde(rename = "pojo[]")]
    #[strum(serialize = "pojo[]")]
    PojoList,
}

impl ValueType {
    /// List type whose elements are of this type, or `None` for list types.
    pub fn list_of(self) -> Option<ValueType> {
        match self {
            Self::String => Some(Self::StringList),
            Self::Int => Some(Self::IntList),
            Self::Long => Some(Self::LongList),
            Self::Double => Some(Self::DoubleList),
            Self::Boolean => Some(Self::BooleanList),
            Self::Pojo => Some(Self::PojoList),
            _ => None,
        }
    }

    pub fn is_list(self) -> bool {
        self.list_of().is_none()
    }

    /// Whether `<`, `<=`, `>` and `>=` are meaningful for this type.
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::String | Self::Int | Self::Long | Self::Double)
    }
}

/// A typed value bound to a parameter or stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Pojo(serde_json::Value),
    StringList(Vec<String>),
    IntList(Vec<i32>),
    LongList(Vec<i64>),
    DoubleList(Vec<f64>),
    BooleanList(Vec<bool>),
    PojoList(Vec<serde_json::Value>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Int(_) => ValueType::Int,
            Self::Long(_) => ValueType::Long,
            Self::Double(_) => ValueType::Double,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Pojo(_) => ValueType::Pojo,
            Self::StringList(_) => ValueType::StringList,
            Self::IntList(_) => ValueType::IntList,
            Self::LongList(_) => ValueType::LongList,
            Self::DoubleList(_) => ValueType::DoubleList,
            Self::BooleanList(_) => ValueType::BooleanList,
            Self::PojoList(_) => ValueType::PojoList,
        }
    }

    /// `false` for a NaN or infinite double, or a list holding one.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Double(v) => v.is_finite(),
            Self::DoubleList(v) => v.iter().all(|d| d.is_finite()),
            _ => true,
        }
    }

    /// JSON representation as stored in a [`Record`].
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::String(s) => Json::from(s.as_str()),
            Self::Int(v) => Json::from(*v),
            Self::Long(v) => Json::from(*v),
            Self::Double(v) => Json::from(*v),
            Self::Boolean(v) => Json::from(*v),
            Self::Pojo(v) => v.clone(),
            Self::StringList(v) => Json::from(v.clone()),
            Self::IntList(v) => Json::from(v.clone()),
            Self::LongList(v) => Json::from(v.clone()),
            Self::DoubleList(v) => Json::from(v.clone()),
            Self::BooleanList(v) => Json::from(v.clone()),
            Self::PojoList(v) => Json::Array(v.clone()),
        }
    }

    /// Convert an untyped JSON value into a value of type `ty`.
    ///
    /// Returns `None` if the JSON shape does not fit; integers are range-checked
    /// and never truncated.
    pub fn from_json(ty: ValueType, json: &serde_json::Value) -> Option<Value> {
        fn list<T>(
            json: &serde_json::Value,
            item: impl Fn(&serde_json::Value) -> Option<T>,
        ) -> Option<Vec<T>> {
            json.as_array()?.iter().map(item).collect()
        }
        let int = |v: &serde_json::Value| v.as_i64().and_then(|n| i32::try_from(n).ok());

        match ty {
            ValueType::String => json.as_str().map(|s| Self::String(s.to_string())),
            ValueType::Int => int(json).map(Self::Int),
            ValueType::Long => json.as_i64().map(Self::Long),
            ValueType::Double => json.as_f64().map(Self::Double),
            ValueType::Boolean => json.as_bool().map(Self::Boolean),
            ValueType::Pojo => json.is_object().then(|| Self::Pojo(json.clone())),
            ValueType::StringList => {
                list(json, |v| v.as_str().map(str::to_string)).map(Self::StringList)
            }
            ValueType::IntList => list(json, int).map(Self::IntList),
            ValueType::LongList => list(json, serde_json::Value::as_i64).map(Self::LongList),
            ValueType::DoubleList => list(json, serde_json::Value::as_f64).map(Self::DoubleList),
            ValueType::BooleanList => {
                list(json, serde_json::Value::as_bool).map(Self::BooleanList)
            }
            ValueType::PojoList => {
                list(json, |v| v.is_object().then(|| v.clone())).map(Self::PojoList)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "'{s}'"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_value_from! {
    &str => String,
    String => String,
    i32 => Int,
    i64 => Long,
    f64 => Double,
    bool => Boolean,
    Vec<String> => StringList,
    Vec<i32> => IntList,
    Vec<i64> => LongList,
    Vec<f64> => DoubleList,
    Vec<bool> => BooleanList,
}

// =============================================================================
// Key
// =============================================================================

/// A named, typed field of a category.
///
/// Keys compare by name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    name: Cow<'static, str>,
    value_type: ValueType,
}

impl Key {
    /// Agent that produced the entity.
    pub const AGENT_ID: Key = Key::new("agentId", ValueType::String);
    /// VM the entity belongs to.
    pub const VM_ID: Key = Key::new("vmId", ValueType::String);
    /// Sample time, milliseconds since the epoch.
    pub const TIMESTAMP: Key = Key::new("timeStamp", ValueType::Long);

    pub const fn new(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name: Cow::Borrowed(name),
            value_type,
        }
    }

    /// Key whose name is only known at runtime.
    pub fn owned(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            value_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value_type)
    }
}

// =============================================================================
// Category
// =============================================================================

/// The untyped part of a category: what the descriptor compiler checks against.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Schema {
    name: String,
    keys: Vec<Key>,
    index_keys: Vec<Key>,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn index_keys(&self) -> &[Key] {
        &self.index_keys
    }

    /// Look up a key by name.
    pub fn key(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name() == name)
    }
}

/// Schema declaration for a named collection of `T`-shaped entities.
///
/// Immutable and cheap to clone. Registered once with a storage and kept for
/// the process lifetime.
pub struct Category<T> {
    schema: Arc<Schema>,
    _pojo: PhantomData<fn() -> T>,
}

impl<T> Category<T> {
    /// Create a category without index keys.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidCategory` if the name is empty or a key
    /// name repeats.
    pub fn new(
        name: impl Into<String>,
        keys: impl IntoIterator<Item = Key>,
    ) -> Result<Self, StorageError> {
        Self::with_index_keys(name, keys, [])
    }

    /// Create a category whose identity is given by `index_keys`.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidCategory` if the name is empty, a key name
    /// repeats, or an index key is not one of `keys`.
    pub fn with_index_keys(
        name: impl Into<String>,
        keys: impl IntoIterator<Item = Key>,
        index_keys: impl IntoIterator<Item = Key>,
    ) -> Result<Self, StorageError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StorageError::InvalidCategory(
                "category name is empty".to_string(),
            ));
        }
        if name.chars().any(|c| c.is_whitespace() || c == '\'') {
            return Err(StorageError::InvalidCategory(format!(
                "category name '{name}' contains whitespace or quotes"
            )));
        }

        let keys: Vec<Key> = keys.into_iter().collect();
        let mut seen = HashSet::new();
        for key in &keys {
            if !seen.insert(key.name()) {
                return Err(StorageError::InvalidCategory(format!(
                    "category '{name}' declares key '{}' twice",
                    key.name()
                )));
            }
        }

        let index_keys: Vec<Key> = index_keys.into_iter().collect();
        if let Some(stray) = index_keys.iter().find(|k| !keys.contains(k)) {
            return Err(StorageError::InvalidCategory(format!(
                "index key '{stray}' is not a key of category '{name}'"
            )));
        }

        Ok(Self {
            schema: Arc::new(Schema {
                name,
                keys,
                index_keys,
            }),
            _pojo: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn keys(&self) -> &[Key] {
        self.schema.keys()
    }

    pub fn index_keys(&self) -> &[Key] {
        self.schema.index_keys()
    }

    pub fn key(&self, name: &str) -> Option<&Key> {
        self.schema.key(name)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The same schema, yielding a different pojo type.
    ///
    /// Used to read aggregate results (e.g. [`AggregateCount`]) from a category.
    pub fn adapt<U>(&self) -> Category<U> {
        Category {
            schema: Arc::clone(&self.schema),
            _pojo: PhantomData,
        }
    }
}

impl<T> Clone for Category<T> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            _pojo: PhantomData,
        }
    }
}

impl<T> PartialEq for Category<T> {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema
    }
}

impl<T> Eq for Category<T> {}

impl<T> fmt::Debug for Category<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Category")
            .field("name", &self.schema.name)
            .field("keys", &self.schema.keys)
            .field("index_keys", &self.schema.index_keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // =========================================================================
    // ValueType tests
    // =========================================================================

    #[test]
    fn test_value_type_from_str() {
        assert_eq!(ValueType::from_str("string").unwrap(), ValueType::String);
        assert_eq!(ValueType::from_str("long[]").unwrap(), ValueType::LongList);
        assert!(ValueType::from_str("float").is_err());
    }

    #[test]
    fn test_value_type_list_of() {
        assert_eq!(ValueType::Long.list_of(), Some(ValueType::LongList));
        assert_eq!(ValueType::LongList.list_of(), None);
        assert!(ValueType::PojoList.is_list());
        assert!(!ValueType::Pojo.is_list());
    }

    #[test]
    fn test_value_type_yaml_names() {
        let ty: ValueType = serde_yaml::from_str("boolean[]").unwrap();
        assert_eq!(ty, ValueType::BooleanList);
        assert_eq!(serde_yaml::to_string(&ValueType::Int).unwrap().trim(), "int");
    }

    // =========================================================================
    // Value tests
    // =========================================================================

    #[test]
    fn test_value_from_json_checks_range() {
        let big = serde_json::json!(5_000_000_000i64);
        assert_eq!(Value::from_json(ValueType::Int, &big), None);
        assert_eq!(
            Value::from_json(ValueType::Long, &big),
            Some(Value::Long(5_000_000_000))
        );
        assert_eq!(
            Value::from_json(ValueType::LongList, &serde_json::json!([1, 2, 3])),
            Some(Value::LongList(vec![1, 2, 3]))
        );
        assert_eq!(
            Value::from_json(ValueType::StringList, &serde_json::json!(["a", 1])),
            None
        );
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("vm-42").to_string(), "'vm-42'");
        assert_eq!(Value::from(200i64).to_string(), "200");
        assert_eq!(Value::from(vec![1i64, 2]).to_string(), "[1,2]");
    }

    // =========================================================================
    // Key / Category tests
    // =========================================================================

    #[test]
    fn test_key_equality_uses_name_and_type() {
        assert_eq!(Key::VM_ID, Key::owned("vmId", ValueType::String));
        assert_ne!(Key::VM_ID, Key::owned("vmId", ValueType::Long));
        assert_eq!(Key::TIMESTAMP.to_string(), "timeStamp: long");
    }

    #[test]
    fn test_category_rejects_duplicate_keys() {
        let result =
            Category::<Record>::new("vm-info", [Key::VM_ID, Key::VM_ID, Key::AGENT_ID]);
        assert!(matches!(result, Err(StorageError::InvalidCategory(_))));
    }

    #[test]
    fn test_category_rejects_foreign_index_key() {
        let result = Category::<Record>::with_index_keys(
            "vm-info",
            [Key::AGENT_ID, Key::VM_ID],
            [Key::TIMESTAMP],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_category_rejects_bad_names() {
        assert!(Category::<Record>::new("", [Key::AGENT_ID]).is_err());
        assert!(Category::<Record>::new("vm info", [Key::AGENT_ID]).is_err());
    }

    #[test]
    fn test_category_adapt_shares_schema() {
        let category =
            Category::<Record>::with_index_keys("vm-info", [Key::AGENT_ID, Key::VM_ID], [
                Key::VM_ID,
            ])
            .unwrap();
        let counts: Category<AggregateCount> = category.adapt();

        assert_eq!(counts.name(), "vm-info");
        assert_eq!(counts.keys(), category.keys());
        assert_eq!(counts.index_keys(), &[Key::VM_ID]);
        assert_eq!(category.key("agentId"), Some(&Key::AGENT_ID));
        assert_eq!(category.key("missing"), None);
    }
}
