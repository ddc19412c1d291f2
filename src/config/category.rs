//! Category and statement declarations.

use serde::{Deserialize, Serialize};

use crate::storage::{Category, Key, Record, StorageError, Value, ValueType};

use super::validation::{ConfigError, expand_env_vars};

/// A typed key of a declared category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub value_type: ValueType,
}

/// A category declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,

    pub keys: Vec<KeyConfig>,

    /// Names of the keys forming the entity identity.
    #[serde(default)]
    pub index_keys: Vec<String>,
}

impl CategoryConfig {
    /// Build the runtime category. Entities are untyped [`Record`]s.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidCategory` for an invalid schema or an
    /// index key that names no key.
    pub fn to_category(&self) -> Result<Category<Record>, StorageError> {
        let keys: Vec<Key> = self
            .keys
            .iter()
            .map(|k| Key::owned(k.name.clone(), k.value_type))
            .collect();

        let index_keys = self
            .index_keys
            .iter()
            .map(|name| {
                keys.iter().find(|k| k.name() == name).cloned().ok_or_else(|| {
                    StorageError::InvalidCategory(format!(
                        "index key '{name}' is not a key of category '{}'",
                        self.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Category::with_index_keys(self.name.clone(), keys, index_keys)
    }
}

/// A statement to check or replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementConfig {
    /// Name of a declared category.
    pub category: String,

    pub descriptor: String,

    /// One value per free parameter, in order. Strings may reference
    /// environment variables as `${VAR}` or `${VAR:-default}`.
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl StatementConfig {
    /// Convert `params` into values matching `signature`.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` on a count mismatch or a value
    /// that does not fit its parameter type.
    pub fn values(&self, signature: &[ValueType]) -> Result<Vec<Value>, ConfigError> {
        if self.params.len() != signature.len() {
            return Err(ConfigError::ValidationError(format!(
                "statement '{}' takes {} parameters, {} given",
                self.descriptor,
                signature.len(),
                self.params.len()
            )));
        }

        self.params
            .iter()
            .zip(signature)
            .enumerate()
            .map(|(index, (param, &ty))| {
                Value::from_json(ty, &expand_strings(param)).ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "statement '{}': parameter {index} is not a valid {ty}",
                        self.descriptor
                    ))
                })
            })
            .collect()
    }
}

fn expand_strings(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Json::String(s) => Json::String(expand_env_vars(s)),
        Json::Array(items) => Json::Array(items.iter().map(expand_strings).collect()),
        Json::Object(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_strings(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
