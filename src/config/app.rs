//! Application configuration structures.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::{CompiledStatement, QueuedStorageConfig, compile};

use super::category::{CategoryConfig, StatementConfig};
use super::validation::ConfigError;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Queued storage settings.
    #[serde(default)]
    pub storage: QueuedStorageConfig,

    /// Category declarations.
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,

    /// Statements to check or replay, in order.
    #[serde(default)]
    pub statements: Vec<StatementConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        tracing::debug!("Loading config from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Descriptors are not compiled here; see [`check`](Self::check).
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.storage.name;
        if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "storage name must be a non-empty word, got '{name}'"
            )));
        }

        if self.storage.queue_drain_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "storage queue_drain_timeout must be non-zero".to_string(),
            ));
        }
        if self.storage.file_drain_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "storage file_drain_timeout must be non-zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for category in &self.categories {
            if !names.insert(category.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate category name: '{}'",
                    category.name
                )));
            }
            category
                .to_category()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        for statement in &self.statements {
            if !names.contains(statement.category.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "statement '{}' references undeclared category '{}'",
                    statement.descriptor, statement.category
                )));
            }
        }

        Ok(())
    }

    /// Find a declared category by name.
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Compile every statement against its category.
    ///
    /// Returns one result per statement, in order.
    pub fn check(&self) -> Vec<Result<CompiledStatement, ConfigError>> {
        self.statements
            .iter()
            .map(|statement| {
                let category = self
                    .category(&statement.category)
                    .ok_or_else(|| {
                        ConfigError::ValidationError(format!(
                            "undeclared category '{}'",
                            statement.category
                        ))
                    })?
                    .to_category()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                let compiled = compile(category.schema(), &statement.descriptor)
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                statement.values(compiled.signature())?;
                Ok(compiled)
            })
            .collect()
    }
}
