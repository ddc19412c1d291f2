//! Queued storage configuration and builder.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::StorageError;
use crate::storage::queued::QueuedStorage;
use crate::storage::traits::Storage;

/// Default bound on how long shutdown waits for each worker to drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Default worker thread name prefix.
pub const DEFAULT_NAME: &str = "ferrostat";

/// Settings for a [`QueuedStorage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuedStorageConfig {
    /// Worker threads are named `<name>-writes` and `<name>-files`.
    pub name: String,

    /// The delegate is reached through a proxy: statements may only be
    /// re-patched through `parsed_statement()`, never executed directly.
    pub backing_storage_in_proxy: bool,

    #[serde(with = "humantime_serde")]
    pub queue_drain_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub file_drain_timeout: Duration,
}

impl Default for QueuedStorageConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            backing_storage_in_proxy: false,
            queue_drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            file_drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Builder for a [`QueuedStorage`].
#[derive(Debug, Clone, Default)]
pub struct QueuedStorageBuilder {
    config: QueuedStorageConfig,
}

impl QueuedStorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: QueuedStorageConfig) -> Self {
        Self { config }
    }

    /// Set the worker thread name prefix.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Mark the delegate as reached through a proxy.
    pub fn backing_storage_in_proxy(mut self, proxied: bool) -> Self {
        self.config.backing_storage_in_proxy = proxied;
        self
    }

    /// Set how long shutdown waits for queued statements and purges.
    pub fn queue_drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.queue_drain_timeout = timeout;
        self
    }

    /// Set how long shutdown waits for queued file saves.
    pub fn file_drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.file_drain_timeout = timeout;
        self
    }

    /// Spawn the workers and wrap `delegate`.
    ///
    /// # Errors
    /// Returns `StorageError::Io` if a worker thread cannot be spawned.
    pub fn build<S: Storage>(self, delegate: S) -> Result<QueuedStorage<S>, StorageError> {
        QueuedStorage::with_config(delegate, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = QueuedStorageConfig::default();
        assert_eq!(config.name, "ferrostat");
        assert!(!config.backing_storage_in_proxy);
        assert_eq!(config.queue_drain_timeout, Duration::from_secs(3));
        assert_eq!(config.file_drain_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
name: agent
backing_storage_in_proxy: true
queue_drain_timeout: 500ms
"#;
        let config: QueuedStorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "agent");
        assert!(config.backing_storage_in_proxy);
        assert_eq!(config.queue_drain_timeout, Duration::from_millis(500));
        assert_eq!(config.file_drain_timeout, DEFAULT_DRAIN_TIMEOUT);
    }

    #[test]
    fn test_builder_setters() {
        let builder = QueuedStorageBuilder::new()
            .name("test")
            .backing_storage_in_proxy(true)
            .queue_drain_timeout(Duration::from_millis(10))
            .file_drain_timeout(Duration::from_millis(20));

        assert_eq!(
            builder.config,
            QueuedStorageConfig {
                name: "test".to_string(),
                backing_storage_in_proxy: true,
                queue_drain_timeout: Duration::from_millis(10),
                file_drain_timeout: Duration::from_millis(20),
            }
        );
    }
}
