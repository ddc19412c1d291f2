//! Replay configured statements through a queued in-memory storage.
//!
//! Writes go through the ordered queue exactly as a live agent's would;
//! before each query the queue is flushed so the query sees every earlier
//! write. Query rows are printed as JSON lines.

use std::collections::HashMap;
use std::io::Write;

use thiserror::Error;

use crate::config::{AppConfig, ConfigError, StatementConfig};
use crate::storage::{
    Category, Cursor, MemoryStorage, PreparedParameter, QueuedStorage, QueuedStorageBuilder,
    Record, Statement, StatementDescriptor, Storage, StorageError,
};

/// Errors that can abort a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Failed to write query output.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

/// What a replay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Writes queued.
    pub writes: usize,
    /// Queries run.
    pub queries: usize,
    /// Rows printed.
    pub rows: usize,
}

/// Run every statement of `config` in order, printing query rows to `out`.
///
/// # Errors
/// Returns the first configuration, storage or output error.
pub fn replay(config: &AppConfig, out: &mut impl Write) -> Result<ReplaySummary, ReplayError> {
    config.validate()?;

    let storage = QueuedStorageBuilder::from_config(config.storage.clone()).build(MemoryStorage::new())?;
    let mut categories = HashMap::new();
    for declared in &config.categories {
        let category = declared.to_category()?;
        storage.register_category(&category)?;
        categories.insert(declared.name.as_str(), category);
    }

    let mut summary = ReplaySummary::default();
    for statement in &config.statements {
        let category = categories.get(statement.category.as_str()).ok_or_else(|| {
            ConfigError::ValidationError(format!("undeclared category '{}'", statement.category))
        })?;
        run_statement(&storage, category, statement, out, &mut summary)?;
    }

    storage.shutdown();
    tracing::info!(
        writes = summary.writes,
        queries = summary.queries,
        rows = summary.rows,
        "Replay complete"
    );
    Ok(summary)
}

fn run_statement(
    storage: &QueuedStorage<MemoryStorage>,
    category: &Category<Record>,
    statement: &StatementConfig,
    out: &mut impl Write,
    summary: &mut ReplaySummary,
) -> Result<(), ReplayError> {
    let descriptor = StatementDescriptor::new(category.clone(), statement.descriptor.clone());
    let mut prepared = storage
        .prepare_statement(&descriptor)
        .map_err(StorageError::from)?;
    let parsed = prepared.parsed_statement();
    let values = statement.values(parsed.signature())?;
    tracing::debug!(descriptor = %descriptor, "Replaying statement");

    if storage.is_backing_storage_in_proxy() {
        // Proxied storages only accept re-patched statements.
        let params: Vec<PreparedParameter> = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| PreparedParameter::new(index, value))
            .collect();
        match parsed.patch(&params).map_err(StorageError::from)? {
            Statement::Write(write) => {
                write.apply().map_err(StorageError::from)?;
                summary.writes += 1;
            }
            Statement::Query(query) => {
                flush(storage)?;
                let cursor = query.execute().map_err(StorageError::from)?;
                summary.rows += print_rows(cursor, out)?;
                summary.queries += 1;
            }
        }
        return Ok(());
    }

    for (index, value) in values.into_iter().enumerate() {
        prepared
            .set_parameter(index, value)
            .map_err(StorageError::from)?;
    }
    if parsed.kind().is_query() {
        flush(storage)?;
        let cursor = prepared.execute_query().map_err(StorageError::from)?;
        summary.rows += print_rows(cursor, out)?;
        summary.queries += 1;
    } else {
        prepared.execute().map_err(StorageError::from)?;
        summary.writes += 1;
    }
    Ok(())
}

fn flush(storage: &QueuedStorage<MemoryStorage>) -> Result<(), StorageError> {
    let timeout = storage.config().queue_drain_timeout;
    if !storage.flush(timeout)? {
        tracing::warn!(
            timeout = %humantime::format_duration(timeout),
            "Write queue did not drain before query"
        );
    }
    Ok(())
}

fn print_rows(mut cursor: Cursor<Record>, out: &mut impl Write) -> Result<usize, ReplayError> {
    let mut rows = 0;
    while cursor.has_next() {
        let row = cursor.next()?;
        let line = serde_json::to_string(&row).map_err(StorageError::from)?;
        writeln!(out, "{line}")?;
        rows += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
storage:
  name: replay-test
categories:
  - name: vm-info
    keys:
      - { name: agentId, type: string }
      - { name: vmId, type: string }
      - { name: timeStamp, type: long }
statements:
  - category: vm-info
    descriptor: "ADD vm-info SET 'agentId' = ?s , 'vmId' = ?s , 'timeStamp' = ?l"
    params: ["agent-1", "vm-42", 100]
  - category: vm-info
    descriptor: "ADD vm-info SET 'agentId' = ?s , 'vmId' = ?s , 'timeStamp' = ?l"
    params: ["agent-1", "vm-43", 200]
  - category: vm-info
    descriptor: "QUERY vm-info SORT 'timeStamp' DSC LIMIT ?i"
    params: [1]
"#;

    fn run(config: &AppConfig) -> (ReplaySummary, String) {
        let mut out = Vec::new();
        let summary = replay(config, &mut out).unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_replay_direct() {
        let config: AppConfig = serde_yaml::from_str(CONFIG).unwrap();
        let (summary, out) = run(&config);

        assert_eq!(
            summary,
            ReplaySummary {
                writes: 2,
                queries: 1,
                rows: 1
            }
        );
        let row: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(row["vmId"], "vm-43");
    }

    #[test]
    fn test_replay_proxied() {
        let mut config: AppConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.storage.backing_storage_in_proxy = true;
        let (summary, out) = run(&config);

        assert_eq!(summary.writes, 2);
        assert_eq!(summary.rows, 1);
        assert!(out.contains("vm-43"));
    }

    #[test]
    fn test_replay_stops_on_bad_params() {
        let mut config: AppConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.statements[2].params = vec![serde_json::json!("one")];

        let mut out = Vec::new();
        assert!(matches!(
            replay(&config, &mut out),
            Err(ReplayError::Config(ConfigError::ValidationError(_)))
        ));
    }
}
