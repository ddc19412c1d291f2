//! DAO helpers on top of [`Storage`].
//!
//! [`execute_statement`] and [`execute_query`] wrap the prepare, bind and run
//! steps and log failures. The getters encode the common "latest samples"
//! queries over categories keyed by `agentId` (and `vmId`) and `timeStamp`.

use crate::storage::cursor::Cursor;
use crate::storage::descriptor::StatementDescriptor;
use crate::storage::error::{IllegalPatchError, StorageError};
use crate::storage::prepared::PreparedStatement;
use crate::storage::traits::Storage;
use crate::storage::types::{Category, Pojo};

/// Prepare `descriptor`, bind it with `customize`, and run it as a write.
///
/// # Errors
/// Any prepare, bind or execution failure, after logging it.
pub fn execute_statement<S, T, F>(
    storage: &S,
    descriptor: &StatementDescriptor<T>,
    customize: F,
) -> Result<i32, StorageError>
where
    S: Storage,
    T: Pojo,
    F: FnOnce(&mut dyn PreparedStatement<T>) -> Result<(), IllegalPatchError>,
{
    let result = prepare_bound(storage, descriptor, customize)
        .and_then(|stmt| stmt.execute().map_err(StorageError::from));
    if let Err(e) = &result {
        tracing::error!(descriptor = %descriptor, error = %e, "Statement failed");
    }
    result
}

/// Prepare `descriptor`, bind it with `customize`, and run it as a query.
///
/// # Errors
/// Any prepare, bind or execution failure, after logging it.
pub fn execute_query<S, T, F>(
    storage: &S,
    descriptor: &StatementDescriptor<T>,
    customize: F,
) -> Result<Cursor<T>, StorageError>
where
    S: Storage,
    T: Pojo,
    F: FnOnce(&mut dyn PreparedStatement<T>) -> Result<(), IllegalPatchError>,
{
    let result = prepare_bound(storage, descriptor, customize)
        .and_then(|stmt| stmt.execute_query().map_err(StorageError::from));
    if let Err(e) = &result {
        tracing::error!(descriptor = %descriptor, error = %e, "Query failed");
    }
    result
}

/// [`execute_query`], collected.
pub fn query_list<S, T, F>(
    storage: &S,
    descriptor: &StatementDescriptor<T>,
    customize: F,
) -> Result<Vec<T>, StorageError>
where
    S: Storage,
    T: Pojo,
    F: FnOnce(&mut dyn PreparedStatement<T>) -> Result<(), IllegalPatchError>,
{
    execute_query(storage, descriptor, customize)?.collect_all()
}

fn prepare_bound<S, T, F>(
    storage: &S,
    descriptor: &StatementDescriptor<T>,
    customize: F,
) -> Result<Box<dyn PreparedStatement<T>>, StorageError>
where
    S: Storage,
    T: Pojo,
    F: FnOnce(&mut dyn PreparedStatement<T>) -> Result<(), IllegalPatchError>,
{
    let mut stmt = storage.prepare_statement(descriptor)?;
    customize(stmt.as_mut())?;
    Ok(stmt)
}

// =============================================================================
// Getters
// =============================================================================

/// Samples of one host newer than a timestamp, newest first.
pub fn host_latest_descriptor(category: &str) -> String {
    format!("QUERY {category} WHERE 'agentId' = ?s AND 'timeStamp' > ?l SORT 'timeStamp' DSC")
}

/// Samples of one VM newer than a timestamp, newest first.
pub fn vm_latest_descriptor(category: &str) -> String {
    format!(
        "QUERY {category} WHERE 'agentId' = ?s AND 'vmId' = ?s AND 'timeStamp' > ?l \
         SORT 'timeStamp' DSC"
    )
}

/// Samples of one host in `[start, end)`, newest first.
pub fn host_interval_descriptor(category: &str) -> String {
    format!(
        "QUERY {category} WHERE 'agentId' = ?s AND 'timeStamp' >= ?l AND 'timeStamp' < ?l \
         SORT 'timeStamp' DSC"
    )
}

pub fn host_newest_descriptor(category: &str) -> String {
    format!("QUERY {category} WHERE 'agentId' = ?s SORT 'timeStamp' DSC LIMIT 1")
}

pub fn host_oldest_descriptor(category: &str) -> String {
    format!("QUERY {category} WHERE 'agentId' = ?s SORT 'timeStamp' ASC LIMIT 1")
}

/// Latest samples of a host-scoped category.
pub struct HostLatestPojoListGetter<S, T> {
    storage: S,
    descriptor: StatementDescriptor<T>,
}

impl<S: Storage, T: Pojo> HostLatestPojoListGetter<S, T> {
    pub fn new(storage: S, category: &Category<T>) -> Self {
        let descriptor = StatementDescriptor::new(
            category.clone(),
            host_latest_descriptor(category.name()),
        );
        Self {
            storage,
            descriptor,
        }
    }

    /// Samples for `agent_id` with a timestamp after `since`.
    pub fn get_latest(&self, agent_id: &str, since: i64) -> Result<Vec<T>, StorageError> {
        query_list(&self.storage, &self.descriptor, |stmt| {
            stmt.set_string(0, agent_id)?;
            stmt.set_long(1, since)
        })
    }
}

/// Latest samples of a VM-scoped category.
pub struct VmLatestPojoListGetter<S, T> {
    storage: S,
    descriptor: StatementDescriptor<T>,
}

impl<S: Storage, T: Pojo> VmLatestPojoListGetter<S, T> {
    pub fn new(storage: S, category: &Category<T>) -> Self {
        let descriptor =
            StatementDescriptor::new(category.clone(), vm_latest_descriptor(category.name()));
        Self {
            storage,
            descriptor,
        }
    }

    pub fn get_latest(&self, agent_id: &str, vm_id: &str, since: i64) -> Result<Vec<T>, StorageError> {
        query_list(&self.storage, &self.descriptor, |stmt| {
            stmt.set_string(0, agent_id)?;
            stmt.set_string(1, vm_id)?;
            stmt.set_long(2, since)
        })
    }
}

/// Samples of a host-scoped category within a time window.
pub struct HostTimeIntervalPojoListGetter<S, T> {
    storage: S,
    descriptor: StatementDescriptor<T>,
}

impl<S: Storage, T: Pojo> HostTimeIntervalPojoListGetter<S, T> {
    pub fn new(storage: S, category: &Category<T>) -> Self {
        let descriptor = StatementDescriptor::new(
            category.clone(),
            host_interval_descriptor(category.name()),
        );
        Self {
            storage,
            descriptor,
        }
    }

    pub fn get_latest(&self, agent_id: &str, start: i64, end: i64) -> Result<Vec<T>, StorageError> {
        query_list(&self.storage, &self.descriptor, |stmt| {
            stmt.set_string(0, agent_id)?;
            stmt.set_long(1, start)?;
            stmt.set_long(2, end)
        })
    }
}

/// Newest and oldest sample of a host-scoped category.
pub struct HostBoundaryPojoGetter<S, T> {
    storage: S,
    newest: StatementDescriptor<T>,
    oldest: StatementDescriptor<T>,
}

impl<S: Storage, T: Pojo> HostBoundaryPojoGetter<S, T> {
    pub fn new(storage: S, category: &Category<T>) -> Self {
        Self {
            storage,
            newest: StatementDescriptor::new(category.clone(), host_newest_descriptor(category.name())),
            oldest: StatementDescriptor::new(category.clone(), host_oldest_descriptor(category.name())),
        }
    }

    pub fn get_newest(&self, agent_id: &str) -> Result<Option<T>, StorageError> {
        execute_query(&self.storage, &self.newest, |stmt| stmt.set_string(0, agent_id))?.head()
    }

    pub fn get_oldest(&self, agent_id: &str) -> Result<Option<T>, StorageError> {
        execute_query(&self.storage, &self.oldest, |stmt| stmt.set_string(0, agent_id))?.head()
    }
}
