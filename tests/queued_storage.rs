//! QueuedStorage integration tests
//!
//! Drives the public API against a recording delegate to check write
//! ordering, read bypass, shutdown bounds and proxy handling.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use ferrostat::storage::{
    BoundQuery, BoundWrite, Category, Connection, ConnectionStatus, DEFAULT_STATUS_FAILURE,
    DEFAULT_STATUS_SUCCESS,
    DescriptorParsingError, IllegalPatchError, Key, PreparedParameter, PreparedStatement,
    QueuedStorage, QueuedStorageBuilder, Record, Statement, StatementBackend, StatementCache,
    StatementDescriptor, StatementExecutionError, Storage, StorageError, Value, ValueType,
    prepare,
};
use ferrostat::storage::Pojo;
use parking_lot::Mutex;

// =============================================================================
// Recording delegate
// =============================================================================

#[derive(Default)]
struct RecordingBackend {
    applied: Mutex<Vec<String>>,
    /// When set, every write waits for a message (or five seconds).
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl StatementBackend for RecordingBackend {
    fn find(&self, query: &BoundQuery) -> Result<Vec<Record>, StatementExecutionError> {
        let mut row = Record::new();
        row.insert("category".into(), query.category.clone().into());
        Ok(vec![row])
    }

    fn apply(&self, write: &BoundWrite) -> Result<i32, StatementExecutionError> {
        if let Some(gate) = self.gate.lock().as_ref() {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }
        let line = write.to_string();
        if line.contains("'poison'") {
            return Err(StatementExecutionError::Backend("poisoned write".into()));
        }
        if line.contains("'refused'") {
            return Ok(DEFAULT_STATUS_FAILURE);
        }
        self.applied.lock().push(line);
        Ok(DEFAULT_STATUS_SUCCESS)
    }
}

struct RecordingStorage {
    backend: Arc<RecordingBackend>,
    cache: StatementCache,
    connection: Arc<Connection>,
    files: Mutex<Vec<String>>,
    shut_down: Arc<AtomicBool>,
}

impl RecordingStorage {
    fn new() -> Self {
        Self {
            backend: Arc::new(RecordingBackend::default()),
            cache: StatementCache::new(),
            connection: Arc::new(Connection::new("recording://", ConnectionStatus::Connected)),
            files: Mutex::new(Vec::new()),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    fn gated(gate: mpsc::Receiver<()>) -> Self {
        let storage = Self::new();
        *storage.backend.gate.lock() = Some(gate);
        storage
    }

    fn applied(&self) -> Vec<String> {
        self.backend.applied.lock().clone()
    }
}

impl Storage for RecordingStorage {
    fn register_category<T: Pojo>(&self, _category: &Category<T>) -> Result<(), StorageError> {
        Ok(())
    }

    fn prepare_statement<T: Pojo>(
        &self,
        descriptor: &StatementDescriptor<T>,
    ) -> Result<Box<dyn PreparedStatement<T>>, DescriptorParsingError> {
        prepare(&self.cache, self.backend.clone(), descriptor)
    }

    fn save_file(&self, name: &str, mut data: Box<dyn Read + Send>) -> Result<(), StorageError> {
        let mut content = String::new();
        data.read_to_string(&mut content)?;
        self.files.lock().push(format!("{name}={content}"));
        Ok(())
    }

    fn load_file(&self, _name: &str) -> Result<Option<Box<dyn Read + Send>>, StorageError> {
        Ok(None)
    }

    fn purge(&self, agent_id: &str) -> Result<(), StorageError> {
        self.backend.applied.lock().push(format!("PURGE {agent_id}"));
        Ok(())
    }

    fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Helpers
// =============================================================================

const ADD_EVENT: &str = "ADD vm-events SET 'event' = ?s , 'vmId' = ?s , 'timeStamp' = ?l";

fn vm_events() -> Category<Record> {
    Category::new(
        "vm-events",
        [
            Key::owned("event", ValueType::String),
            Key::VM_ID,
            Key::TIMESTAMP,
        ],
    )
    .unwrap()
}

fn record_event(
    storage: &impl Storage,
    event: &str,
    vm: &str,
    ts: i64,
) -> Result<i32, StatementExecutionError> {
    let desc = StatementDescriptor::new(vm_events(), ADD_EVENT);
    let mut stmt = storage.prepare_statement(&desc).unwrap();
    stmt.set_string(0, event).unwrap();
    stmt.set_string(1, vm).unwrap();
    stmt.set_long(2, ts).unwrap();
    stmt.execute()
}

fn timestamp_of(line: &str) -> i64 {
    line.rsplit("= ").next().unwrap().parse().unwrap()
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_vm_started_is_never_seen_after_vm_stopped() {
    let storage = Arc::new(QueuedStorage::new(RecordingStorage::new()).unwrap());

    let started = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || record_event(&*storage, "vm-started", "42", 100).unwrap())
    };
    started.join().unwrap();
    let stopped = {
        let storage = Arc::clone(&storage);
        thread::spawn(move || record_event(&*storage, "vm-stopped", "42", 200).unwrap())
    };
    stopped.join().unwrap();

    storage.shutdown();

    let applied = storage.delegate().applied();
    assert_eq!(applied.len(), 2);
    assert!(applied[0].contains("vm-started"));
    assert!(applied[1].contains("vm-stopped"));
}

#[test]
fn test_writes_from_many_threads_keep_issue_order() {
    let storage = Arc::new(QueuedStorage::new(RecordingStorage::new()).unwrap());
    // Issue order is the order the sequence lock is taken.
    let sequence = Arc::new(Mutex::new(0_i64));

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let storage = Arc::clone(&storage);
            let sequence = Arc::clone(&sequence);
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut next = sequence.lock();
                    record_event(&*storage, "sample", &format!("vm-{t}"), *next).unwrap();
                    *next += 1;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    storage.shutdown();

    let stamps: Vec<i64> = storage
        .delegate()
        .applied()
        .iter()
        .map(|line| timestamp_of(line))
        .collect();
    assert_eq!(stamps, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_purge_and_writes_share_one_queue() {
    let storage = QueuedStorage::new(RecordingStorage::new()).unwrap();

    record_event(&storage, "vm-started", "42", 1).unwrap();
    storage.purge("agent-1").unwrap();
    record_event(&storage, "vm-started", "43", 2).unwrap();
    storage.shutdown();

    let applied = storage.delegate().applied();
    assert_eq!(applied.len(), 3);
    assert_eq!(applied[1], "PURGE agent-1");
}

#[test]
fn test_failed_write_does_not_stop_the_queue() {
    let storage = QueuedStorage::new(RecordingStorage::new()).unwrap();

    assert_eq!(record_event(&storage, "poison", "42", 1).unwrap(), DEFAULT_STATUS_SUCCESS);
    assert_eq!(record_event(&storage, "vm-started", "42", 2).unwrap(), DEFAULT_STATUS_SUCCESS);
    storage.shutdown();

    let applied = storage.delegate().applied();
    assert_eq!(applied.len(), 1);
    assert!(applied[0].contains("vm-started"));
}

#[test]
fn test_failure_status_does_not_stop_the_queue() {
    let storage = QueuedStorage::new(RecordingStorage::new()).unwrap();

    assert_eq!(record_event(&storage, "refused", "42", 1).unwrap(), DEFAULT_STATUS_SUCCESS);
    assert_eq!(record_event(&storage, "vm-started", "42", 2).unwrap(), DEFAULT_STATUS_SUCCESS);
    assert_eq!(record_event(&storage, "vm-stopped", "42", 3).unwrap(), DEFAULT_STATUS_SUCCESS);
    assert!(storage.flush(Duration::from_secs(5)).unwrap());
    storage.shutdown();

    let stamps: Vec<i64> = storage
        .delegate()
        .applied()
        .iter()
        .map(|line| timestamp_of(line))
        .collect();
    assert_eq!(stamps, vec![2, 3]);
}

// =============================================================================
// Reads and files
// =============================================================================

#[test]
fn test_reads_bypass_a_blocked_write_worker() {
    let (release, gate) = mpsc::channel();
    let storage = QueuedStorage::new(RecordingStorage::gated(gate)).unwrap();

    record_event(&storage, "vm-started", "42", 1).unwrap();

    let started = Instant::now();
    let desc = StatementDescriptor::new(vm_events(), "QUERY vm-events");
    let rows = storage
        .prepare_statement(&desc)
        .unwrap()
        .execute_query()
        .unwrap()
        .collect_all()
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(rows[0]["category"], "vm-events");
    assert!(storage.delegate().applied().is_empty());

    release.send(()).unwrap();
    assert!(storage.flush(Duration::from_secs(5)).unwrap());
    assert_eq!(storage.delegate().applied().len(), 1);
}

#[test]
fn test_files_are_saved_off_the_caller_thread() {
    let storage = QueuedStorage::new(RecordingStorage::new()).unwrap();

    storage
        .save_file("heap.hprof", Box::new(std::io::Cursor::new(b"dump".to_vec())))
        .unwrap();
    storage.shutdown();

    assert_eq!(*storage.delegate().files.lock(), vec!["heap.hprof=dump".to_string()]);
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn test_shutdown_is_bounded_when_the_delegate_hangs() {
    let (_release, gate) = mpsc::channel::<()>();
    let storage = QueuedStorageBuilder::new()
        .queue_drain_timeout(Duration::from_millis(100))
        .file_drain_timeout(Duration::from_millis(100))
        .build(RecordingStorage::gated(gate))
        .unwrap();
    let delegate_shut_down = Arc::clone(&storage.delegate().shut_down);

    record_event(&storage, "vm-started", "42", 1).unwrap();
    record_event(&storage, "vm-stopped", "42", 2).unwrap();

    let started = Instant::now();
    storage.shutdown();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(delegate_shut_down.load(Ordering::SeqCst));
}

#[test]
fn test_writes_after_shutdown_are_rejected() {
    let storage = QueuedStorage::new(RecordingStorage::new()).unwrap();
    storage.shutdown();
    storage.shutdown();

    assert!(matches!(
        record_event(&storage, "vm-started", "42", 1),
        Err(StatementExecutionError::Rejected)
    ));
    assert!(storage.delegate().shut_down.load(Ordering::SeqCst));
}

// =============================================================================
// Binding
// =============================================================================

#[test]
fn test_bind_errors_surface_on_the_caller_thread() {
    let storage = QueuedStorage::new(RecordingStorage::new()).unwrap();
    let desc = StatementDescriptor::new(vm_events(), ADD_EVENT);
    let mut stmt = storage.prepare_statement(&desc).unwrap();

    assert_eq!(
        stmt.set_int(2, 7),
        Err(IllegalPatchError::TypeMismatch {
            index: 2,
            expected: ValueType::Long,
            actual: ValueType::Int,
        })
    );
    assert!(matches!(
        stmt.set_string(3, "x"),
        Err(IllegalPatchError::IndexOutOfRange { index: 3, count: 3 })
    ));

    stmt.set_string(0, "vm-started").unwrap();
    stmt.set_string(1, "42").unwrap();
    assert!(matches!(
        stmt.execute(),
        Err(StatementExecutionError::Patch(IllegalPatchError::Unbound { index: 2 }))
    ));

    storage.shutdown();
    assert!(storage.delegate().applied().is_empty());
}

#[test]
fn test_bad_descriptor_fails_at_prepare() {
    let storage = QueuedStorage::new(RecordingStorage::new()).unwrap();
    let desc = StatementDescriptor::new(vm_events(), "ADD vm-events SET 'pid' = ?i");

    let Err(err) = storage.prepare_statement(&desc) else {
        panic!("descriptor with an unknown key compiled");
    };
    assert!(err.message.contains("pid"));
}

#[test]
fn test_rebinding_after_execute_does_not_change_queued_write() {
    let (release, gate) = mpsc::channel();
    let storage = QueuedStorage::new(RecordingStorage::gated(gate)).unwrap();
    let desc = StatementDescriptor::new(vm_events(), ADD_EVENT);
    let mut stmt = storage.prepare_statement(&desc).unwrap();

    stmt.set_string(0, "vm-started").unwrap();
    stmt.set_string(1, "42").unwrap();
    stmt.set_long(2, 100).unwrap();
    stmt.execute().unwrap();
    stmt.set_long(2, 999).unwrap();

    release.send(()).unwrap();
    storage.shutdown();
    assert_eq!(timestamp_of(&storage.delegate().applied()[0]), 100);
}

// =============================================================================
// Proxy mode
// =============================================================================

fn proxied() -> QueuedStorage<RecordingStorage> {
    QueuedStorageBuilder::new()
        .backing_storage_in_proxy(true)
        .build(RecordingStorage::new())
        .unwrap()
}

#[test]
#[should_panic(expected = "proxy")]
fn test_proxied_execute_panics() {
    let storage = proxied();
    let desc = StatementDescriptor::new(vm_events(), ADD_EVENT);
    let stmt = storage.prepare_statement(&desc).unwrap();
    let _ = stmt.execute();
}

#[test]
#[should_panic(expected = "proxy")]
fn test_proxied_execute_query_panics() {
    let storage = proxied();
    let desc = StatementDescriptor::new(vm_events(), "QUERY vm-events");
    let stmt = storage.prepare_statement(&desc).unwrap();
    let _ = stmt.execute_query();
}

#[test]
fn test_proxied_parsed_statement_is_repatched_and_queued() {
    let storage = proxied();
    let desc = StatementDescriptor::new(vm_events(), ADD_EVENT);
    let parsed = storage.prepare_statement(&desc).unwrap().parsed_statement();
    assert_eq!(parsed.signature(), &[ValueType::String, ValueType::String, ValueType::Long]);

    let params = [
        PreparedParameter::new(0, "vm-started"),
        PreparedParameter::new(1, "42"),
        PreparedParameter::new(2, Value::Long(100)),
    ];
    match parsed.patch(&params).unwrap() {
        Statement::Write(write) => assert_eq!(write.apply().unwrap(), DEFAULT_STATUS_SUCCESS),
        Statement::Query(_) => panic!("expected a write"),
    }

    storage.shutdown();
    let applied = storage.delegate().applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(timestamp_of(&applied[0]), 100);
}
