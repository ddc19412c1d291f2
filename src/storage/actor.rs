//! Single-thread dispatch worker fed by an unbounded FIFO channel.
//!
//! Single-writer pattern: one named thread owns execution, jobs arrive over
//! MPSC and run strictly in send order. Shutdown closes the gate first, then
//! waits a bounded time for the queue to drain.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::storage::StorageError;

/// Unit of queued work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the dispatch worker.
enum Command {
    /// Run a job.
    Run(Job),
    /// Stop after every earlier command has been processed.
    Shutdown,
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable submission side of a [`Dispatcher`].
///
/// Submissions fail with `StorageError::ChannelSend` once the dispatcher has
/// begun shutting down.
#[derive(Clone)]
pub struct DispatchHandle {
    sender: Arc<RwLock<Option<Sender<Command>>>>,
    pending: Arc<AtomicUsize>,
}

impl DispatchHandle {
    /// Queue `job` behind everything submitted before it.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), StorageError> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(StorageError::ChannelSend)?;

        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(Command::Run(Box::new(job))).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            StorageError::ChannelSend
        })
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.sender.read().is_some()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Owner of one dispatch worker thread.
pub struct Dispatcher {
    name: String,
    handle: DispatchHandle,
    done: Mutex<Option<Receiver<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the worker thread, named `name`.
    ///
    /// # Errors
    /// Returns `StorageError::Io` if the thread cannot be spawned.
    pub fn spawn(name: impl Into<String>) -> Result<Self, StorageError> {
        let name = name.into();
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            name: name.clone(),
            rx,
            pending: Arc::clone(&pending),
        };
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            worker.run();
            let _ = done_tx.send(());
        })?;

        Ok(Self {
            name,
            handle: DispatchHandle {
                sender: Arc::new(RwLock::new(Some(tx))),
                pending,
            },
            done: Mutex::new(Some(done_rx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), StorageError> {
        self.handle.submit(job)
    }

    pub fn pending(&self) -> usize {
        self.handle.pending()
    }

    /// Wait until everything submitted so far has run.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first.
    pub fn flush(&self, timeout: Duration) -> Result<bool, StorageError> {
        let (tx, rx) = mpsc::channel();
        self.submit(move || {
            let _ = tx.send(());
        })?;
        Ok(rx.recv_timeout(timeout).is_ok())
    }

    /// Stop accepting work. Already queued jobs still run.
    pub fn close(&self) {
        if let Some(sender) = self.handle.sender.write().take() {
            let _ = sender.send(Command::Shutdown);
        }
    }

    /// Stop accepting work and wait up to `timeout` for the queue to drain.
    ///
    /// Returns `true` if the worker finished, `false` if work was abandoned.
    /// Calling it again after the worker finished returns `true`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.close();
        self.await_termination(timeout)
    }

    /// Wait up to `timeout` for a closed worker to finish its queue.
    ///
    /// After a timeout, later calls wait again; once the worker has finished
    /// they return `true` immediately.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        let Some(receiver) = done.as_ref() else {
            return true;
        };
        match receiver.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                *done = None;
                drop(done);
                if let Some(thread) = self.thread.lock().take()
                    && thread.join().is_err()
                {
                    tracing::error!(worker = %self.name, "Dispatch worker thread panicked");
                }
                tracing::debug!(worker = %self.name, "Dispatch worker drained");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    worker = %self.name,
                    timeout = %humantime::format_duration(timeout),
                    abandoned = self.pending(),
                    "Dispatch worker did not drain in time, abandoning queued work"
                );
                false
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Detach: the worker finishes its queue in the background.
        self.close();
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    name: String,
    rx: Receiver<Command>,
    pending: Arc<AtomicUsize>,
}

impl Worker {
    fn run(self) {
        tracing::debug!(worker = %self.name, "Dispatch worker started");

        while let Ok(cmd) = self.rx.recv() {
            match cmd {
                Command::Run(job) => {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        tracing::error!(
                            worker = %self.name,
                            panic = panic_message(payload.as_ref()),
                            "Queued job panicked"
                        );
                    }
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
                Command::Shutdown => break,
            }
        }

        tracing::debug!(worker = %self.name, "Dispatch worker stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
