//! Connection metadata with status-change listeners.

use parking_lot::Mutex;
use strum_macros::{AsRefStr, Display, EnumString};

/// Connection state as seen by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    FailedToConnect,
    Disconnected,
}

type Listener = Box<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Where a storage is connected to, and whether it currently is.
pub struct Connection {
    url: String,
    status: Mutex<ConnectionStatus>,
    listeners: Mutex<Vec<Listener>>,
}

impl Connection {
    pub fn new(url: impl Into<String>, status: ConnectionStatus) -> Self {
        Self {
            url: url.into(),
            status: Mutex::new(status),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Register a callback invoked on every status change.
    pub fn add_listener(&self, listener: impl Fn(ConnectionStatus) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Update the status and notify listeners if it changed.
    pub fn set_status(&self, status: ConnectionStatus) {
        let previous = std::mem::replace(&mut *self.status.lock(), status);
        if previous == status {
            return;
        }

        tracing::info!(url = %self.url, from = %previous, to = %status, "Connection status changed");
        for listener in self.listeners.lock().iter() {
            listener(status);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
