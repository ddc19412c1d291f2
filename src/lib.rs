//! ferrostat - Storage statement layer for JVM fleet monitoring
//!
//! Agents persist samples through a pluggable [`Storage`]; clients read them
//! back. Statements are written in a small descriptor language, compiled once
//! per storage, and bound per call.
//!
//! # Architecture
//!
//! - **Storage**: data model, descriptor compiler, prepared statements, backends
//! - **Queue**: [`QueuedStorage`] applies writes in issue order on one worker thread
//! - **Config**: YAML declarations of categories and statements
//! - **Replay**: run configured statements through a queued in-memory storage
//!
//! # Example
//!
//! ```rust
//! use ferrostat::storage::{
//!     Category, Key, MemoryStorage, QueuedStorage, Record, StatementDescriptor, Storage,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let category = Category::<Record>::new("vm-info", [Key::AGENT_ID, Key::VM_ID])?;
//! let storage = QueuedStorage::new(MemoryStorage::new())?;
//! storage.register_category(&category)?;
//!
//! let add = StatementDescriptor::new(category, "ADD vm-info SET 'agentId' = ?s , 'vmId' = ?s");
//! let mut stmt = storage.prepare_statement(&add)?;
//! stmt.set_string(0, "agent-1")?;
//! stmt.set_string(1, "vm-42")?;
//! stmt.execute()?;
//!
//! storage.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod replay;
pub mod storage;

pub use config::{AppConfig, ConfigError};
pub use storage::{
    Category, Key, MemoryStorage, PreparedStatement, QueuedStorage, QueuedStorageBuilder,
    StatementDescriptor, Storage, StorageError,
};
