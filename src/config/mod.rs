//! Configuration module for ferrostat.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Queued storage settings (worker name, proxy mode, drain timeouts)
//! - Category declarations
//! - Statements to check or replay

mod app;
mod category;
mod validation;

pub use app::AppConfig;
pub use category::{CategoryConfig, KeyConfig, StatementConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
