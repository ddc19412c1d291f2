//! Configuration errors and value helpers.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse duration string using humantime.
///
/// Accepts `500ms`, `3s`, `1m30s` and the like.
///
/// # Examples
///
/// ```
/// use ferrostat::config::parse_duration;
///
/// assert_eq!(parse_duration("3s").unwrap().as_secs(), 3);
/// assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Expand `${VAR}` and `${VAR:-default}` references from the environment.
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR: std::sync::OnceLock<Option<regex::Regex>> = std::sync::OnceLock::new();

    let Some(regex) = ENV_VAR
        .get_or_init(|| regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
        .as_ref()
    else {
        return input.to_string();
    };

    regex
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1])
                .unwrap_or_else(|_| caps.get(2).map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}
