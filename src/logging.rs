//! Structured logging setup via tracing-subscriber.
//!
//! Environment variables take precedence over the configuration file:
//! - `TRANSTEEK_LOG`: filter directive (e.g. `info`, `transteek=debug`)
//! - `TRANSTEEK_LOG_FORMAT`: `text` or `json`
//!
//! Each session runs inside a `session` span carrying its id and language
//! pair, so every event a pipeline stage emits is attributable.

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, TransteekError};
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "TRANSTEEK_LOG";
pub const LOG_FORMAT_ENV: &str = "TRANSTEEK_LOG_FORMAT";

/// Install the global subscriber.
///
/// `verbosity` comes from repeated `-v` flags and raises the configured
/// level; `quiet` lowers it to warnings. Neither applies when `TRANSTEEK_LOG`
/// is set.
pub fn init(config: &LoggingConfig, verbosity: u8, quiet: bool) -> Result<()> {
    let level = effective_level(&config.level, verbosity, quiet);
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&level))
        .map_err(|e| TransteekError::ConfigInvalidValue {
            key: "logging.level".to_string(),
            message: e.to_string(),
        })?;

    let format = std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|value| parse_format(&value))
        .unwrap_or(config.format);

    let installed = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init(),
    };

    installed.map_err(|e| TransteekError::Other(format!("failed to install logger: {e}")))
}

/// Resolve the level directive from config and CLI flags.
pub fn effective_level(configured: &str, verbosity: u8, quiet: bool) -> String {
    if quiet {
        return "warn".to_string();
    }
    match verbosity {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn parse_format(value: &str) -> Option<LogFormat> {
    match value.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "text" => Some(LogFormat::Text),
        _ => None,
    }
}

/// Check whether a bare level name is valid.
pub fn level_is_valid(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level_uses_config_by_default() {
        assert_eq!(effective_level("info", 0, false), "info");
        assert_eq!(
            effective_level("transteek=debug", 0, false),
            "transteek=debug"
        );
    }

    #[test]
    fn test_effective_level_verbosity_raises() {
        assert_eq!(effective_level("info", 1, false), "debug");
        assert_eq!(effective_level("info", 2, false), "trace");
        assert_eq!(effective_level("info", 5, false), "trace");
    }

    #[test]
    fn test_effective_level_quiet_wins() {
        assert_eq!(effective_level("debug", 2, true), "warn");
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("json"), Some(LogFormat::Json));
        assert_eq!(parse_format(" JSON "), Some(LogFormat::Json));
        assert_eq!(parse_format("text"), Some(LogFormat::Text));
        assert_eq!(parse_format("pretty"), None);
    }

    #[test]
    fn test_level_is_valid() {
        assert!(level_is_valid("trace"));
        assert!(level_is_valid("error"));
        assert!(!level_is_valid("verbose"));
        assert!(!level_is_valid("INFO"));
    }
}
