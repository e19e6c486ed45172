//! Command-line interface for transteek
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Real-time speech translation for live calls
#[derive(Parser, Debug)]
#[command(name = "transteek", version, about = "Real-time speech translation for live calls")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration such as `10s`, `1m30s` or a bare number of seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Accept calls over WebSocket
    Serve {
        /// Listen address (default: from config, 0.0.0.0:8765)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Maximum concurrent sessions
        #[arg(long, value_name = "N")]
        max_sessions: Option<usize>,

        /// Time allowed for queued utterances when a session ends. Examples: 10s, 1m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        drain_timeout: Option<Duration>,
    },

    /// Translate a 16 kHz mono WAV file into synthesized utterance files
    Translate {
        /// Input WAV file
        #[arg(long, short = 'i', value_name = "FILE")]
        input: PathBuf,

        /// Source language tag (e.g., en-US)
        #[arg(long, value_name = "TAG")]
        from: String,

        /// Target language tag (e.g., fr-FR)
        #[arg(long, value_name = "TAG")]
        to: String,

        /// Directory for utterance-NNNN files
        #[arg(long, short = 'o', value_name = "DIR")]
        out: PathBuf,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Validate configuration and show the resolved service endpoints
    Check,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (API key hidden)
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["transteek", "serve"]).unwrap();
        match cli.command {
            Commands::Serve {
                bind,
                max_sessions,
                drain_timeout,
            } => {
                assert!(bind.is_none());
                assert!(max_sessions.is_none());
                assert!(drain_timeout.is_none());
            }
            other => panic!("Expected Serve, got {other:?}"),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_serve_options() {
        let cli = Cli::try_parse_from([
            "transteek",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "--max-sessions",
            "8",
            "--drain-timeout",
            "1m30s",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                bind,
                max_sessions,
                drain_timeout,
            } => {
                assert_eq!(bind.as_deref(), Some("127.0.0.1:9000"));
                assert_eq!(max_sessions, Some(8));
                assert_eq!(drain_timeout, Some(Duration::from_secs(90)));
            }
            other => panic!("Expected Serve, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_translate() {
        let cli = Cli::try_parse_from([
            "transteek",
            "translate",
            "-i",
            "call.wav",
            "--from",
            "en-US",
            "--to",
            "fr-FR",
            "-o",
            "out",
        ])
        .unwrap();
        match cli.command {
            Commands::Translate {
                input,
                from,
                to,
                out,
            } => {
                assert_eq!(input, PathBuf::from("call.wav"));
                assert_eq!(from, "en-US");
                assert_eq!(to, "fr-FR");
                assert_eq!(out, PathBuf::from("out"));
            }
            other => panic!("Expected Translate, got {other:?}"),
        }
    }

    #[test]
    fn test_translate_requires_languages() {
        let result = Cli::try_parse_from(["transteek", "translate", "-i", "a.wav", "-o", "out"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_global_options_after_command() {
        let cli = Cli::try_parse_from([
            "transteek",
            "check",
            "--config",
            "/tmp/config.toml",
            "-vv",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Check));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_config_actions() {
        let cli = Cli::try_parse_from(["transteek", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
        let cli = Cli::try_parse_from(["transteek", "-q", "config", "path"]).unwrap();
        assert!(cli.quiet);
    }

    #[test]
    fn test_missing_command_is_error() {
        assert!(Cli::try_parse_from(["transteek"]).is_err());
    }

    #[test]
    fn test_completions_shell() {
        let cli = Cli::try_parse_from(["transteek", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }
}
