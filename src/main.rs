use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use transteek::cli::{Cli, Commands, ConfigAction};
use transteek::config::{Config, ServiceMode};
use transteek::session::{LanguagePair, SessionState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            max_sessions,
            drain_timeout,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(max) = max_sessions {
                config.server.max_sessions = max;
            }
            if let Some(timeout) = drain_timeout {
                config.pipeline.drain_timeout_ms = timeout.as_millis() as u64;
            }
            transteek::logging::init(&config.logging, cli.verbose, cli.quiet)?;
            transteek::app::run_server(config).await?;
        }
        Commands::Translate {
            input,
            from,
            to,
            out,
        } => {
            let config = load_config(cli.config.as_deref())?;
            transteek::logging::init(&config.logging, cli.verbose, cli.quiet)?;
            let languages = LanguagePair::new(&from, &to)?;
            let report =
                transteek::app::run_translate_file(&config, &input, &languages, &out).await?;

            if !cli.quiet {
                eprintln!(
                    "{} utterance(s) written to {} ({} skipped, {} failed)",
                    report.utterances_dispatched,
                    out.display(),
                    report.utterances_skipped,
                    report.utterances_failed
                );
            }
            if report.final_state == SessionState::Failed {
                anyhow::bail!(
                    "translation failed: {}",
                    report.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
        Commands::Config { action } => handle_config_command(action, cli.config.as_deref())?,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "transteek", &mut std::io::stdout());
        }
        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            check_config(&config)?;
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/transteek/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(std::path::PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;

    println!("transteek {}", transteek::version_string());
    println!("  bind:           {}", config.server.bind);
    println!("  max sessions:   {}", config.server.max_sessions);
    match config.services.mode {
        ServiceMode::Http => {
            println!("  transcription:  {}", config.services.transcription_url);
            println!("  translation:    {}", config.services.translation_url);
            println!("  synthesis:      {}", config.services.synthesis_url);
            println!(
                "  api key:        {}",
                if config.services.api_key.is_some() {
                    "set"
                } else {
                    "not set"
                }
            );
        }
        ServiceMode::Stub => println!("  services:       stub (scripted, no network)"),
    }
    println!(
        "  voice:          <target>-{} ({})",
        config.services.voice_suffix,
        config.services.audio_encoding.as_str()
    );
    println!("Configuration OK");
    Ok(())
}
