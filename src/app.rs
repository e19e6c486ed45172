//! Application entry points.
//!
//! Wires configuration, service clients and the session manager together
//! for the two ways a session can be driven: a WebSocket server or a WAV
//! file replayed through the same pipeline.

use crate::config::Config;
use crate::error::{Result, TransteekError};
use crate::server;
use crate::services::ServiceClients;
use crate::session::{LanguagePair, SessionManager, SessionReport, SessionSettings};
use crate::transport::wav::file_connection;
use std::path::Path;
use std::sync::Arc;

/// Validate `config` and build a session manager for it.
pub fn build_manager(config: &Config) -> Result<Arc<SessionManager>> {
    config.validate()?;
    let services =
        ServiceClients::from_config(&config.services, config.pipeline.service_timeout())?;
    tracing::info!(services = %services.describe(), "service clients ready");
    Ok(Arc::new(SessionManager::new(
        services,
        SessionSettings::from_config(config),
        config.server.max_sessions,
    )))
}

/// Run the WebSocket server until Ctrl+C or SIGTERM.
pub async fn run_server(config: Config) -> Result<()> {
    let manager = build_manager(&config)?;
    let settings = SessionSettings::from_config(&config);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| TransteekError::transport(format!("cannot bind {}: {e}", config.server.bind)))?;
    tracing::info!(
        bind = %config.server.bind,
        max_sessions = config.server.max_sessions,
        version = %crate::version_string(),
        "listening"
    );

    server::serve(
        listener,
        manager,
        server::shutdown_signal(),
        settings.drain_timeout + settings.stop_grace(),
    )
    .await?;
    Ok(())
}

/// Translate a WAV file, writing one file per synthesized utterance into
/// `out_dir`.
pub async fn run_translate_file(
    config: &Config,
    input: &Path,
    languages: &LanguagePair,
    out_dir: &Path,
) -> Result<SessionReport> {
    let manager = build_manager(config)?;
    let connection = file_connection(
        input,
        out_dir,
        languages,
        config.pipeline.frame_ms,
        config.services.audio_encoding.file_extension(),
    )?;
    tracing::info!(input = %input.display(), out = %out_dir.display(), %languages, "translating file");
    Ok(manager.run_connection(connection).await)
}
