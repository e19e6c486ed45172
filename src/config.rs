use crate::defaults;
use crate::error::{Result, TransteekError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub services: ServicesConfig,
    pub logging: LoggingConfig,
}

/// Listener and session admission configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_sessions: usize,
    pub config_timeout_ms: u64,
}

/// Per-session pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub queue_capacity: usize,
    pub overload_warn_ms: u64,
    pub drain_timeout_ms: u64,
    pub service_timeout_ms: u64,
    pub output_write_timeout_ms: u64,
    pub failure_threshold: usize,
    pub failure_window_ms: u64,
}

/// External speech, translation and synthesis services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    pub mode: ServiceMode,
    pub transcription_url: String,
    pub translation_url: String,
    pub synthesis_url: String,
    pub api_key: Option<String>,
    pub voice_suffix: String,
    pub audio_encoding: AudioEncoding,
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Which service clients back the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    #[default]
    Http,
    /// Scripted in-process services, only available with the
    /// `stub-services` feature.
    Stub,
}

/// Encoding requested from the synthesis service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioEncoding {
    #[default]
    Mp3,
    OggOpus,
    Linear16,
}

impl AudioEncoding {
    /// Wire name used in synthesis requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "MP3",
            Self::OggOpus => "OGG_OPUS",
            Self::Linear16 => "LINEAR16",
        }
    }

    /// File extension for synthesized audio written to disk.
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::OggOpus => "ogg",
            Self::Linear16 => "wav",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND_ADDR.to_string(),
            max_sessions: defaults::MAX_SESSIONS,
            config_timeout_ms: defaults::CONFIG_TIMEOUT_MS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            queue_capacity: defaults::QUEUE_CAPACITY,
            overload_warn_ms: defaults::OVERLOAD_WARN_MS,
            drain_timeout_ms: defaults::DRAIN_TIMEOUT_MS,
            service_timeout_ms: defaults::SERVICE_TIMEOUT_MS,
            output_write_timeout_ms: defaults::OUTPUT_WRITE_TIMEOUT_MS,
            failure_threshold: defaults::FAILURE_THRESHOLD,
            failure_window_ms: defaults::FAILURE_WINDOW_MS,
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            mode: ServiceMode::Http,
            transcription_url: String::new(),
            translation_url: String::new(),
            synthesis_url: String::new(),
            api_key: None,
            voice_suffix: defaults::VOICE_SUFFIX.to_string(),
            audio_encoding: AudioEncoding::Mp3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: LogFormat::Text,
        }
    }
}

impl PipelineConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service_timeout_ms)
    }

    pub fn overload_warn_after(&self) -> Duration {
        Duration::from_millis(self.overload_warn_ms)
    }

    pub fn output_write_timeout(&self) -> Duration {
        Duration::from_millis(self.output_write_timeout_ms)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TRANSTEEK_BIND → server.bind
    /// - PORT → port part of server.bind
    /// - TRANSTEEK_API_KEY → services.api_key
    /// - TRANSTEEK_TRANSCRIPTION_URL → services.transcription_url
    /// - TRANSTEEK_TRANSLATION_URL → services.translation_url
    /// - TRANSTEEK_SYNTHESIS_URL → services.synthesis_url
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("TRANSTEEK_BIND")
            && !bind.is_empty()
        {
            self.server.bind = bind;
        }

        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.trim().parse::<u16>()
        {
            self.server.bind = replace_port(&self.server.bind, port);
        }

        if let Ok(key) = std::env::var("TRANSTEEK_API_KEY")
            && !key.is_empty()
        {
            self.services.api_key = Some(key);
        }

        if let Ok(url) = std::env::var("TRANSTEEK_TRANSCRIPTION_URL")
            && !url.is_empty()
        {
            self.services.transcription_url = url;
        }

        if let Ok(url) = std::env::var("TRANSTEEK_TRANSLATION_URL")
            && !url.is_empty()
        {
            self.services.translation_url = url;
        }

        if let Ok(url) = std::env::var("TRANSTEEK_SYNTHESIS_URL")
            && !url.is_empty()
        {
            self.services.synthesis_url = url;
        }

        self
    }

    /// Check values that serde cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> TransteekError {
            TransteekError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.pipeline.queue_capacity == 0 {
            return Err(invalid("pipeline.queue_capacity", "must be at least 1"));
        }
        if self.pipeline.failure_threshold == 0 {
            return Err(invalid("pipeline.failure_threshold", "must be at least 1"));
        }
        if self.pipeline.frame_ms == 0 {
            return Err(invalid("pipeline.frame_ms", "must be at least 1"));
        }
        if self.pipeline.sample_rate != defaults::SAMPLE_RATE {
            return Err(invalid(
                "pipeline.sample_rate",
                "only 16000 Hz linear PCM is supported",
            ));
        }
        for (key, value) in [
            ("server.config_timeout_ms", self.server.config_timeout_ms),
            ("pipeline.overload_warn_ms", self.pipeline.overload_warn_ms),
            ("pipeline.drain_timeout_ms", self.pipeline.drain_timeout_ms),
            ("pipeline.service_timeout_ms", self.pipeline.service_timeout_ms),
            (
                "pipeline.output_write_timeout_ms",
                self.pipeline.output_write_timeout_ms,
            ),
            ("pipeline.failure_window_ms", self.pipeline.failure_window_ms),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        if self.server.max_sessions == 0 {
            return Err(invalid("server.max_sessions", "must be at least 1"));
        }
        if self.services.voice_suffix.trim().is_empty() {
            return Err(invalid("services.voice_suffix", "must not be empty"));
        }

        match self.services.mode {
            ServiceMode::Http => {
                for (key, url) in [
                    ("services.transcription_url", &self.services.transcription_url),
                    ("services.translation_url", &self.services.translation_url),
                    ("services.synthesis_url", &self.services.synthesis_url),
                ] {
                    if url.is_empty() {
                        return Err(invalid(key, "required when services.mode = \"http\""));
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        return Err(invalid(key, "must start with http:// or https://"));
                    }
                }
            }
            ServiceMode::Stub => {
                if !cfg!(feature = "stub-services") {
                    return Err(TransteekError::NotImplemented {
                        feature: "services.mode = \"stub\" (build with --features stub-services)"
                            .to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Copy of the configuration safe to print.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.services.api_key.is_some() {
            config.services.api_key = Some("********".to_string());
        }
        config
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TransteekError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/transteek/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("transteek")
            .join("config.toml")
    }
}

/// Swap the port of a `host:port` bind address. An address without a port
/// gets one appended.
fn replace_port(bind: &str, port: u16) -> String {
    match bind.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{bind}:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_transteek_env() {
        remove_env("TRANSTEEK_BIND");
        remove_env("PORT");
        remove_env("TRANSTEEK_API_KEY");
        remove_env("TRANSTEEK_TRANSCRIPTION_URL");
        remove_env("TRANSTEEK_TRANSLATION_URL");
        remove_env("TRANSTEEK_SYNTHESIS_URL");
    }

    fn http_config() -> Config {
        let mut config = Config::default();
        config.services.transcription_url = "http://stt.local".to_string();
        config.services.translation_url = "http://mt.local".to_string();
        config.services.synthesis_url = "https://tts.local".to_string();
        config
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.server.bind, "0.0.0.0:8765");
        assert_eq!(config.server.max_sessions, 64);

        assert_eq!(config.pipeline.sample_rate, 16000);
        assert_eq!(config.pipeline.queue_capacity, 4);
        assert_eq!(config.pipeline.failure_threshold, 3);

        assert_eq!(config.services.mode, ServiceMode::Http);
        assert_eq!(config.services.voice_suffix, "Standard-A");
        assert_eq!(config.services.audio_encoding, AudioEncoding::Mp3);
        assert_eq!(config.services.api_key, None);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [server]
            bind = "127.0.0.1:9000"
            max_sessions = 8

            [pipeline]
            queue_capacity = 2
            drain_timeout_ms = 500

            [services]
            mode = "http"
            transcription_url = "http://stt.local"
            translation_url = "http://mt.local"
            synthesis_url = "http://tts.local"
            audio_encoding = "OGG_OPUS"

            [logging]
            level = "debug"
            format = "json"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.server.max_sessions, 8);
        assert_eq!(config.pipeline.queue_capacity, 2);
        assert_eq!(config.pipeline.drain_timeout(), Duration::from_millis(500));
        assert_eq!(config.services.transcription_url, "http://stt.local");
        assert_eq!(config.services.audio_encoding, AudioEncoding::OggOpus);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [pipeline]
            queue_capacity = 8
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.queue_capacity, 8);
        assert_eq!(config.pipeline.drain_timeout_ms, 10_000);
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.services, ServicesConfig::default());
    }

    #[test]
    fn test_env_override_urls_and_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_transteek_env();

        set_env("TRANSTEEK_API_KEY", "secret");
        set_env("TRANSTEEK_TRANSLATION_URL", "http://mt.example");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.services.api_key.as_deref(), Some("secret"));
        assert_eq!(config.services.translation_url, "http://mt.example");
        assert_eq!(config.services.synthesis_url, "");

        clear_transteek_env();
    }

    #[test]
    fn test_env_port_replaces_port_only() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_transteek_env();

        set_env("TRANSTEEK_BIND", "127.0.0.1:1000");
        set_env("PORT", "8000");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.bind, "127.0.0.1:8000");

        clear_transteek_env();
    }

    #[test]
    fn test_env_invalid_port_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_transteek_env();

        set_env("PORT", "eighty");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.bind, "0.0.0.0:8765");

        clear_transteek_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_transteek_env();

        set_env("TRANSTEEK_BIND", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.server.bind, "0.0.0.0:8765");

        clear_transteek_env();
    }

    #[test]
    fn test_replace_port_without_port() {
        assert_eq!(replace_port("localhost", 80), "localhost:80");
        assert_eq!(replace_port("[::1]:1", 80), "[::1]:80");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [server
            bind = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("transteek"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[server\nbind = ").unwrap();

        let error = Config::load_or_default(temp_file.path()).unwrap_err();
        assert!(error.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_validate_requires_service_urls_in_http_mode() {
        let error = Config::default().validate().unwrap_err();
        assert!(matches!(
            error,
            TransteekError::ConfigInvalidValue { ref key, .. } if key == "services.transcription_url"
        ));

        assert!(http_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut config = http_config();
        config.services.synthesis_url = "ftp://tts.local".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_queue_capacity() {
        let mut config = http_config();
        config.pipeline.queue_capacity = 0;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("pipeline.queue_capacity"));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = http_config();
        config.pipeline.drain_timeout_ms = 0;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("pipeline.drain_timeout_ms"));

        let mut config = http_config();
        config.server.config_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_other_sample_rates() {
        let mut config = http_config();
        config.pipeline.sample_rate = 48000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_stub_mode_matches_feature() {
        let mut config = Config::default();
        config.services.mode = ServiceMode::Stub;
        let result = config.validate();
        if cfg!(feature = "stub-services") {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(TransteekError::NotImplemented { .. })));
        }
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = http_config();
        config.services.api_key = Some("secret".to_string());

        let shown = config.redacted().to_toml().unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("********"));
    }

    #[test]
    fn test_audio_encoding_names() {
        assert_eq!(AudioEncoding::Mp3.as_str(), "MP3");
        assert_eq!(AudioEncoding::OggOpus.file_extension(), "ogg");
        assert_eq!(AudioEncoding::Linear16.file_extension(), "wav");
    }
}
