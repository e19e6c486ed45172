//! Error types for transteek.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransteekError {
    // Session configuration errors
    #[error("Invalid session configuration: {message}")]
    Configuration { message: String },

    // Configuration file errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    // External service errors
    #[error("Transcription service error: {message}")]
    TranscriptionService { message: String },

    #[error("Translation service error: {message}")]
    TranslationService { message: String, retryable: bool },

    #[error("Synthesis service error: {message}")]
    SynthesisService { message: String, retryable: bool },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("{failures} service failures within {window_ms}ms, giving up on session")]
    SystemicFailure { failures: usize, window_ms: u64 },

    // Pipeline errors
    #[error("Utterance queue at capacity for {waited_ms}ms")]
    Overload { waited_ms: u64 },

    #[error("Pipeline stage closed: {stage}")]
    PipelineClosed { stage: String },

    #[error("Session limit reached ({max} active sessions)")]
    CapacityExceeded { max: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TransteekError {
    /// Creates a transport error from any message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a session configuration error from any message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call later could succeed.
    ///
    /// Timeouts, rate limits and server-side failures are transient;
    /// authentication and addressing failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::TranslationService { retryable, .. }
            | Self::SynthesisService { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns true if the service refused the call outright (bad
    /// credentials or a missing resource). Such a failure will recur on
    /// every utterance.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::TranslationService {
                retryable: false,
                ..
            } | Self::SynthesisService {
                retryable: false,
                ..
            }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TransteekError>;
