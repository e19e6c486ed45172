//! Default configuration constants for transteek.
//!
//! Shared by the configuration types and the pipeline so that both agree
//! on the values used when nothing is configured.

/// Audio sample rate in Hz expected on the inbound audio track.
///
/// Uplink audio is 16-bit little-endian mono PCM at this rate.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per PCM sample on the inbound audio track.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Frame length in milliseconds used when slicing WAV files into frames.
pub const FRAME_MS: u32 = 100;

/// Encoding name sent to the speech recognition service.
pub const RECOGNITION_ENCODING: &str = "LINEAR16";

/// Capacity of the utterance queue between transcription and translation.
///
/// Small on purpose: if translation falls behind, transcription waits
/// instead of piling up stale speech.
pub const QUEUE_CAPACITY: usize = 4;

/// How long a push may wait on a full utterance queue before an overload
/// warning is raised.
pub const OVERLOAD_WARN_MS: u64 = 2000;

/// Time allowed for in-flight utterances to finish once a session drains.
pub const DRAIN_TIMEOUT_MS: u64 = 10_000;

/// Per-call timeout for external service requests.
pub const SERVICE_TIMEOUT_MS: u64 = 8000;

/// Time allowed for a client to send its language configuration.
pub const CONFIG_TIMEOUT_MS: u64 = 10_000;

/// Timeout for writing one synthesized chunk to the outbound channel.
pub const OUTPUT_WRITE_TIMEOUT_MS: u64 = 5000;

/// Number of failed utterances within the failure window that ends a session.
pub const FAILURE_THRESHOLD: usize = 3;

/// Sliding window for counting utterance failures.
pub const FAILURE_WINDOW_MS: u64 = 30_000;

/// Frames buffered between the transcription station and the recognition
/// service uplink.
pub const UPLINK_BUFFER_FRAMES: usize = 32;

/// Recognition results buffered before the service client waits.
pub const RESULT_BUFFER: usize = 16;

/// Default listen address. Port 8765 unless `PORT` says otherwise.
pub const BIND_ADDR: &str = "0.0.0.0:8765";

/// Upper bound on concurrently active sessions.
pub const MAX_SESSIONS: usize = 64;

/// Voice variant appended to the target language tag ("fr-FR-Standard-A").
pub const VOICE_SUFFIX: &str = "Standard-A";

/// Default log filter when neither `TRANSTEEK_LOG` nor the config sets one.
pub const LOG_LEVEL: &str = "info";

/// Time a cancelled pipeline stage gets to hand back its resources before
/// its task is aborted.
pub const STAGE_STOP_GRACE_MS: u64 = 1000;
