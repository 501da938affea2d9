//! Error types for the Robin voice loop
//!
//! [`Error`] is the crate-wide error. The four domain taxonomies below it
//! mirror the places a turn can fail; each is recovered at a different layer
//! (capture and playback locally by the controller, synthesis per chunk by the
//! playback engine, orchestration by aborting the turn).

use thiserror::Error;

/// Result type alias for Robin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Robin voice loop
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech recognition error
    #[error("recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    /// Reply generation / intent classification error
    #[error("orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Audio playback error
    #[error("playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// History persistence error
    #[error("history error: {0}")]
    History(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Speech recognition failures
///
/// All of these are recoverable; the controller decides when to listen again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeech,

    #[error("microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("network unavailable: {0}")]
    Network(String),

    #[error("recognition service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("recognition aborted")]
    Aborted,
}

impl RecognitionError {
    /// Fixed message shown to the user for this failure
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::NoSpeech => "صدایی شنیده نشد. لطفاً دوباره تلاش کنید.",
            Self::MicrophoneUnavailable(_) => "خطا در دسترسی به میکروفون",
            Self::PermissionDenied => "دسترسی به میکروفون رد شد",
            Self::Network(_) => "خطا در اتصال به اینترنت",
            Self::ServiceUnavailable(_) => "سرویس تشخیص گفتار دردسترس نیست",
            Self::Aborted => "تشخیص گفتار متوقف شد",
        }
    }
}

/// Failures of the reply generator or intent classifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    #[error("upstream timed out")]
    Timeout,

    #[error("upstream returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("upstream unreachable: {0}")]
    Network(String),

    #[error("malformed upstream response: {0}")]
    InvalidResponse(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}

impl OrchestrationError {
    /// Generic message surfaced to the user when a turn is aborted
    pub const USER_MESSAGE: &'static str = "متأسفم، مشکلی پیش آمد. لطفاً دوباره امتحان کنید.";

    /// Whether a sub-call failing this way is worth another attempt
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::MissingCredentials(_) => false,
        }
    }
}

/// Synthesis failures for one chunk of text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// Transport-level failure (connect, DNS, timeout)
    #[error("synthesis network error: {0}")]
    Network(String),

    /// Upstream answered with a server error
    #[error("synthesis server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Upstream answered, but not with anything we can play
    #[error("invalid synthesis response: {0}")]
    InvalidResponse(String),
}

impl SynthesisError {
    /// Network and server errors are retried by the playback engine
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    /// Classify a transport error from `reqwest`
    #[must_use]
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::Server {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        Self::Network(e.to_string())
    }
}

/// Playback failures for one chunk of audio
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("audio decode failed: {0}")]
    Decode(String),

    /// The output refuses to start without a user gesture
    #[error("autoplay blocked")]
    AutoplayBlocked,

    #[error("audio load timed out")]
    LoadTimeout,

    #[error("audio load failed: {0}")]
    Load(String),

    #[error("audio output failed: {0}")]
    Output(String),

    /// Every chunk of a reply failed
    #[error("no chunk of the reply could be played")]
    Exhausted,
}
