// Multitrack Video Errors
// Failure kinds raised while preparing a multitrack session

use thiserror::Error;

/// How a failure is surfaced to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocking message; the attempt is over
    Critical,
    /// Dismissible message; the operator may retry with other settings
    Warning,
    /// The operator declined to continue
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultitrackVideoError {
    #[error("No go-live config URL is configured")]
    MissingConfigUrl,

    #[error("Failed to fetch go-live config from {url}: {reason}")]
    ConfigRequestFailed { url: String, reason: String },

    #[error("Go-live config could not be parsed: {reason}")]
    InvalidConfigResponse { reason: String, raw: String },

    #[error("Go-live server reported an error: {0}")]
    ServerError(String),

    #[error("Go-live server reported a warning and sent no encoder configurations: {0}")]
    ServerWarningWithoutEncoders(String),

    #[error("Invalid custom config: {0}")]
    InvalidCustomConfig(String),

    #[error("Operator cancelled the stream")]
    Cancelled,

    #[error("No RTMP URL in go-live config")]
    NoRtmpUrl,

    #[error("Custom RTMP URL is set but empty")]
    EmptyCustomRtmpUrl,

    #[error("Encoder type '{0}' is not available")]
    EncoderNotAvailable(String),

    #[error("Failed to create video encoder {index}: {reason}")]
    VideoEncoderCreation { index: usize, reason: String },

    #[error("Failed to create audio encoder {index}: {reason}")]
    AudioEncoderCreation { index: usize, reason: String },

    #[error("Missing {0} encoder configurations")]
    MissingEncoderConfigs(&'static str),

    #[error("Failed to query video info for encoder {0}")]
    VideoInfoUnavailable(usize),

    #[error("Failed to create {0} output")]
    OutputCreation(String),

    #[error("Failed to create multitrack video service")]
    ServiceCreation,
}

impl MultitrackVideoError {
    pub fn severity(&self) -> Severity {
        match self {
            MultitrackVideoError::InvalidCustomConfig(_)
            | MultitrackVideoError::ServerError(_)
            | MultitrackVideoError::ServerWarningWithoutEncoders(_) => Severity::Critical,
            MultitrackVideoError::Cancelled => Severity::Cancelled,
            _ => Severity::Warning,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.severity() == Severity::Cancelled
    }
}
