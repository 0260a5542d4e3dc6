//! Error types for the audio module

use thiserror::Error;

/// Main error type for soundpost operations
///
/// Buffer overruns are deliberately absent: a reader that falls behind
/// is skipped forward and the loss is logged, never raised.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Caller-supplied data violates a contract
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Named device not present, or no default device
    #[error("not found: {0}")]
    NotFound(String),

    /// The host rejected the requested 16-bit PCM configuration
    #[error("format unsupported: {0}")]
    FormatUnsupported(String),

    /// The audio host returned an error; carries the host's error text
    #[error("audio host failure: {0}")]
    HostFailure(String),

    /// Encoder/decoder initialisation or operation failed
    #[error("codec failure: {0}")]
    CodecFailure(String),
}

/// Result type alias for soundpost operations
pub type AudioResult<T> = Result<T, AudioError>;

impl AudioError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn host_failure(message: impl Into<String>) -> Self {
        Self::HostFailure(message.into())
    }

    pub fn codec_failure(message: impl Into<String>) -> Self {
        Self::CodecFailure(message.into())
    }
}
