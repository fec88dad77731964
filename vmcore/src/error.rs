use thiserror::Error;

/// Failure taxonomy shared by every voice-message component.
///
/// Payloads are rendered messages rather than source errors so a single
/// failed download can be fanned out to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoiceError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("metadata resolution failed: {0}")]
    Metadata(String),
    #[error("audio decode failed: {0}")]
    Decode(String),
    #[error("audio encode failed: {0}")]
    Encode(String),
    #[error("io failure: {0}")]
    Io(String),
    #[error("playback failed: {0}")]
    Playback(#[from] PlaybackError),
    #[error("gesture handling failed: {0}")]
    Gesture(String),
}

impl From<std::io::Error> for VoiceError {
    fn from(err: std::io::Error) -> Self {
        VoiceError::Io(err.to_string())
    }
}

pub type Result<T, E = VoiceError> = std::result::Result<T, E>;

/// Errors reported by a platform audio handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    /// The play request was interrupted, usually by a pause or stop racing it.
    #[error("play request was aborted")]
    Aborted,
    /// The handle has been torn down and can no longer be driven.
    #[error("audio handle is detached")]
    Detached,
    #[error("platform refused playback: {0}")]
    Refused(String),
}
