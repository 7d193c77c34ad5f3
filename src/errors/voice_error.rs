/// Error types for the speech-to-utterance pipeline.
///
/// Messages carry the most specific classification available so the host
/// application can surface them directly to the user.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VoiceError {
    /// The credential endpoint returned a non-2xx response or an unusable body.
    #[error("Credential request failed: {0}")]
    Credential(String),
    /// The credential endpoint answered HTTP 429.
    #[error("Credential endpoint rate limited: {0}")]
    RateLimited(String),
    /// The streaming connection failed or closed when it should not have.
    #[error("Connection error: {0}")]
    Connection(String),
    /// An inbound protocol message could not be parsed. Recovered locally,
    /// never fatal to the session.
    #[error("Malformed server message: {0}")]
    ProtocolParse(String),
    /// The downstream dialogue call failed. Local to one utterance; the
    /// session stays connected.
    #[error("Dialogue dispatch failed: {0}")]
    Dispatch(String),
    /// Microphone capture or the audio pipeline failed.
    #[error("Audio capture error: {0}")]
    Audio(String),
    /// Invalid configuration or an operation issued in the wrong state.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VoiceError {
    /// Whether this error tears the session down (as opposed to being
    /// recovered in place or scoped to one utterance).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VoiceError::ProtocolParse(_) | VoiceError::Dispatch(_))
    }
}

/// Result type alias for pipeline operations.
pub type VoiceResult<T> = Result<T, VoiceError>;
