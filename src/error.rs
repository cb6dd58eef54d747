//! Error types for the parley client.

/// Top-level error type for the voice chat client.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// The chat endpoint answered with a non-success HTTP status.
    ///
    /// Carries the status code and the response body text. No partial
    /// content is ever returned alongside this error.
    #[error("transport error: HTTP {status}: {body}")]
    Transport {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("request error: {0}")]
    Request(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Voice capture session error.
    #[error("capture error: {0}")]
    Capture(String),

    /// The speech-recognition capability refused permission.
    #[error("speech recognition permission denied")]
    PermissionDenied,

    /// No speech-recognition provider is usable on this system.
    #[error("no speech recognition provider available")]
    CapabilityUnavailable,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ParleyError>;
