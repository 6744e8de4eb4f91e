use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Chunk arrived with an encoding tag we do not know how to decode
    #[error("unsupported encoding")]
    UnsupportedEncoding,

    /// Chunk payload is malformed for its declared encoding
    #[error("failed to decode {encoding} payload: {reason}")]
    DecodeError {
        encoding: &'static str,
        reason: String,
    },

    /// No analysis session is active for this identifier
    #[error("unknown analysis session: {0}")]
    UnknownSession(String),

    /// Buffer does not start with a valid capture header
    #[error("invalid capture format: {0}")]
    InvalidCaptureFormat(String),

    /// A frame record runs past the end of the buffer
    #[error("truncated frame {frame}: only {remaining} bytes left in the capture")]
    TruncatedFrame { frame: u64, remaining: usize },

    /// Event payload is not valid JSON for its subject
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for application
pub type AppResult<T> = Result<T, AppError>;
