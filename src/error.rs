//! Error types for the lilt call core.

/// Top-level error type for the call core.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Audio codec or resampling error.
    #[error("codec error: {0}")]
    Codec(String),

    /// AI gateway error (transcribe/translate/reason/synthesize).
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Media stream transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Call session / pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol encode/decode error.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CallError>;
