//! Upload error types.

use std::fmt;

use chunkload_transfer::TransferError;

/// Error code reported when an upload has no error.
pub const NO_ERROR: i32 = 0;

/// Classification of a failed chunk exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or HTTP layer failure.
    Transport,
    /// Reading the source file failed.
    LocalIo,
    /// Anything else, including an unexpected response status.
    Other,
}

impl ErrorKind {
    /// Numeric code exposed to hosts in failure notifications.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Transport => 1,
            ErrorKind::LocalIo => 2,
            ErrorKind::Other => 4,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport error",
            ErrorKind::LocalIo => "local I/O error",
            ErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

/// A failed chunk exchange. Always retryable until the budget runs out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ChunkFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChunkFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn local_io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LocalIo, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }
}

/// Errors returned by the registry and configuration APIs.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already running: {0}")]
    SessionActive(String),

    #[error("session already registered: {0}")]
    DuplicateSession(String),

    #[error("invalid upload URL: {0}")]
    InvalidUrl(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
