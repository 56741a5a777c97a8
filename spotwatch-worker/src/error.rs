//! Error types shared by every spotwatch component.
//!
//! Errors are grouped into the kinds the service reacts to differently:
//! transient I/O is retried by the reconnect loop or the next scheduler
//! tick, everything else is surfaced once and never retried.

use thiserror::Error;

/// Convenience alias used across the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification used for retry and status decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Validation,
    Unauthorized,
    Conflict,
    NotFound,
    Invariant,
    Fatal,
}

#[derive(Debug, Error)]
pub enum Error {
    // =========================================================================
    // Transient I/O
    // =========================================================================
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("price source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("price source returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    // =========================================================================
    // Caller errors
    // =========================================================================
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no handler for routing key '{0}'")]
    UnroutableMessage(String),

    // =========================================================================
    // Invariants and fatal conditions
    // =========================================================================
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("broker reconnect failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Broker(_) | Error::Http(_) | Error::Upstream { .. } => ErrorKind::Transient,
            Error::Validation(_) | Error::Decode(_) | Error::UnroutableMessage(_) => {
                ErrorKind::Validation
            }
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Invariant(_) => ErrorKind::Invariant,
            Error::ReconnectExhausted { .. } => ErrorKind::Fatal,
        }
    }

    /// Whether a later attempt of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// HTTP status used when the error reaches the web layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Http(_) | Error::Upstream { .. } => 502,
            _ => match self.kind() {
                ErrorKind::Validation => 400,
                ErrorKind::Unauthorized => 401,
                ErrorKind::NotFound => 404,
                ErrorKind::Conflict => 409,
                _ => 500,
            },
        }
    }
}
