//! Transfer Error Types

use thiserror::Error;

/// Errors from the transfer adapter
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout after {0}s")]
    ConnectionTimeout(u64),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Unexpected reply {code}: {message}")]
    UnexpectedReply { code: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for {0}")]
    TimedOut(&'static str),
}

impl TransferError {
    /// Reply code, if the server answered with one
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedReply { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;
