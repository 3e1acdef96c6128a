//! Pipeline Error Types
//!
//! Every error is terminal for its session. Each variant knows the lines the
//! client sees and the close frame that ends the connection.

use thiserror::Error;

use crate::resolver::ResolverError;
use crate::session::CloseReason;
use crate::transfer::TransferError;

/// Generic line shown after an unexpected failure
pub const TRY_AGAIN: &str = "An error occurred, please try again later";

/// Missing or malformed input
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Request is not a valid JSON object: {0}")]
    MalformedRequest(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Line breaks are not allowed in {0}")]
    LineBreak(&'static str),

    #[error("Composer content is not valid JSON: {0}")]
    InvalidManifest(String),

    #[error("Captcha verification failed")]
    CaptchaRejected,

    #[error("Only text messages are accepted")]
    UnsupportedMessage,
}

/// Session pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("FTP login failed: {0}")]
    Auth(#[source] TransferError),

    #[error("Upload directory {path:?} does not exist: {source}")]
    Path {
        path: String,
        #[source]
        source: TransferError,
    },

    #[error("Dependency resolution failed: {0}")]
    Subprocess(#[from] ResolverError),

    #[error("Upload failed: {0}")]
    Transfer(#[source] TransferError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short name of the failure class, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::Path { .. } => "path",
            Self::Subprocess(_) => "subprocess",
            Self::Transfer(_) => "transfer",
            Self::Internal(_) => "internal",
        }
    }

    /// Final lines sent to the client before the close frame
    pub fn status_lines(&self) -> Vec<String> {
        match self {
            Self::Validation(ValidationError::MalformedRequest(_)) => {
                vec!["Error: Request is not valid JSON".to_string()]
            }
            Self::Validation(ValidationError::MissingFields(fields)) => {
                vec![format!("Error: Missing required fields: {}", fields.join(", "))]
            }
            Self::Validation(ValidationError::LineBreak(field)) => {
                vec![format!("Error: Line breaks are not allowed in {}", field)]
            }
            Self::Validation(ValidationError::InvalidManifest(_)) => {
                vec!["Error: Composer content is not valid JSON".to_string()]
            }
            Self::Validation(ValidationError::CaptchaRejected) => {
                vec!["Error: Captcha verification failed".to_string()]
            }
            Self::Validation(ValidationError::UnsupportedMessage) => {
                vec!["Error: Only text messages are accepted".to_string()]
            }
            Self::Auth(_) => vec!["Error: FTP Credentials are invalid".to_string()],
            Self::Path { .. } => vec!["Error: Upload directory does not exist".to_string()],
            Self::Subprocess(ResolverError::Failed(code)) => {
                vec![format!("Error: Composer install failed (exit code {})", code)]
            }
            Self::Subprocess(ResolverError::TimedOut(secs)) => {
                vec![format!("Error: Composer install timed out after {}s", secs)]
            }
            Self::Subprocess(_) => vec![
                "Error: Composer could not be started".to_string(),
                TRY_AGAIN.to_string(),
            ],
            Self::Transfer(e) => vec![format!("Error: Upload failed: {}", e), TRY_AGAIN.to_string()],
            Self::Internal(msg) => vec![format!("Error: {}", msg), TRY_AGAIN.to_string()],
        }
    }

    /// Close frame ending the session
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Validation(ValidationError::MalformedRequest(_)) => CloseReason::policy("Invalid request"),
            Self::Validation(ValidationError::MissingFields(_)) => CloseReason::policy("Missing required fields"),
            Self::Validation(ValidationError::LineBreak(_)) => CloseReason::policy("Invalid request"),
            Self::Validation(ValidationError::InvalidManifest(_)) => CloseReason::policy("Invalid composer content"),
            Self::Validation(ValidationError::CaptchaRejected) => CloseReason::policy("Captcha verification failed"),
            Self::Validation(ValidationError::UnsupportedMessage) => CloseReason::policy("Unsupported message type"),
            Self::Auth(_) => CloseReason::policy("Invalid FTP credentials"),
            Self::Path { .. } => CloseReason::policy("Upload directory does not exist"),
            Self::Subprocess(ResolverError::Failed(_)) | Self::Subprocess(ResolverError::TimedOut(_)) => {
                CloseReason::policy("Dependency resolution failed")
            }
            Self::Subprocess(_) => CloseReason::error("Dependency resolution failed"),
            Self::Transfer(_) => CloseReason::error("Upload failed"),
            Self::Internal(_) => CloseReason::error("Internal error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::close_code;

    #[test]
    fn test_policy_violations() {
        let missing = PipelineError::from(ValidationError::MissingFields(vec!["password"]));
        assert_eq!(missing.kind(), "validation");
        assert_eq!(missing.close_reason().code, close_code::POLICY);
        assert_eq!(missing.status_lines(), vec!["Error: Missing required fields: password"]);
        assert_eq!(missing.to_string(), "Validation failed: Missing required fields: password");

        let path = PipelineError::Path {
            path: "/www".into(),
            source: TransferError::UnexpectedReply {
                code: 550,
                message: "No such directory".into(),
            },
        };
        assert_eq!(path.close_reason(), CloseReason::policy("Upload directory does not exist"));

        let failed = PipelineError::from(ResolverError::Failed(1));
        assert_eq!(failed.close_reason().code, close_code::POLICY);
        assert!(failed.status_lines()[0].contains("exit code 1"));
    }

    #[test]
    fn test_unexpected_failures_use_internal_close() {
        let err = PipelineError::Internal("disk full".into());
        assert_eq!(err.close_reason().code, close_code::ERROR);
        assert_eq!(err.status_lines(), vec!["Error: disk full", TRY_AGAIN]);

        let err = PipelineError::Transfer(TransferError::ConnectionClosed);
        assert_eq!(err.close_reason().code, close_code::ERROR);
        assert_eq!(err.status_lines().last().map(String::as_str), Some(TRY_AGAIN));
    }
}
