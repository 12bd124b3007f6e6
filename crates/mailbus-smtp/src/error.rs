//! Error types for SMTP operations

use std::path::PathBuf;

use mailbus_core::CoreError;
use thiserror::Error;

/// Result type for SMTP operations
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Errors that can occur during SMTP operations
#[derive(Debug, Error)]
pub enum SmtpError {
    /// Missing or invalid sender configuration
    #[error("SMTP configuration error: {0}")]
    Configuration(String),

    /// Connection failed
    #[error("Failed to connect to SMTP server: {0}")]
    ConnectionFailed(String),

    /// Failed to send message
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Mail has no To recipient
    #[error("Mail has no recipient")]
    NoRecipients,

    /// Invalid email address
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Attached file does not exist
    #[error("Attachment not found: {}", .0.display())]
    AttachmentNotFound(PathBuf),

    /// Attached file cannot be read
    #[error("Cannot read attachment {path}: {1}", path = .0.display())]
    AttachmentUnreadable(PathBuf, String),

    /// Message building error
    #[error("Failed to build message: {0}")]
    MessageBuildError(String),
}

impl From<CoreError> for SmtpError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::AttachmentNotFound(path) => SmtpError::AttachmentNotFound(path),
            CoreError::Configuration(e) => SmtpError::Configuration(e),
            other => SmtpError::MessageBuildError(other.to_string()),
        }
    }
}
