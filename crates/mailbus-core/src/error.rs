//! Error types for the core module

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or invalid configuration; the instance is not usable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The transport failed while serving the current operation
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A raw message could not be turned into a mail
    #[error("Cannot convert message: {0}")]
    Conversion(String),

    /// Attached file does not exist
    #[error("Attachment not found: {}", .0.display())]
    AttachmentNotFound(PathBuf),

    /// Receiver used outside of its lifecycle
    #[error("Invalid receiver state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Folder-resolution failures are configuration problems, everything
    /// else a transport reports stays a transport error.
    pub fn from_transport(error: TransportError) -> Self {
        match error {
            TransportError::FolderNotFound(folder) => {
                CoreError::Configuration(format!("Cannot find folder {}", folder))
            }
            other => CoreError::Transport(other),
        }
    }
}
