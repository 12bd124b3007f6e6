//! Error types for IMAP operations

use mailbus_core::TransportError;
use thiserror::Error;

/// Result type for IMAP operations
pub type ImapResult<T> = Result<T, ImapError>;

/// Errors that can occur during IMAP operations
#[derive(Debug, Error)]
pub enum ImapError {
    /// Connection failed
    #[error("Failed to connect to IMAP server: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("IMAP authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server returned an error
    #[error("IMAP server error: {0}")]
    ServerError(String),

    /// Folder not found
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// Message not found
    #[error("Message not found: UID {0}")]
    MessageNotFound(u32),

    /// Message handle does not carry a UID
    #[error("Invalid message handle: {0}")]
    InvalidHandle(String),

    /// Parse error
    #[error("Failed to parse IMAP message: {0}")]
    ParseError(String),

    /// TLS error
    #[error("TLS error: {0}")]
    TlsError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Session is not connected
    #[error("IMAP session is not connected")]
    NotConnected,
}

impl From<ImapError> for TransportError {
    fn from(error: ImapError) -> Self {
        match error {
            ImapError::ConnectionFailed(e) | ImapError::TlsError(e) => {
                TransportError::ConnectionFailed(e)
            }
            ImapError::AuthenticationFailed(e) => TransportError::AuthenticationFailed(e),
            ImapError::ServerError(e) => TransportError::Protocol(e),
            ImapError::FolderNotFound(folder) => TransportError::FolderNotFound(folder),
            ImapError::MessageNotFound(uid) => TransportError::MessageNotFound(uid.to_string()),
            ImapError::InvalidHandle(handle) => TransportError::MessageNotFound(handle),
            ImapError::ParseError(e) => TransportError::Malformed(e),
            ImapError::IoError(e) => TransportError::Io(e),
            ImapError::NotConnected => TransportError::NotConnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_transport_error() {
        assert!(matches!(
            TransportError::from(ImapError::FolderNotFound("Archive".into())),
            TransportError::FolderNotFound(f) if f == "Archive"
        ));
        assert!(matches!(
            TransportError::from(ImapError::TlsError("handshake".into())),
            TransportError::ConnectionFailed(_)
        ));
        assert!(matches!(
            TransportError::from(ImapError::NotConnected),
            TransportError::NotConnected
        ));
    }
}
