//! Error types for POP3 operations

use mailbus_core::TransportError;
use thiserror::Error;

/// Result type for POP3 operations
pub type Pop3Result<T> = Result<T, Pop3Error>;

/// Errors that can occur during POP3 operations
#[derive(Debug, Error)]
pub enum Pop3Error {
    /// Connection failed
    #[error("Failed to connect to POP3 server: {0}")]
    ConnectionFailed(String),

    /// USER/PASS rejected
    #[error("POP3 authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server answered -ERR or something unexpected
    #[error("POP3 server error: {0}")]
    ServerError(String),

    /// POP3 only serves the INBOX
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// Message is not part of the current maildrop listing
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Downloaded message cannot be parsed
    #[error("Failed to parse POP3 message: {0}")]
    ParseError(String),

    /// TLS error
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Server closed the connection
    #[error("POP3 server closed the connection")]
    ConnectionClosed,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Session is not connected
    #[error("POP3 session is not connected")]
    NotConnected,
}

impl From<Pop3Error> for TransportError {
    fn from(error: Pop3Error) -> Self {
        match error {
            Pop3Error::ConnectionFailed(e) | Pop3Error::TlsError(e) => {
                TransportError::ConnectionFailed(e)
            }
            Pop3Error::AuthenticationFailed(e) => TransportError::AuthenticationFailed(e),
            Pop3Error::ServerError(e) => TransportError::Protocol(e),
            Pop3Error::FolderNotFound(folder) => TransportError::FolderNotFound(folder),
            Pop3Error::MessageNotFound(key) => TransportError::MessageNotFound(key),
            Pop3Error::ParseError(e) => TransportError::Malformed(e),
            Pop3Error::ConnectionClosed => {
                TransportError::ConnectionFailed("connection closed by server".into())
            }
            Pop3Error::IoError(e) => TransportError::Io(e),
            Pop3Error::NotConnected => TransportError::NotConnected,
        }
    }
}
