//! Mail transport capability
//!
//! The receiver talks to a mail server only through [`MailTransport`].
//! Protocol crates implement it; the core never does network I/O itself.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::channel::mpsc;
use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors reported by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed
    #[error("Failed to connect to mail server: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Folder does not exist on the server
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// Message handle is unknown to the current connection
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Server answered something we cannot use
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message bytes could not be parsed
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Operation requires an open connection
    #[error("Transport is not connected")]
    NotConnected,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque, stable identity of a message for the lifetime of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    folder: Option<String>,
    key: String,
}

impl MessageHandle {
    pub fn new(folder: Option<String>, key: impl Into<String>) -> Self {
        Self {
            folder,
            key: key.into(),
        }
    }

    /// Name of the folder the message lives in, if known
    pub fn folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    /// Transport key (IMAP UID, POP3 UIDL, ...)
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder.as_deref().unwrap_or(""), self.key)
    }
}

/// Header-level data of a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEnvelope {
    /// From addresses, display-formatted
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub reply_to: Vec<String>,
    pub subject: Option<String>,
    /// Date the message was sent
    pub sent: Option<DateTime<Utc>>,
}

/// One part of a multipart body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    /// Full Content-Type header value of the part
    pub content_type: Option<String>,
    /// Decoded text of the part (empty for binary parts)
    pub content: String,
}

/// Decoded content of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawContent {
    /// Single text body
    Text(String),
    /// Multipart body, parts in order
    Multipart(Vec<BodyPart>),
    /// Nested message/rfc822
    Message,
    /// Anything else
    Binary,
}

/// Message flags as seen by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFlags {
    /// Message has been read
    pub seen: bool,
    /// Message arrived since the mailbox was last opened
    pub recent: bool,
    /// Message has been answered
    pub answered: bool,
    /// Message is flagged/starred
    pub flagged: bool,
    /// Message is marked for deletion
    pub deleted: bool,
    /// Message is a draft
    pub draft: bool,
    /// Custom flags
    pub custom: HashSet<String>,
}

impl MessageFlags {
    /// Parse flags from their IMAP spelling ("\Seen", "\Recent", ...)
    pub fn from_imap_flags(flags: &[&str]) -> Self {
        let mut result = MessageFlags::default();

        for flag in flags {
            match flag.to_lowercase().as_str() {
                "\\seen" => result.seen = true,
                "\\recent" => result.recent = true,
                "\\answered" => result.answered = true,
                "\\flagged" => result.flagged = true,
                "\\deleted" => result.deleted = true,
                "\\draft" => result.draft = true,
                other => {
                    result.custom.insert(other.to_string());
                }
            }
        }

        result
    }
}

/// How the folder ended up being opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderAccess {
    ReadWrite,
    ReadOnly,
}

/// Change pushed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxChange {
    /// Messages appeared in the folder
    Added(Vec<MessageHandle>),
    /// Messages were expunged from the folder
    Removed(Vec<MessageHandle>),
}

/// Stream of pushed mailbox changes
pub type MailboxChanges = mpsc::UnboundedReceiver<MailboxChange>;

/// Capability the receiver needs from a mail server connection
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Name of the opened folder, used for event topics
    fn folder_name(&self) -> String;

    /// Connect, authenticate and open the folder, read-write if possible,
    /// read-only otherwise.
    async fn connect(&self) -> TransportResult<FolderAccess>;

    /// Close the folder without expunging and drop the connection
    async fn close(&self) -> TransportResult<()>;

    /// Handles of every message currently in the folder
    async fn list_messages(&self) -> TransportResult<Vec<MessageHandle>>;

    /// Envelope of a top-level message, `None` when the handle has none
    async fn envelope(&self, handle: &MessageHandle) -> TransportResult<Option<RawEnvelope>>;

    /// Content-Type header value of the message
    async fn content_type(&self, handle: &MessageHandle) -> TransportResult<Option<String>>;

    /// Decoded body content
    async fn content(&self, handle: &MessageHandle) -> TransportResult<RawContent>;

    /// Current flags of the message
    async fn flags(&self, handle: &MessageHandle) -> TransportResult<MessageFlags>;

    /// Number of messages in the folder. Push-capable transports use this
    /// round trip to notice new mail.
    async fn message_count(&self) -> TransportResult<usize>;

    /// Take the change stream of a push-capable transport. Pull-only
    /// transports return `None`.
    fn subscribe(&self) -> Option<MailboxChanges> {
        None
    }
}
