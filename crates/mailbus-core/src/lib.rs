//! Core of mailbus
//!
//! Provides the mail model, the transport capability protocol crates
//! implement, the fetch cache, the receiver scheduler and event publishing.

mod cache;
mod config;
mod convert;
mod error;
pub mod events;
mod mail;
mod receiver;
pub mod rfc822;
mod transport;

pub use cache::MailCache;
pub use config::{ReceiverConfig, DEFAULT_FOLDER, DEFAULT_POLLING_INTERVAL_MS};
pub use convert::create_mail;
pub use error::{CoreError, CoreResult};
pub use events::{ChannelSink, EventPublisher, EventSink, MailEvent, PublishError, TracingSink};
pub use mail::{Mail, MailBuilder, DEFAULT_SUBJECT};
pub use receiver::{MailReceiver, ReceiverState};
pub use transport::{
    BodyPart, FolderAccess, MailTransport, MailboxChange, MailboxChanges, MessageFlags,
    MessageHandle, RawContent, RawEnvelope, TransportError, TransportResult,
};
