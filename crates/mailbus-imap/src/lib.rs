//! IMAP transport for mailbus
//!
//! Provides a push-capable [`MailTransport`](mailbus_core::MailTransport)
//! over `async-imap`, plain or TLS, with username/password LOGIN.

mod client;
mod error;
mod folder;
mod message;

use std::sync::Arc;

use mailbus_core::{CoreResult, EventPublisher, MailReceiver, ReceiverConfig};

pub use client::{ImapIo, ImapTransport, IMAPS_PORT, IMAP_PORT};
pub use error::{ImapError, ImapResult};
pub use folder::{resolve_folder, Folder};
pub use message::{flag_name, message_flags};

/// Create a receiver watching an IMAP folder
pub fn imap_receiver(
    config: ReceiverConfig,
    publisher: EventPublisher,
) -> CoreResult<MailReceiver> {
    let transport = Arc::new(ImapTransport::new(config.clone()));
    MailReceiver::new(config, transport, publisher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailbus_core::{CoreError, ReceiverState};

    #[test]
    fn test_receiver_factory() {
        let receiver = imap_receiver(
            ReceiverConfig::new("imap.example.com", "bob", "secret"),
            EventPublisher::disabled(),
        )
        .unwrap();
        assert_eq!(receiver.state(), ReceiverState::Created);
        assert_eq!(receiver.folder(), "inbox");
    }

    #[test]
    fn test_receiver_factory_validates() {
        let result = imap_receiver(
            ReceiverConfig::new("imap.example.com", "bob", ""),
            EventPublisher::disabled(),
        );
        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }
}
