//! POP3 transport for mailbus
//!
//! Provides a pull-only [`MailTransport`](mailbus_core::MailTransport)
//! speaking the POP3 protocol directly over `async-std`, plain or TLS.

mod client;
mod error;
pub mod protocol;

use std::sync::Arc;

use mailbus_core::{CoreResult, EventPublisher, MailReceiver, ReceiverConfig};

pub use client::{Pop3Io, Pop3Transport, INBOX, POP3S_PORT, POP3_PORT};
pub use error::{Pop3Error, Pop3Result};

/// Create a receiver polling a POP3 maildrop
pub fn pop3_receiver(
    config: ReceiverConfig,
    publisher: EventPublisher,
) -> CoreResult<MailReceiver> {
    let transport = Arc::new(Pop3Transport::new(config.clone()));
    MailReceiver::new(config, transport, publisher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailbus_core::{CoreError, ReceiverState};

    #[test]
    fn test_receiver_factory() {
        let receiver = pop3_receiver(
            ReceiverConfig::new("pop.example.com", "bob", "secret"),
            EventPublisher::disabled(),
        )
        .unwrap();
        assert_eq!(receiver.state(), ReceiverState::Created);
        assert_eq!(receiver.folder(), "INBOX");
    }

    #[tokio::test]
    async fn test_unknown_folder_fails_start() {
        let receiver = pop3_receiver(
            ReceiverConfig::new("pop.example.com", "bob", "secret").with_folder("Sent"),
            EventPublisher::disabled(),
        )
        .unwrap();

        assert!(matches!(
            receiver.start().await,
            Err(CoreError::Configuration(_))
        ));
        assert_eq!(receiver.state(), ReceiverState::Closed);
    }
}
