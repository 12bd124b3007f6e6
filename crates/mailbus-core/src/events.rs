//! Mail notification events
//!
//! Receivers publish one event per newly seen mail, senders one per
//! delivery attempt. Publishing is fire-and-forget: a failing sink never
//! fails the operation that produced the event.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::mail::Mail;

/// Base topic of new-mail events; the folder name is appended
pub const DEFAULT_RECEIVE_TOPIC: &str = "mailbus/mail";

/// Topic of delivery events
pub const DEFAULT_SENT_TOPIC: &str = "mailbus/mail/sent";

/// Event property keys
pub mod keys {
    pub const FROM: &str = "from";
    pub const TO: &str = "to";
    pub const CC: &str = "cc";
    pub const SUBJECT: &str = "subject";
    pub const BODY: &str = "body";
    pub const STATUS: &str = "status";
    pub const ERROR: &str = "error";
    pub const MESSAGE_ID: &str = "message.id";
}

/// Event payload
pub type EventProperties = Map<String, Value>;

/// One published event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailEvent {
    pub topic: String,
    pub properties: EventProperties,
}

impl MailEvent {
    /// String property, if present
    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Errors a sink may report
#[derive(Debug, Error)]
pub enum PublishError {
    /// Nobody listens anymore
    #[error("Event sink is closed")]
    Closed,

    #[error("Publish failed: {0}")]
    Failed(String),
}

/// Destination of published events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: MailEvent) -> Result<(), PublishError>;
}

/// Sink forwarding events into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<MailEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MailEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: MailEvent) -> Result<(), PublishError> {
        self.tx.send(event).map_err(|_| PublishError::Closed)
    }
}

/// Sink that only logs events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: MailEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&event.properties)
            .map_err(|e| PublishError::Failed(e.to_string()))?;
        info!(topic = %event.topic, "{}", payload);
        Ok(())
    }
}

/// Builds events and hands them to the configured sink
#[derive(Clone)]
pub struct EventPublisher {
    sink: Option<Arc<dyn EventSink>>,
    receive_topic: String,
    sent_topic: String,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("enabled", &self.sink.is_some())
            .field("receive_topic", &self.receive_topic)
            .field("sent_topic", &self.sent_topic)
            .finish()
    }
}

impl EventPublisher {
    /// Publisher using the default topics
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink: Some(sink),
            receive_topic: DEFAULT_RECEIVE_TOPIC.to_string(),
            sent_topic: DEFAULT_SENT_TOPIC.to_string(),
        }
    }

    /// Publisher without a sink; every publish is skipped
    pub fn disabled() -> Self {
        Self {
            sink: None,
            receive_topic: DEFAULT_RECEIVE_TOPIC.to_string(),
            sent_topic: DEFAULT_SENT_TOPIC.to_string(),
        }
    }

    pub fn with_topics(mut self, receive_topic: impl Into<String>, sent_topic: impl Into<String>) -> Self {
        self.receive_topic = receive_topic.into();
        self.sent_topic = sent_topic.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Announce a mail that just entered a receiver's cache
    pub fn mail_received(&self, mail: &Mail, folder: &str) {
        let mut properties = EventProperties::new();
        properties.insert(keys::TO.into(), Value::from(mail.to().to_vec()));
        properties.insert(
            keys::FROM.into(),
            mail.from().map(Value::from).unwrap_or(Value::Null),
        );
        properties.insert(keys::CC.into(), Value::from(mail.cc().to_vec()));
        properties.insert(
            keys::SUBJECT.into(),
            Value::from(mail.subject().unwrap_or_default()),
        );
        properties.insert(
            keys::MESSAGE_ID.into(),
            mail.id().map(Value::from).unwrap_or(Value::Null),
        );

        self.publish(format!("{}/{}", self.receive_topic, folder), properties);
    }

    /// Announce the outcome of a delivery attempt
    pub fn mail_sent(&self, from: &str, mail: &Mail, outcome: Result<(), String>) {
        let mut properties = EventProperties::new();
        properties.insert(keys::FROM.into(), Value::from(from));
        properties.insert(keys::TO.into(), Value::from(mail.to().to_vec()));
        properties.insert(keys::CC.into(), Value::from(mail.cc().to_vec()));
        properties.insert(
            keys::SUBJECT.into(),
            Value::from(mail.subject().unwrap_or_default()),
        );
        properties.insert(keys::BODY.into(), Value::from(mail.body()));
        properties.insert(keys::STATUS.into(), Value::from(outcome.is_ok()));
        if let Err(error) = outcome {
            properties.insert(keys::ERROR.into(), Value::from(error));
        }

        self.publish(self.sent_topic.clone(), properties);
    }

    fn publish(&self, topic: String, properties: EventProperties) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.publish(MailEvent { topic, properties }) {
            debug!("Dropping event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail() -> Mail {
        Mail::builder()
            .from("alice@example.com")
            .to("bob@example.com")
            .subject_opt(None)
            .id("INBOX/1000")
            .build()
    }

    #[test]
    fn test_received_event() {
        let (sink, mut rx) = ChannelSink::new();
        let publisher = EventPublisher::new(Arc::new(sink));

        publisher.mail_received(&mail(), "INBOX");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.topic, "mailbus/mail/INBOX");
        assert_eq!(event.str_property(keys::FROM), Some("alice@example.com"));
        assert_eq!(event.str_property(keys::SUBJECT), Some(""));
        assert_eq!(event.str_property(keys::MESSAGE_ID), Some("INBOX/1000"));
        assert_eq!(
            event.properties[keys::TO],
            Value::from(vec!["bob@example.com"])
        );
    }

    #[test]
    fn test_sent_event_error_only_on_failure() {
        let (sink, mut rx) = ChannelSink::new();
        let publisher = EventPublisher::new(Arc::new(sink)).with_topics("in", "out");

        publisher.mail_sent("me@example.com", &mail(), Ok(()));
        publisher.mail_sent("me@example.com", &mail(), Err("refused".into()));

        let ok = rx.try_recv().unwrap();
        assert_eq!(ok.topic, "out");
        assert_eq!(ok.properties[keys::STATUS], Value::Bool(true));
        assert!(!ok.properties.contains_key(keys::ERROR));
        assert_eq!(ok.str_property(keys::BODY), Some(""));

        let failed = rx.try_recv().unwrap();
        assert_eq!(failed.properties[keys::STATUS], Value::Bool(false));
        assert_eq!(failed.str_property(keys::ERROR), Some("refused"));
    }

    #[test]
    fn test_closed_sink_is_swallowed() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let publisher = EventPublisher::new(Arc::new(sink));
        publisher.mail_received(&mail(), "INBOX");
    }

    #[test]
    fn test_disabled_publisher() {
        let publisher = EventPublisher::disabled();
        assert!(!publisher.is_enabled());
        publisher.mail_received(&mail(), "INBOX");
    }
}
