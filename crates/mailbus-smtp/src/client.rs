//! SMTP sender implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailbus_core::{EventPublisher, Mail, MailBuilder};
use tracing::{debug, error, info};

use crate::config::{ConnectionMode, SenderConfig};
use crate::{SmtpError, SmtpResult};

/// Hands a built message to a mail server
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, message: Message) -> SmtpResult<()>;
}

/// Delivery through lettre's async SMTP transport
pub struct SmtpDelivery {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpDelivery {
    /// Build the transport for the configured connection mode; nothing is
    /// opened until the first delivery
    pub fn new(config: &SenderConfig) -> SmtpResult<Self> {
        let transport = match config.connection {
            ConnectionMode::NoAuth => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                    .port(config.port())
                    .build()
            }
            ConnectionMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| SmtpError::ConnectionFailed(e.to_string()))?
                .port(config.port())
                .credentials(credentials(config))
                .build(),
            ConnectionMode::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| SmtpError::ConnectionFailed(e.to_string()))?
                .port(config.port())
                .credentials(credentials(config))
                .build(),
        };
        Ok(Self { transport })
    }
}

fn credentials(config: &SenderConfig) -> Credentials {
    Credentials::new(
        config.username().to_string(),
        config.password.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl Delivery for SmtpDelivery {
    async fn deliver(&self, message: Message) -> SmtpResult<()> {
        self.transport
            .send(message)
            .await
            .map_err(|e| SmtpError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Sends mail and publishes one delivery event per attempt
///
/// Input problems (no recipient, bad address, missing attachment) are
/// reported before anything is delivered and publish nothing.
pub struct SmtpMailSender {
    config: SenderConfig,
    delivery: Arc<dyn Delivery>,
    publisher: EventPublisher,
}

impl SmtpMailSender {
    /// Create a sender delivering over SMTP
    pub fn new(config: SenderConfig, publisher: EventPublisher) -> SmtpResult<Self> {
        config.validate()?;
        let delivery = Arc::new(SmtpDelivery::new(&config)?);
        info!(
            "SMTP sender for {} via {}:{} ({:?})",
            config.from,
            config.host,
            config.port(),
            config.connection
        );
        Ok(Self {
            config,
            delivery,
            publisher,
        })
    }

    /// Create a sender with a custom delivery
    pub fn with_delivery(
        config: SenderConfig,
        delivery: Arc<dyn Delivery>,
        publisher: EventPublisher,
    ) -> SmtpResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            delivery,
            publisher,
        })
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Send a plain text mail
    pub async fn send(
        &self,
        to: &[String],
        cc: &[String],
        subject: &str,
        body: &str,
    ) -> SmtpResult<Mail> {
        let mail = MailBuilder::new()
            .to_all(to.iter().cloned())
            .cc_all(cc.iter().cloned())
            .subject(subject)
            .body(body)
            .build();
        self.send_mail(&mail).await
    }

    /// Send a plain text mail with files attached
    pub async fn send_with_attachments(
        &self,
        to: &[String],
        cc: &[String],
        subject: &str,
        body: &str,
        attachments: &[PathBuf],
    ) -> SmtpResult<Mail> {
        let mail = MailBuilder::new()
            .to_all(to.iter().cloned())
            .cc_all(cc.iter().cloned())
            .subject(subject)
            .body(body)
            .attach_all(attachments)?
            .build();
        self.send_mail(&mail).await
    }

    /// Send a mail. Returns it stamped with the sender and the sent time.
    pub async fn send_mail(&self, mail: &Mail) -> SmtpResult<Mail> {
        if mail.to().is_empty() {
            return Err(SmtpError::NoRecipients);
        }

        let sent = mail
            .to_builder()
            .from(self.config.from.clone())
            .sent(Utc::now())
            .build();
        let message = build_message(&self.config.from, &sent).await?;

        if self.config.debug {
            debug!(
                "Outgoing message:\n{}",
                String::from_utf8_lossy(&message.formatted())
            );
        }

        info!("Sending mail to {} recipients", sent.to().len() + sent.cc().len());
        match self.delivery.deliver(message).await {
            Ok(()) => {
                info!("Mail sent successfully");
                self.publisher.mail_sent(&self.config.from, &sent, Ok(()));
                Ok(sent)
            }
            Err(e) => {
                error!("Mail delivery failed: {}", e);
                self.publisher
                    .mail_sent(&self.config.from, &sent, Err(e.to_string()));
                Err(e)
            }
        }
    }
}

fn parse_mailbox(address: &str) -> SmtpResult<Mailbox> {
    address
        .parse()
        .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", address, e)))
}

/// Build the outgoing message: a multipart/mixed body whose first part is
/// the text, followed by one part per attached file
pub async fn build_message(from: &str, mail: &Mail) -> SmtpResult<Message> {
    let mut builder = Message::builder()
        .from(parse_mailbox(from)?)
        .subject(mail.subject().unwrap_or_default());

    if let Some(sent) = mail.sent() {
        builder = builder.date(system_time(sent));
    }
    for to in mail.to() {
        builder = builder.to(parse_mailbox(to)?);
    }
    for cc in mail.cc() {
        builder = builder.cc(parse_mailbox(cc)?);
    }
    for reply_to in mail.reply_to() {
        builder = builder.reply_to(parse_mailbox(reply_to)?);
    }

    let mut mixed = MultiPart::mixed().singlepart(
        SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body().to_string()),
    );

    let octet_stream = ContentType::parse("application/octet-stream")
        .map_err(|e| SmtpError::MessageBuildError(e.to_string()))?;
    for path in mail.attachments() {
        let data = read_attachment(path).await?;
        let attachment = Attachment::new(file_name(path)).body(data, octet_stream.clone());
        mixed = mixed.singlepart(attachment);
    }

    builder
        .multipart(mixed)
        .map_err(|e| SmtpError::MessageBuildError(e.to_string()))
}

async fn read_attachment(path: &Path) -> SmtpResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SmtpError::AttachmentNotFound(path.to_path_buf())
        } else {
            SmtpError::AttachmentUnreadable(path.to_path_buf(), e.to_string())
        }
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string())
}

fn system_time(sent: DateTime<Utc>) -> std::time::SystemTime {
    sent.into()
}
