//! mailbus - run mail receivers and send mail from the command line
//!
//! ```text
//! mailbus <config.json>                               watch every configured receiver
//! mailbus <config.json> send <to> <subject> [body]    send one mail
//! ```

mod config;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mailbus_core::{ChannelSink, EventPublisher, MailReceiver, TracingSink};
use mailbus_imap::imap_receiver;
use mailbus_pop3::pop3_receiver;
use mailbus_smtp::SmtpMailSender;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{AppConfig, Protocol};

const USAGE: &str = "usage: mailbus <config.json> [send <to>[,<to>...] <subject> [body]]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("mailbus=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(path) = args.first() else {
        bail!(USAGE);
    };
    let config = AppConfig::load(path)?;

    match args.get(1).map(String::as_str) {
        None => watch(config).await,
        Some("send") => send(config, &args[2..]).await,
        Some(other) => bail!("Unknown command '{}'\n{}", other, USAGE),
    }
}

/// Start every receiver and log published events until Ctrl-C
async fn watch(config: AppConfig) -> Result<()> {
    if config.receivers.is_empty() {
        bail!("No receiver configured");
    }

    let (sink, mut events) = ChannelSink::new();
    let publisher = EventPublisher::new(Arc::new(sink))
        .with_topics(config.receive_topic.clone(), config.sent_topic.clone());

    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let payload = serde_json::to_string(&event.properties).unwrap_or_default();
            info!(topic = %event.topic, "{}", payload);
        }
    });

    let mut receivers: Vec<MailReceiver> = Vec::with_capacity(config.receivers.len());
    for entry in config.receivers {
        let label = format!("{:?} {}@{}", entry.protocol, entry.config.username, entry.config.host);
        let receiver = match entry.protocol {
            Protocol::Imap => imap_receiver(entry.config, publisher.clone()),
            Protocol::Pop3 => pop3_receiver(entry.config, publisher.clone()),
        }
        .with_context(|| format!("Invalid receiver {}", label))?;

        if let Err(e) = receiver.start().await {
            stop_all(&receivers).await;
            return Err(e).with_context(|| format!("Failed to start receiver {}", label));
        }
        info!("Watching {} ({} messages)", label, receiver.all_messages()?.len());
        receivers.push(receiver);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    stop_all(&receivers).await;
    drop(receivers);
    drop(publisher);
    logger.abort();
    Ok(())
}

async fn stop_all(receivers: &[MailReceiver]) {
    for receiver in receivers {
        if let Err(e) = receiver.stop().await {
            warn!("Failed to stop receiver on {}: {}", receiver.folder(), e);
        }
    }
}

/// Send one plain text mail through the configured sender
async fn send(config: AppConfig, args: &[String]) -> Result<()> {
    let (Some(to), Some(subject)) = (args.first(), args.get(1)) else {
        bail!(USAGE);
    };
    let body = args.get(2).map(String::as_str).unwrap_or_default();
    let Some(sender_config) = config.sender else {
        bail!("No sender configured");
    };

    let to: Vec<String> = to
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    let publisher = EventPublisher::new(Arc::new(TracingSink))
        .with_topics(config.receive_topic, config.sent_topic);
    let sender = SmtpMailSender::new(sender_config, publisher)?;

    match sender.send(&to, &[], subject, body).await {
        Ok(mail) => {
            info!(
                "Sent '{}' to {}",
                mail.subject().unwrap_or_default(),
                mail.to().join(", ")
            );
            Ok(())
        }
        Err(e) => {
            error!("Send failed: {}", e);
            Err(e.into())
        }
    }
}
