//! Runner configuration file

use std::path::Path;

use anyhow::{bail, Context, Result};
use mailbus_core::events::{DEFAULT_RECEIVE_TOPIC, DEFAULT_SENT_TOPIC};
use mailbus_core::ReceiverConfig;
use mailbus_smtp::SenderConfig;
use serde::Deserialize;

/// Mail access protocol of a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Imap,
    Pop3,
}

/// One receiver entry
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverEntry {
    pub protocol: Protocol,
    #[serde(flatten)]
    pub config: ReceiverConfig,
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub receivers: Vec<ReceiverEntry>,
    #[serde(default)]
    pub sender: Option<SenderConfig>,
    /// Base topic of new-mail events
    #[serde(default = "default_receive_topic")]
    pub receive_topic: String,
    /// Topic of delivery events
    #[serde(default = "default_sent_topic")]
    pub sent_topic: String,
}

fn default_receive_topic() -> String {
    DEFAULT_RECEIVE_TOPIC.to_string()
}

fn default_sent_topic() -> String {
    DEFAULT_SENT_TOPIC.to_string()
}

impl AppConfig {
    /// Read and check a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.receivers.is_empty() && self.sender.is_none() {
            bail!("Configuration declares neither receivers nor a sender");
        }
        for (i, entry) in self.receivers.iter().enumerate() {
            entry
                .config
                .validate()
                .with_context(|| format!("Receiver #{} ({:?})", i + 1, entry.protocol))?;
        }
        if let Some(sender) = &self.sender {
            sender.validate().context("Sender")?;
        }
        Ok(())
    }
}
