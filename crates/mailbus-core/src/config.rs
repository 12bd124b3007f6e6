//! Receiver configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

/// Folder watched when none is configured
pub const DEFAULT_FOLDER: &str = "inbox";

/// Polling interval used when none is configured
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 60_000;

/// Mailbox receiver configuration, shared by the IMAP and POP3 receivers
#[derive(Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Mail server hostname
    pub host: String,
    /// Server port; the protocol default is used when unset
    #[serde(default)]
    pub port: Option<u16>,
    /// Login name
    pub username: String,
    /// Login password
    pub password: String,
    /// Connect over implicit TLS
    #[serde(default)]
    pub use_tls: bool,
    /// Folder to watch
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Delay between two polling cycles, in milliseconds
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Log protocol traffic at debug level
    #[serde(default)]
    pub debug: bool,
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}

fn default_polling_interval_ms() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

impl std::fmt::Debug for ReceiverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_tls", &self.use_tls)
            .field("folder", &self.folder)
            .field("polling_interval_ms", &self.polling_interval_ms)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ReceiverConfig {
    /// Create a configuration with default port, folder and polling interval
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: username.into(),
            password: password.into(),
            use_tls: false,
            folder: default_folder(),
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            debug: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn with_polling_interval_ms(mut self, millis: u64) -> Self {
        self.polling_interval_ms = millis;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Check mandatory fields
    pub fn validate(&self) -> CoreResult<()> {
        if self.host.trim().is_empty() {
            return Err(CoreError::Configuration("host is mandatory".into()));
        }
        if self.username.is_empty() {
            return Err(CoreError::Configuration("username is mandatory".into()));
        }
        if self.password.is_empty() {
            return Err(CoreError::Configuration("password is mandatory".into()));
        }
        if self.folder.trim().is_empty() {
            return Err(CoreError::Configuration("folder cannot be empty".into()));
        }
        if self.polling_interval_ms == 0 {
            return Err(CoreError::Configuration(
                "polling interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Configured port, or `default` when unset
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}
