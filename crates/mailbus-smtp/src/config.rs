//! Sender configuration

use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};

use crate::{SmtpError, SmtpResult};

/// How the sender talks to the SMTP server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// Plain connection, no credentials
    #[default]
    #[serde(rename = "NO_AUTH")]
    NoAuth,
    /// STARTTLS upgrade, then authenticate
    #[serde(rename = "TLS")]
    Tls,
    /// Implicit TLS, then authenticate
    #[serde(rename = "SSL")]
    Ssl,
}

impl ConnectionMode {
    /// Conventional port of the mode
    pub fn default_port(self) -> u16 {
        match self {
            ConnectionMode::NoAuth => 25,
            ConnectionMode::Tls => 587,
            ConnectionMode::Ssl => 465,
        }
    }

    pub fn requires_credentials(self) -> bool {
        !matches!(self, ConnectionMode::NoAuth)
    }
}

/// SMTP sender configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// SMTP server hostname
    pub host: String,
    /// Server port; the mode's conventional port is used when unset
    #[serde(default)]
    pub port: Option<u16>,
    /// Sender address, used as From of every mail
    pub from: String,
    /// Login name; defaults to the sender address
    #[serde(default)]
    pub username: Option<String>,
    /// Login password, required by TLS and SSL
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub connection: ConnectionMode,
    /// Wait for the server's answer to QUIT. Accepted for compatibility;
    /// the transport always reads the reply.
    #[serde(default = "default_quit_wait")]
    pub quit_wait: bool,
    /// Log every outgoing message at debug level
    #[serde(default)]
    pub debug: bool,
}

fn default_quit_wait() -> bool {
    true
}

impl std::fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from", &self.from)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connection", &self.connection)
            .field("quit_wait", &self.quit_wait)
            .field("debug", &self.debug)
            .finish()
    }
}

impl SenderConfig {
    /// Configuration for an unauthenticated relay
    pub fn new(host: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            from: from.into(),
            username: None,
            password: None,
            connection: ConnectionMode::NoAuth,
            quit_wait: default_quit_wait(),
            debug: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Authenticate with the given credentials over `connection`
    pub fn with_credentials(
        mut self,
        connection: ConnectionMode,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.connection = connection;
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.connection.default_port())
    }

    /// Login name, falling back to the sender address
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.from)
    }

    /// Check mandatory fields
    pub fn validate(&self) -> SmtpResult<()> {
        if self.host.trim().is_empty() {
            return Err(SmtpError::Configuration("host is mandatory".into()));
        }
        if self.from.trim().is_empty() {
            return Err(SmtpError::Configuration("from is mandatory".into()));
        }
        self.from
            .parse::<Mailbox>()
            .map_err(|e| SmtpError::InvalidAddress(format!("{}: {}", self.from, e)))?;
        if self.connection.requires_credentials()
            && self.password.as_deref().map_or(true, str::is_empty)
        {
            return Err(SmtpError::Configuration(format!(
                "password is mandatory for {:?} connections",
                self.connection
            )));
        }
        Ok(())
    }
}
