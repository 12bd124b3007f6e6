//! POP3 transport implementation

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_std::net::TcpStream;
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use futures::lock::Mutex;
use mailbus_core::rfc822::{parse_message, ParsedMessage};
use mailbus_core::{
    FolderAccess, MailTransport, MessageFlags, MessageHandle, RawContent, RawEnvelope,
    ReceiverConfig, TransportResult,
};
use tracing::{debug, info, warn};

use crate::protocol::Pop3Session;
use crate::{Pop3Error, Pop3Result};

/// Default port for plain POP3
pub const POP3_PORT: u16 = 110;

/// Default port for POP3 over implicit TLS
pub const POP3S_PORT: u16 = 995;

/// The only folder a POP3 maildrop has
pub const INBOX: &str = "INBOX";

/// Byte stream a POP3 session runs over, plain TCP or TLS
pub trait Pop3Io: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T> Pop3Io for T where T: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

type Pop3Stream = Box<dyn Pop3Io>;

#[derive(Default)]
struct State {
    session: Option<Pop3Session<Pop3Stream>>,
    /// The session has not been listed yet
    fresh: bool,
    /// Message number of each key in the current session
    numbers: HashMap<String, u32>,
    /// Parsed messages by key, kept across sessions
    messages: HashMap<String, Arc<ParsedMessage>>,
}

/// POP3 implementation of [`MailTransport`]
///
/// POP3 has no change notifications, and a session sees the maildrop as it
/// was at login, so every listing after the first one opens a new session.
/// Messages are keyed by their UIDL, or by `#<number>` when the server does
/// not support UIDL.
pub struct Pop3Transport {
    config: ReceiverConfig,
    state: Mutex<State>,
}

impl Pop3Transport {
    /// Create a transport; nothing is opened until `connect`
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    fn port(&self) -> u16 {
        self.config
            .port_or(if self.config.use_tls { POP3S_PORT } else { POP3_PORT })
    }

    async fn login(&self) -> Pop3Result<Pop3Session<Pop3Stream>> {
        let port = self.port();
        info!("Connecting to {}:{}", self.config.host, port);

        let stream = open_stream(&self.config.host, port, self.config.use_tls).await?;
        let mut session = Pop3Session::open(stream, self.config.debug).await?;

        info!("Authenticating with USER/PASS for {}", self.config.username);
        session
            .login(&self.config.username, &self.config.password)
            .await?;
        Ok(session)
    }

    async fn open(&self) -> Pop3Result<FolderAccess> {
        if !self.config.folder.eq_ignore_ascii_case(INBOX) {
            return Err(Pop3Error::FolderNotFound(self.config.folder.clone()));
        }

        let session = self.login().await?;
        let mut state = self.state.lock().await;
        if let Some(mut old) = state.session.replace(session) {
            quit_quietly(&mut old).await;
        }
        state.fresh = true;
        Ok(FolderAccess::ReadWrite)
    }

    async fn listing(&self) -> Pop3Result<Vec<MessageHandle>> {
        let mut state = self.state.lock().await;
        if state.session.is_none() {
            return Err(Pop3Error::NotConnected);
        }

        if !state.fresh {
            if let Some(mut old) = state.session.take() {
                quit_quietly(&mut old).await;
            }
            state.session = Some(self.login().await?);
        }
        state.fresh = false;

        let session = state.session.as_mut().ok_or(Pop3Error::NotConnected)?;
        let keys = match session.uidl().await {
            Ok(entries) => entries,
            Err(Pop3Error::ServerError(e)) => {
                debug!("UIDL not supported ({}), keying by message number", e);
                session
                    .list()
                    .await?
                    .into_iter()
                    .map(|number| (number, format!("#{}", number)))
                    .collect()
            }
            Err(e) => return Err(e),
        };

        state.numbers = keys
            .iter()
            .map(|(number, key)| (key.clone(), *number))
            .collect();
        let State {
            numbers, messages, ..
        } = &mut *state;
        messages.retain(|key, _| numbers.contains_key(key));

        debug!("Maildrop lists {} messages", keys.len());
        Ok(keys
            .into_iter()
            .map(|(_, key)| MessageHandle::new(Some(INBOX.to_string()), key))
            .collect())
    }

    async fn message(&self, handle: &MessageHandle) -> Pop3Result<Arc<ParsedMessage>> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.messages.get(handle.key()) {
            return Ok(Arc::clone(message));
        }

        let number = *state
            .numbers
            .get(handle.key())
            .ok_or_else(|| Pop3Error::MessageNotFound(handle.to_string()))?;
        let session = state.session.as_mut().ok_or(Pop3Error::NotConnected)?;
        let raw = session.retr(number).await?;

        let message =
            Arc::new(parse_message(&raw).map_err(|e| Pop3Error::ParseError(e.to_string()))?);
        state
            .messages
            .insert(handle.key().to_string(), Arc::clone(&message));
        Ok(message)
    }

    async fn count(&self) -> Pop3Result<usize> {
        let mut state = self.state.lock().await;
        let session = state.session.as_mut().ok_or(Pop3Error::NotConnected)?;
        let (count, _size) = session.stat().await?;
        Ok(count)
    }

    async fn shutdown(&self) -> Pop3Result<()> {
        let mut state = self.state.lock().await;
        state.numbers.clear();
        if let Some(mut session) = state.session.take() {
            session.quit().await?;
            info!("Logged out from {}", self.config.host);
        }
        Ok(())
    }
}

#[async_trait]
impl MailTransport for Pop3Transport {
    fn folder_name(&self) -> String {
        INBOX.to_string()
    }

    async fn connect(&self) -> TransportResult<FolderAccess> {
        Ok(self.open().await?)
    }

    async fn close(&self) -> TransportResult<()> {
        Ok(self.shutdown().await?)
    }

    async fn list_messages(&self) -> TransportResult<Vec<MessageHandle>> {
        Ok(self.listing().await?)
    }

    async fn envelope(&self, handle: &MessageHandle) -> TransportResult<Option<RawEnvelope>> {
        Ok(Some(self.message(handle).await?.envelope.clone()))
    }

    async fn content_type(&self, handle: &MessageHandle) -> TransportResult<Option<String>> {
        Ok(self.message(handle).await?.content_type.clone())
    }

    async fn content(&self, handle: &MessageHandle) -> TransportResult<RawContent> {
        Ok(self.message(handle).await?.content.clone())
    }

    /// POP3 keeps no flags; every message reads as unseen and not recent
    async fn flags(&self, _handle: &MessageHandle) -> TransportResult<MessageFlags> {
        Ok(MessageFlags::default())
    }

    async fn message_count(&self) -> TransportResult<usize> {
        Ok(self.count().await?)
    }
}

async fn quit_quietly(session: &mut Pop3Session<Pop3Stream>) {
    if let Err(e) = session.quit().await {
        warn!("QUIT failed: {}", e);
    }
}

async fn open_stream(host: &str, port: u16, use_tls: bool) -> Pop3Result<Pop3Stream> {
    let tcp_stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Pop3Error::ConnectionFailed(e.to_string()))?;

    if !use_tls {
        return Ok(Box::new(tcp_stream));
    }

    let tls_connector = async_native_tls::TlsConnector::new();
    let tls_stream = tls_connector
        .connect(host, tcp_stream)
        .await
        .map_err(|e| Pop3Error::TlsError(e.to_string()))?;

    debug!("TLS connection established");
    Ok(Box::new(tls_stream))
}
