//! IMAP transport implementation

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use async_imap::types::UnsolicitedResponse;
use async_imap::Session;
use async_std::net::TcpStream;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::lock::Mutex;
use futures::TryStreamExt;
use mailbus_core::rfc822::{parse_message, ParsedMessage};
use mailbus_core::{
    FolderAccess, MailTransport, MailboxChange, MailboxChanges, MessageFlags, MessageHandle,
    RawContent, RawEnvelope, ReceiverConfig, TransportResult,
};
use tracing::{debug, info, warn};

use crate::folder::{resolve_folder, Folder};
use crate::message::message_flags;
use crate::{ImapError, ImapResult};

/// Default port for plain IMAP
pub const IMAP_PORT: u16 = 143;

/// Default port for IMAP over implicit TLS
pub const IMAPS_PORT: u16 = 993;

/// Byte stream an IMAP session runs over, plain TCP or TLS
pub trait ImapIo: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T> ImapIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

type ImapStream = Box<dyn ImapIo>;

/// Open connection with the selected folder
struct Connection {
    session: Session<ImapStream>,
    /// UIDs in sequence order
    uids: Vec<u32>,
    /// Parsed messages by UID
    messages: HashMap<u32, Arc<ParsedMessage>>,
}

/// IMAP implementation of [`MailTransport`]
///
/// New mail is noticed through the NOOP issued by [`MailTransport::message_count`]:
/// the server's untagged EXISTS/EXPUNGE responses make the transport
/// re-read the folder's UIDs and push the difference on its change stream.
pub struct ImapTransport {
    config: ReceiverConfig,
    /// Name of the resolved folder, last component of its path
    folder: StdMutex<Option<String>>,
    connection: Mutex<Option<Connection>>,
    changes_tx: mpsc::UnboundedSender<MailboxChange>,
    changes_rx: StdMutex<Option<MailboxChanges>>,
}

impl ImapTransport {
    /// Create a transport; nothing is opened until `connect`
    pub fn new(config: ReceiverConfig) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded();
        Self {
            config,
            folder: StdMutex::new(None),
            connection: Mutex::new(None),
            changes_tx,
            changes_rx: StdMutex::new(Some(changes_rx)),
        }
    }

    fn port(&self) -> u16 {
        self.config
            .port_or(if self.config.use_tls { IMAPS_PORT } else { IMAP_PORT })
    }

    async fn open(&self) -> ImapResult<FolderAccess> {
        let port = self.port();
        info!("Connecting to {}:{}", self.config.host, port);

        let stream = open_stream(&self.config.host, port, self.config.use_tls).await?;
        let client = async_imap::Client::new(stream);

        info!("Authenticating with LOGIN for {}", self.config.username);
        let mut session = client
            .login(&self.config.username, &self.config.password)
            .await
            .map_err(|(e, _)| ImapError::AuthenticationFailed(e.to_string()))?;

        let folders = list_folders(&mut session).await?;
        let Some(folder) = resolve_folder(&folders, &self.config.folder) else {
            if let Err(e) = session.logout().await {
                debug!("Logout failed: {}", e);
            }
            return Err(ImapError::FolderNotFound(self.config.folder.clone()));
        };
        let path = folder.full_path.clone();

        self.trace(format_args!("SELECT {}", path));
        let access = match session.select(&path).await {
            Ok(mailbox) => {
                debug!("Selected folder {} with {} messages", path, mailbox.exists);
                FolderAccess::ReadWrite
            }
            Err(e) => {
                warn!("Cannot open {} read-write ({}), opening read-only", path, e);
                self.trace(format_args!("EXAMINE {}", path));
                let mailbox = session
                    .examine(&path)
                    .await
                    .map_err(|e| ImapError::ServerError(format!("{}: {}", path, e)))?;
                debug!("Examined folder {} with {} messages", path, mailbox.exists);
                FolderAccess::ReadOnly
            }
        };

        let uids = search_uids(&mut session).await?;
        info!("Opened {} with {} messages", path, uids.len());

        self.remember_folder(folder);
        *self.connection.lock().await = Some(Connection {
            session,
            uids,
            messages: HashMap::new(),
        });
        Ok(access)
    }

    /// Ids and topics use the folder name; SELECT uses the full path
    fn remember_folder(&self, folder: &Folder) {
        *lock(&self.folder) = Some(folder.name().to_string());
    }

    /// Re-read the folder's UIDs and push what changed
    async fn reconcile(&self, conn: &mut Connection) -> ImapResult<()> {
        let current = search_uids(&mut conn.session).await?;
        let (removed, added) = diff_uids(&conn.uids, &current);

        conn.uids = current;
        for uid in &removed {
            conn.messages.remove(uid);
        }
        self.push_diff(&removed, &added);
        Ok(())
    }

    /// Push removals first, then arrivals
    fn push_diff(&self, removed: &[u32], added: &[u32]) {
        if !removed.is_empty() {
            debug!("{} messages expunged", removed.len());
            self.push(MailboxChange::Removed(self.handles(removed)));
        }
        if !added.is_empty() {
            debug!("{} messages arrived", added.len());
            self.push(MailboxChange::Added(self.handles(added)));
        }
    }

    fn push(&self, change: MailboxChange) {
        if self.changes_tx.unbounded_send(change).is_err() {
            debug!("Nobody listens to mailbox changes");
        }
    }

    fn handles(&self, uids: &[u32]) -> Vec<MessageHandle> {
        let folder = self.folder_name();
        uids.iter()
            .map(|uid| MessageHandle::new(Some(folder.clone()), uid.to_string()))
            .collect()
    }

    async fn message(&self, handle: &MessageHandle) -> ImapResult<Arc<ParsedMessage>> {
        let uid = parse_uid(handle)?;
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or(ImapError::NotConnected)?;

        if let Some(message) = conn.messages.get(&uid) {
            return Ok(Arc::clone(message));
        }

        self.trace(format_args!("UID FETCH {} BODY.PEEK[]", uid));
        let mut body = None;
        {
            let mut stream = conn
                .session
                .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                .await
                .map_err(|e| ImapError::ServerError(e.to_string()))?;
            while let Some(fetch) = stream
                .try_next()
                .await
                .map_err(|e| ImapError::ServerError(e.to_string()))?
            {
                if body.is_none() {
                    body = fetch.body().map(<[u8]>::to_vec);
                }
            }
        }
        let body = body.ok_or(ImapError::MessageNotFound(uid))?;

        let message = Arc::new(
            parse_message(&body).map_err(|e| ImapError::ParseError(e.to_string()))?,
        );
        conn.messages.insert(uid, Arc::clone(&message));
        Ok(message)
    }

    async fn fetch_flags(&self, handle: &MessageHandle) -> ImapResult<MessageFlags> {
        let uid = parse_uid(handle)?;
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or(ImapError::NotConnected)?;

        self.trace(format_args!("UID FETCH {} FLAGS", uid));
        let mut flags = None;
        let mut stream = conn
            .session
            .uid_fetch(uid.to_string(), "FLAGS")
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?;
        while let Some(fetch) = stream
            .try_next()
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?
        {
            if flags.is_none() && fetch.uid.map_or(true, |u| u == uid) {
                flags = Some(message_flags(fetch.flags()));
            }
        }
        flags.ok_or(ImapError::MessageNotFound(uid))
    }

    async fn probe(&self) -> ImapResult<usize> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or(ImapError::NotConnected)?;

        self.trace(format_args!("NOOP"));
        conn.session
            .noop()
            .await
            .map_err(|e| ImapError::ServerError(e.to_string()))?;

        let mut changed = false;
        while let Ok(response) = conn.session.unsolicited_responses.try_recv() {
            self.trace(format_args!("* {:?}", response));
            if matches!(
                response,
                UnsolicitedResponse::Exists(_) | UnsolicitedResponse::Expunge(_)
            ) {
                changed = true;
            }
        }
        if changed {
            self.reconcile(conn).await?;
        }
        Ok(conn.uids.len())
    }

    async fn shutdown(&self) -> ImapResult<()> {
        self.changes_tx.close_channel();
        let connection = self.connection.lock().await.take();
        if let Some(mut conn) = connection {
            self.trace(format_args!("LOGOUT"));
            conn.session
                .logout()
                .await
                .map_err(|e| ImapError::ServerError(e.to_string()))?;
            info!("Logged out from {}", self.config.host);
        }
        Ok(())
    }

    fn trace(&self, command: std::fmt::Arguments<'_>) {
        if self.config.debug {
            debug!("IMAP {}: {}", self.config.host, command);
        }
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    fn folder_name(&self) -> String {
        lock(&self.folder)
            .clone()
            .unwrap_or_else(|| self.config.folder.clone())
    }

    async fn connect(&self) -> TransportResult<FolderAccess> {
        Ok(self.open().await?)
    }

    async fn close(&self) -> TransportResult<()> {
        Ok(self.shutdown().await?)
    }

    async fn list_messages(&self) -> TransportResult<Vec<MessageHandle>> {
        let mut guard = self.connection.lock().await;
        let conn = guard.as_mut().ok_or(ImapError::NotConnected)?;
        self.reconcile(conn).await?;
        Ok(self.handles(&conn.uids))
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

    async fn flags(&self, handle: &MessageHandle) -> TransportResult<MessageFlags> {
        Ok(self.fetch_flags(handle).await?)
    }

    async fn message_count(&self) -> TransportResult<usize> {
        Ok(self.probe().await?)
    }

    fn subscribe(&self) -> Option<MailboxChanges> {
        lock(&self.changes_rx).take()
    }
}

async fn open_stream(host: &str, port: u16, use_tls: bool) -> ImapResult<ImapStream> {
    let tcp_stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ImapError::ConnectionFailed(e.to_string()))?;

    if !use_tls {
        return Ok(Box::new(tcp_stream));
    }

    let tls_connector = async_native_tls::TlsConnector::new();
    let tls_stream = tls_connector
        .connect(host, tcp_stream)
        .await
        .map_err(|e| ImapError::TlsError(e.to_string()))?;

    debug!("TLS connection established");
    Ok(Box::new(tls_stream))
}

async fn list_folders(session: &mut Session<ImapStream>) -> ImapResult<Vec<Folder>> {
    let mut stream = session
        .list(None, Some("*"))
        .await
        .map_err(|e| ImapError::ServerError(e.to_string()))?;

    let mut folders = Vec::new();
    while let Some(mailbox) = stream
        .try_next()
        .await
        .map_err(|e| ImapError::ServerError(e.to_string()))?
    {
        let attributes: Vec<String> = mailbox
            .attributes()
            .iter()
            .map(|a| format!("{:?}", a))
            .collect();

        folders.push(Folder::new(
            mailbox.name().to_string(),
            mailbox.delimiter().and_then(|d| d.chars().next()),
            attributes,
        ));
    }

    debug!("Found {} folders", folders.len());
    Ok(folders)
}

async fn search_uids(session: &mut Session<ImapStream>) -> ImapResult<Vec<u32>> {
    let mut uids: Vec<u32> = session
        .uid_search("ALL")
        .await
        .map_err(|e| ImapError::ServerError(e.to_string()))?
        .into_iter()
        .collect();
    uids.sort_unstable();
    Ok(uids)
}

/// UIDs that disappeared and UIDs that appeared, each in listing order
fn diff_uids(before: &[u32], current: &[u32]) -> (Vec<u32>, Vec<u32>) {
    let known: HashSet<u32> = before.iter().copied().collect();
    let still_there: HashSet<u32> = current.iter().copied().collect();
    let removed = before
        .iter()
        .copied()
        .filter(|uid| !still_there.contains(uid))
        .collect();
    let added = current
        .iter()
        .copied()
        .filter(|uid| !known.contains(uid))
        .collect();
    (removed, added)
}

fn parse_uid(handle: &MessageHandle) -> ImapResult<u32> {
    handle
        .key()
        .parse()
        .map_err(|_| ImapError::InvalidHandle(handle.to_string()))
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
