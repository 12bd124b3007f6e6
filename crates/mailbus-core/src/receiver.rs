//! Mailbox receiver
//!
//! A [`MailReceiver`] keeps an in-memory copy of one mailbox folder. It
//! connects through a [`MailTransport`], fetches the folder once, then keeps
//! the cache current from a background polling loop and, for push-capable
//! transports, from the server's change notifications. Every mail entering
//! the cache is announced once through the [`EventPublisher`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::{by_sent_descending, MailCache};
use crate::config::ReceiverConfig;
use crate::convert::create_mail;
use crate::events::EventPublisher;
use crate::mail::Mail;
use crate::transport::{
    FolderAccess, MailTransport, MailboxChange, MailboxChanges, MessageHandle,
};
use crate::{CoreError, CoreResult};

/// Lifecycle of a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Built, not started yet
    Created,
    /// Opening the connection and the folder
    Connecting,
    /// Folder open, initial fetch running
    Open,
    /// Background loop running
    Polling,
    /// Applying a change pushed by the server
    HandlingPushEvent,
    /// Stopped, or failed to start
    Closed,
}

/// Receiver of one mailbox folder
pub struct MailReceiver {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    config: ReceiverConfig,
    transport: Arc<dyn MailTransport>,
    publisher: EventPublisher,
    cache: Mutex<MailCache>,
    /// Serializes fetch cycles and push handling
    producers: tokio::sync::Mutex<()>,
    running: AtomicBool,
    started: AtomicBool,
    fetched: AtomicBool,
    state: Mutex<ReceiverState>,
}

impl std::fmt::Debug for MailReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailReceiver")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl MailReceiver {
    /// Create a receiver; the configuration is validated here
    pub fn new(
        config: ReceiverConfig,
        transport: Arc<dyn MailTransport>,
        publisher: EventPublisher,
    ) -> CoreResult<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                publisher,
                cache: Mutex::new(MailCache::new()),
                producers: tokio::sync::Mutex::new(()),
                running: AtomicBool::new(false),
                started: AtomicBool::new(false),
                fetched: AtomicBool::new(false),
                state: Mutex::new(ReceiverState::Created),
            }),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ReceiverState {
        *lock(&self.inner.state)
    }

    /// Name of the watched folder
    pub fn folder(&self) -> String {
        self.inner.transport.folder_name()
    }

    /// Connect, fetch the folder once and start the background loop
    pub async fn start(&self) -> CoreResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::InvalidState(
                "receiver has already been started".into(),
            ));
        }

        info!(
            "Starting receiver for {}@{} ({})",
            self.inner.config.username, self.inner.config.host, self.inner.config.folder
        );
        self.inner.set_state(ReceiverState::Connecting);

        match self.inner.transport.connect().await {
            Ok(FolderAccess::ReadWrite) => debug!("Folder opened read-write"),
            Ok(FolderAccess::ReadOnly) => {
                warn!("Folder {} opened read-only", self.folder())
            }
            Err(e) => {
                self.inner.set_state(ReceiverState::Closed);
                return Err(CoreError::from_transport(e));
            }
        }
        self.inner.set_state(ReceiverState::Open);

        if let Err(e) = self.inner.fetch().await {
            error!("Initial fetch failed: {}", e);
            self.inner.set_state(ReceiverState::Closed);
            if let Err(close_err) = self.inner.transport.close().await {
                debug!("Close after failed start: {}", close_err);
            }
            return Err(e);
        }

        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.set_state(ReceiverState::Polling);

        let mut tasks = lock(&self.tasks);
        match self.inner.transport.subscribe() {
            Some(changes) => {
                debug!("Transport pushes changes, polling only probes the folder");
                tasks.push(spawn_poll_loop(Arc::clone(&self.inner), true));
                tasks.push(spawn_change_consumer(Arc::clone(&self.inner), changes));
            }
            None => tasks.push(spawn_poll_loop(Arc::clone(&self.inner), false)),
        }

        info!(
            "Receiver started with {} messages in {}",
            self.inner.cached_len(),
            self.folder()
        );
        Ok(())
    }

    /// Abort the background tasks and close the transport. The receiver is
    /// stopped even when closing fails.
    pub async fn stop(&self) -> CoreResult<()> {
        {
            let mut state = lock(&self.inner.state);
            self.inner.running.store(false, Ordering::SeqCst);
            *state = ReceiverState::Closed;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        info!("Stopping receiver for {}", self.folder());

        self.inner
            .transport
            .close()
            .await
            .map_err(CoreError::from_transport)
    }

    /// Fetch the folder now. Returns how many new mails entered the cache.
    pub async fn fetch(&self) -> CoreResult<usize> {
        self.inner.fetch().await
    }

    /// Every known mail, newest first
    pub fn all_messages(&self) -> CoreResult<Vec<Mail>> {
        self.inner.ensure_fetched()?;
        Ok(self.inner.cache().sorted())
    }

    /// Mails not read yet, newest first
    pub fn unread_messages(&self) -> CoreResult<Vec<Mail>> {
        self.inner.ensure_fetched()?;
        Ok(self.inner.cache().unread())
    }

    /// Mails sent strictly between `from` and `to`, newest first
    pub fn messages_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CoreResult<Vec<Mail>> {
        self.inner.ensure_fetched()?;
        Ok(self.inner.cache().between(from, to))
    }

    /// Mails whose transport-level recent flag is not set, newest first.
    /// Mails whose flags cannot be read are left out.
    pub async fn recent_messages(&self) -> CoreResult<Vec<Mail>> {
        self.inner.ensure_fetched()?;
        let snapshot = self.inner.cache().snapshot();

        let mut mails = Vec::new();
        for (handle, mail) in snapshot {
            match self.inner.transport.flags(&handle).await {
                Ok(flags) if !flags.recent => mails.push(mail),
                Ok(_) => {}
                Err(e) => debug!("Cannot read flags of {}: {}", handle, e),
            }
        }
        mails.sort_by(by_sent_descending);
        Ok(mails)
    }

    /// Mail with the given id
    pub fn message_by_id(&self, id: &str) -> CoreResult<Option<Mail>> {
        Ok(self
            .all_messages()?
            .into_iter()
            .find(|m| m.id() == Some(id)))
    }
}

impl Drop for MailReceiver {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl Inner {
    fn set_state(&self, state: ReceiverState) {
        *lock(&self.state) = state;
    }

    /// Switch state unless the receiver has been stopped
    fn set_running_state(&self, state: ReceiverState) {
        let mut current = lock(&self.state);
        if self.running.load(Ordering::SeqCst) {
            *current = state;
        }
    }

    fn cache(&self) -> MutexGuard<'_, MailCache> {
        lock(&self.cache)
    }

    fn cached_len(&self) -> usize {
        self.cache().len()
    }

    fn ensure_fetched(&self) -> CoreResult<()> {
        if self.fetched.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "mailbox has not been fetched",
            )))
        }
    }

    async fn fetch(&self) -> CoreResult<usize> {
        let _producer = self.producers.lock().await;

        let handles = self
            .transport
            .list_messages()
            .await
            .map_err(CoreError::from_transport)?;
        let inserted = self.insert_new(handles).await;
        self.fetched.store(true, Ordering::SeqCst);

        if inserted > 0 {
            info!("Fetched {} new messages from {}", inserted, self.transport.folder_name());
        }
        Ok(inserted)
    }

    /// Convert and cache the handles not known yet. Caller holds the
    /// producer lock.
    async fn insert_new(&self, handles: Vec<MessageHandle>) -> usize {
        let unknown: Vec<MessageHandle> = {
            let cache = self.cache();
            handles.into_iter().filter(|h| !cache.contains(h)).collect()
        };
        if unknown.is_empty() {
            return 0;
        }

        let folder = self.transport.folder_name();
        let mut inserted = 0;
        for handle in unknown {
            let mail = match create_mail(self.transport.as_ref(), &handle).await {
                Ok(mail) => mail,
                Err(e) => {
                    warn!("Skipping message {}: {}", handle, e);
                    continue;
                }
            };

            let is_new = self.cache().insert_if_absent(handle, mail.clone());
            if is_new {
                self.publisher.mail_received(&mail, &folder);
                inserted += 1;
            }
        }
        inserted
    }

    async fn handle_change(&self, change: MailboxChange) {
        let _producer = self.producers.lock().await;
        self.set_running_state(ReceiverState::HandlingPushEvent);

        match change {
            MailboxChange::Added(handles) => {
                let inserted = self.insert_new(handles).await;
                debug!("{} pushed messages added", inserted);
            }
            MailboxChange::Removed(handles) => {
                let mut cache = self.cache();
                for handle in &handles {
                    if cache.remove(handle).is_some() {
                        debug!("Message {} removed", handle);
                    }
                }
            }
        }

        self.set_running_state(ReceiverState::Polling);
    }
}

fn spawn_poll_loop(inner: Arc<Inner>, probe_only: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = inner.config.polling_interval();
        let mut tick = time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if !inner.running.load(Ordering::SeqCst) {
                debug!("Poll loop for {} exiting", inner.config.folder);
                return;
            }

            if probe_only {
                if let Err(e) = inner.transport.message_count().await {
                    warn!("Message count probe failed: {}", e);
                }
            } else if let Err(e) = inner.fetch().await {
                error!("Fetch failed: {}", e);
            }
        }
    })
}

fn spawn_change_consumer(inner: Arc<Inner>, mut changes: MailboxChanges) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            if !inner.running.load(Ordering::SeqCst) {
                break;
            }
            inner.handle_change(change).await;
        }
        debug!("Change stream for {} ended", inner.config.folder);
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{keys, ChannelSink, MailEvent};
    use crate::transport::{
        MessageFlags, RawContent, RawEnvelope, TransportError, TransportResult,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use futures::channel::mpsc;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Clone)]
    struct MockMessage {
        envelope: Option<RawEnvelope>,
        content_type: Option<String>,
        content: RawContent,
        flags: MessageFlags,
    }

    #[derive(Default)]
    struct MockTransport {
        listed: Mutex<Vec<MessageHandle>>,
        messages: Mutex<HashMap<MessageHandle, MockMessage>>,
        changes: Mutex<Option<MailboxChanges>>,
        access: Mutex<Option<FolderAccess>>,
        fail_connect: Mutex<Option<TransportError>>,
        fail_list: AtomicBool,
        fail_flags: AtomicBool,
        list_calls: AtomicUsize,
        probes: AtomicUsize,
        closes: AtomicUsize,
    }

    impl MockTransport {
        fn add(&self, key: &str, millis: i64, subject: Option<&str>) -> MessageHandle {
            self.add_with_flags(key, millis, subject, MessageFlags::default())
        }

        fn add_with_flags(
            &self,
            key: &str,
            millis: i64,
            subject: Option<&str>,
            flags: MessageFlags,
        ) -> MessageHandle {
            let handle = MessageHandle::new(Some("INBOX".into()), key);
            let message = MockMessage {
                envelope: Some(RawEnvelope {
                    from: vec!["alice@example.com".into()],
                    to: vec!["bob@example.com".into()],
                    subject: subject.map(str::to_string),
                    sent: Utc.timestamp_millis_opt(millis).single(),
                    ..Default::default()
                }),
                content_type: Some("text/plain; charset=utf-8".into()),
                content: RawContent::Text(format!("body {}", key)),
                flags,
            };
            self.register(handle.clone(), message);
            handle
        }

        fn register(&self, handle: MessageHandle, message: MockMessage) {
            lock(&self.messages).insert(handle.clone(), message);
            lock(&self.listed).push(handle);
        }

        fn with_push() -> (Self, mpsc::UnboundedSender<MailboxChange>) {
            let (tx, rx) = mpsc::unbounded();
            let transport = Self::default();
            *lock(&transport.changes) = Some(rx);
            (transport, tx)
        }

        fn message(&self, handle: &MessageHandle) -> TransportResult<MockMessage> {
            lock(&self.messages)
                .get(handle)
                .cloned()
                .ok_or_else(|| TransportError::MessageNotFound(handle.to_string()))
        }
    }

    #[async_trait]
    impl MailTransport for MockTransport {
        fn folder_name(&self) -> String {
            "INBOX".into()
        }

        async fn connect(&self) -> TransportResult<FolderAccess> {
            if let Some(e) = lock(&self.fail_connect).take() {
                return Err(e);
            }
            Ok((*lock(&self.access)).unwrap_or(FolderAccess::ReadWrite))
        }

        async fn close(&self) -> TransportResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_messages(&self) -> TransportResult<Vec<MessageHandle>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionFailed("connection reset".into()));
            }
            Ok(lock(&self.listed).clone())
        }

        async fn envelope(&self, handle: &MessageHandle) -> TransportResult<Option<RawEnvelope>> {
            Ok(self.message(handle)?.envelope)
        }

        async fn content_type(&self, handle: &MessageHandle) -> TransportResult<Option<String>> {
            Ok(self.message(handle)?.content_type)
        }

        async fn content(&self, handle: &MessageHandle) -> TransportResult<RawContent> {
            Ok(self.message(handle)?.content)
        }

        async fn flags(&self, handle: &MessageHandle) -> TransportResult<MessageFlags> {
            if self.fail_flags.load(Ordering::SeqCst) {
                return Err(TransportError::NotConnected);
            }
            Ok(self.message(handle)?.flags)
        }

        async fn message_count(&self) -> TransportResult<usize> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(lock(&self.listed).len())
        }

        fn subscribe(&self) -> Option<MailboxChanges> {
            lock(&self.changes).take()
        }
    }

    fn config() -> ReceiverConfig {
        ReceiverConfig::new("mail.example.com", "bob", "secret")
            .with_folder("INBOX")
            .with_polling_interval_ms(1000)
    }

    fn receiver(
        transport: Arc<MockTransport>,
    ) -> (MailReceiver, tokio::sync::mpsc::UnboundedReceiver<MailEvent>) {
        let (sink, events) = ChannelSink::new();
        let receiver =
            MailReceiver::new(config(), transport, EventPublisher::new(Arc::new(sink))).unwrap();
        (receiver, events)
    }

    fn drain(events: &mut tokio::sync::mpsc::UnboundedReceiver<MailEvent>) -> Vec<MailEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn ids(mails: &[Mail]) -> Vec<&str> {
        mails.iter().filter_map(|m| m.id()).collect()
    }

    #[test]
    fn test_new_validates_config() {
        let result = MailReceiver::new(
            ReceiverConfig::new("", "bob", "secret"),
            Arc::new(MockTransport::default()),
            EventPublisher::disabled(),
        );
        assert!(matches!(result, Err(CoreError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_fetches_and_publishes() {
        let transport = Arc::new(MockTransport::default());
        transport.add("1", 1000, Some("Hi"));
        transport.add("2", 2000, None);
        let (receiver, mut events) = receiver(Arc::clone(&transport));

        assert_eq!(receiver.state(), ReceiverState::Created);
        receiver.start().await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Polling);

        let mails = receiver.all_messages().unwrap();
        assert_eq!(ids(&mails), ["INBOX/2000", "INBOX/1000-Hi"]);

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.topic == "mailbus/mail/INBOX"));
        assert!(events
            .iter()
            .any(|e| e.str_property(keys::MESSAGE_ID) == Some("INBOX/1000-Hi")));
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let transport = Arc::new(MockTransport::default());
        transport.add("1", 1000, Some("Hi"));
        let (receiver, mut events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();
        let before = receiver.all_messages().unwrap();

        assert_eq!(receiver.fetch().await.unwrap(), 0);
        assert_eq!(receiver.fetch().await.unwrap(), 0);

        assert_eq!(receiver.all_messages().unwrap(), before);
        assert_eq!(drain(&mut events).len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_handles_deduplicated() {
        let transport = Arc::new(MockTransport::default());
        let a = transport.add("1", 1000, Some("A"));
        transport.add("2", 2000, Some("B"));
        lock(&transport.listed).push(a.clone());
        lock(&transport.listed).push(a);
        let (receiver, mut events) = receiver(Arc::clone(&transport));

        receiver.start().await.unwrap();

        assert_eq!(receiver.all_messages().unwrap().len(), 2);
        assert_eq!(drain(&mut events).len(), 2);
    }

    #[tokio::test]
    async fn test_queries_before_fetch_fail() {
        let (receiver, _events) = receiver(Arc::new(MockTransport::default()));

        match receiver.all_messages() {
            Err(CoreError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotConnected),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(receiver.unread_messages().is_err());
        assert!(receiver.message_by_id("INBOX/1000").is_err());
        assert!(receiver.recent_messages().await.is_err());
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let (receiver, _events) = receiver(Arc::new(MockTransport::default()));
        receiver.start().await.unwrap();
        assert!(matches!(
            receiver.start().await,
            Err(CoreError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_folder_is_configuration_error() {
        let transport = Arc::new(MockTransport::default());
        *lock(&transport.fail_connect) = Some(TransportError::FolderNotFound("Nope".into()));
        let (receiver, _events) = receiver(Arc::clone(&transport));

        assert!(matches!(
            receiver.start().await,
            Err(CoreError::Configuration(_))
        ));
        assert_eq!(receiver.state(), ReceiverState::Closed);
    }

    #[tokio::test]
    async fn test_failed_initial_fetch_closes() {
        let transport = Arc::new(MockTransport::default());
        transport.fail_list.store(true, Ordering::SeqCst);
        let (receiver, _events) = receiver(Arc::clone(&transport));

        assert!(matches!(
            receiver.start().await,
            Err(CoreError::Transport(_))
        ));
        assert_eq!(receiver.state(), ReceiverState::Closed);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
        assert!(receiver.all_messages().is_err());
    }

    #[tokio::test]
    async fn test_read_only_folder_still_starts() {
        let transport = Arc::new(MockTransport::default());
        *lock(&transport.access) = Some(FolderAccess::ReadOnly);
        transport.add("1", 1000, None);
        let (receiver, _events) = receiver(Arc::clone(&transport));

        receiver.start().await.unwrap();
        assert_eq!(receiver.all_messages().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unconvertible_message_skipped() {
        let transport = Arc::new(MockTransport::default());
        transport.add("1", 1000, Some("ok"));
        transport.register(
            MessageHandle::new(Some("INBOX".into()), "2"),
            MockMessage {
                envelope: Some(RawEnvelope::default()),
                content_type: None,
                content: RawContent::Text(String::new()),
                flags: MessageFlags::default(),
            },
        );
        let (receiver, mut events) = receiver(Arc::clone(&transport));

        receiver.start().await.unwrap();

        assert_eq!(ids(&receiver.all_messages().unwrap()), ["INBOX/1000-ok"]);
        assert_eq!(drain(&mut events).len(), 1);
    }

    #[tokio::test]
    async fn test_cached_mail_unaffected_by_copies() {
        let transport = Arc::new(MockTransport::default());
        transport.add("1", 1000, Some("Hi"));
        let (receiver, _events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();

        let mail = receiver.message_by_id("INBOX/1000-Hi").unwrap().unwrap();
        let _edited = mail.to_builder().subject("Edited").read(true).build();

        let again = receiver.message_by_id("INBOX/1000-Hi").unwrap().unwrap();
        assert_eq!(again.subject(), Some("Hi"));
        assert!(!again.is_read());
        assert!(receiver.message_by_id("INBOX/9").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unread_and_between() {
        let transport = Arc::new(MockTransport::default());
        let seen = MessageFlags {
            seen: true,
            ..Default::default()
        };
        transport.add_with_flags("1", 1000, None, seen);
        transport.add("2", 2000, None);
        transport.add("3", 3000, None);
        let (receiver, _events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();

        assert_eq!(
            ids(&receiver.unread_messages().unwrap()),
            ["INBOX/3000", "INBOX/2000"]
        );
        let from = Utc.timestamp_millis_opt(1000).unwrap();
        let to = Utc.timestamp_millis_opt(3000).unwrap();
        assert_eq!(
            ids(&receiver.messages_between(from, to).unwrap()),
            ["INBOX/2000"]
        );
    }

    #[tokio::test]
    async fn test_recent_filter_keeps_unflagged() {
        let transport = Arc::new(MockTransport::default());
        let recent = MessageFlags {
            recent: true,
            ..Default::default()
        };
        transport.add_with_flags("1", 1000, None, recent);
        transport.add("2", 2000, None);
        let (receiver, _events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();

        assert_eq!(ids(&receiver.recent_messages().await.unwrap()), ["INBOX/2000"]);

        transport.fail_flags.store(true, Ordering::SeqCst);
        assert!(receiver.recent_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_added_and_removed() {
        let (transport, _tx) = MockTransport::with_push();
        let transport = Arc::new(transport);
        let first = transport.add("1", 1000, None);
        let (receiver, mut events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();
        drain(&mut events);

        let second = transport.add("2", 2000, None);
        receiver
            .inner
            .handle_change(MailboxChange::Added(vec![second.clone(), first.clone()]))
            .await;
        assert_eq!(receiver.all_messages().unwrap().len(), 2);
        assert_eq!(drain(&mut events).len(), 1);
        assert_eq!(receiver.state(), ReceiverState::Polling);

        let unknown = MessageHandle::new(Some("INBOX".into()), "99");
        receiver
            .inner
            .handle_change(MailboxChange::Removed(vec![first, unknown]))
            .await;
        assert_eq!(ids(&receiver.all_messages().unwrap()), ["INBOX/2000"]);
    }

    #[tokio::test]
    async fn test_push_stream_consumed() {
        let (transport, tx) = MockTransport::with_push();
        let transport = Arc::new(transport);
        let (receiver, mut events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();

        let handle = transport.add("1", 1000, None);
        tx.unbounded_send(MailboxChange::Added(vec![handle])).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.str_property(keys::MESSAGE_ID), Some("INBOX/1000"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_and_pushes() {
        let (transport, _tx) = MockTransport::with_push();
        let transport = Arc::new(transport);
        let (receiver, mut events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();

        let handles: Vec<MessageHandle> = (0..10)
            .map(|i| transport.add(&i.to_string(), 1000 * (i + 1), Some("push")))
            .collect();
        let receiver = Arc::new(receiver);

        let mut tasks = Vec::new();
        for handle in handles {
            let receiver = Arc::clone(&receiver);
            tasks.push(tokio::spawn(async move {
                receiver
                    .inner
                    .handle_change(MailboxChange::Added(vec![handle]))
                    .await;
            }));
        }
        for _ in 0..100 {
            let receiver = Arc::clone(&receiver);
            tasks.push(tokio::spawn(async move {
                let mails = receiver.all_messages().unwrap();
                assert!(mails.len() <= 10);
                for mail in &mails {
                    assert!(mail.id().is_some());
                    assert!(mail.sent().is_some());
                    assert_eq!(mail.to(), ["bob@example.com"]);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(receiver.all_messages().unwrap().len(), 10);
        assert_eq!(drain(&mut events).len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_loop_fetches_new_mail() {
        let transport = Arc::new(MockTransport::default());
        transport.add("1", 1000, None);
        let (receiver, mut events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();
        assert_eq!(transport.list_calls.load(Ordering::SeqCst), 1);

        transport.add("2", 2000, None);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(transport.list_calls.load(Ordering::SeqCst), 2);
        assert_eq!(receiver.all_messages().unwrap().len(), 2);
        assert_eq!(drain(&mut events).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_survives_errors() {
        let transport = Arc::new(MockTransport::default());
        let (receiver, _events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();

        transport.fail_list.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        transport.fail_list.store(false, Ordering::SeqCst);
        transport.add("1", 1000, None);
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(transport.list_calls.load(Ordering::SeqCst), 3);
        assert_eq!(receiver.all_messages().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_transport_probes() {
        let (transport, _tx) = MockTransport::with_push();
        let transport = Arc::new(transport);
        let (receiver, _events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(transport.probes.load(Ordering::SeqCst), 2);
        assert_eq!(transport.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_polling() {
        let transport = Arc::new(MockTransport::default());
        let (receiver, _events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();

        receiver.stop().await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Closed);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(transport.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_aborts_tasks_and_stays_closed() {
        let (transport, _tx) = MockTransport::with_push();
        let transport = Arc::new(transport);
        let (receiver, mut events) = receiver(Arc::clone(&transport));
        receiver.start().await.unwrap();
        assert_eq!(lock(&receiver.tasks).len(), 2);

        receiver.stop().await.unwrap();
        assert!(lock(&receiver.tasks).is_empty());

        let late = transport.add("1", 1000, None);
        receiver
            .inner
            .handle_change(MailboxChange::Added(vec![late]))
            .await;
        assert_eq!(receiver.state(), ReceiverState::Closed);
        assert_eq!(receiver.all_messages().unwrap().len(), 1);
        assert_eq!(drain(&mut events).len(), 1);
    }
}
