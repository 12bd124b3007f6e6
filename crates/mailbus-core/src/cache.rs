//! In-memory set of known messages

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::mail::Mail;
use crate::transport::MessageHandle;

/// Known messages keyed by transport handle
#[derive(Debug, Default)]
pub struct MailCache {
    entries: HashMap<MessageHandle, Mail>,
}

impl MailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, handle: &MessageHandle) -> bool {
        self.entries.contains_key(handle)
    }

    /// Insert a mail unless the handle is already known. Returns whether it
    /// was inserted.
    pub fn insert_if_absent(&mut self, handle: MessageHandle, mail: Mail) -> bool {
        if self.entries.contains_key(&handle) {
            return false;
        }
        self.entries.insert(handle, mail);
        true
    }

    pub fn remove(&mut self, handle: &MessageHandle) -> Option<Mail> {
        self.entries.remove(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every known mail, newest first
    pub fn sorted(&self) -> Vec<Mail> {
        let mut mails: Vec<Mail> = self.entries.values().cloned().collect();
        mails.sort_by(by_sent_descending);
        mails
    }

    /// Unread mails, newest first
    pub fn unread(&self) -> Vec<Mail> {
        let mut mails: Vec<Mail> = self
            .entries
            .values()
            .filter(|m| !m.is_read())
            .cloned()
            .collect();
        mails.sort_by(by_sent_descending);
        mails
    }

    /// Mails sent strictly between `from` and `to`, newest first
    pub fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Mail> {
        let mut mails: Vec<Mail> = self
            .entries
            .values()
            .filter(|m| m.sent().is_some_and(|sent| sent > from && sent < to))
            .cloned()
            .collect();
        mails.sort_by(by_sent_descending);
        mails
    }

    /// Handle/mail pairs, for lookups that need the transport afterwards
    pub fn snapshot(&self) -> Vec<(MessageHandle, Mail)> {
        self.entries
            .iter()
            .map(|(h, m)| (h.clone(), m.clone()))
            .collect()
    }
}

/// Newest first; mails without a sent date go last
pub fn by_sent_descending(a: &Mail, b: &Mail) -> Ordering {
    match (a.sent(), b.sent()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
