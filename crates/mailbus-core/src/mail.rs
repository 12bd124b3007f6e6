//! Mail value type and its builder
//!
//! A [`Mail`] is read-only once built. Everything that needs to change a
//! mail goes through a [`MailBuilder`], either a fresh one or a copy made
//! with [`Mail::to_builder`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{CoreError, CoreResult};

/// Subject of a freshly built mail
pub const DEFAULT_SUBJECT: &str = "no subject";

/// One email message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mail {
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    reply_to: Vec<String>,
    subject: Option<String>,
    body: String,
    charset: Option<String>,
    sub_type: Option<String>,
    read: bool,
    sent: Option<DateTime<Utc>>,
    id: Option<String>,
    attachments: Vec<PathBuf>,
}

impl Mail {
    /// Start building a new mail
    pub fn builder() -> MailBuilder {
        MailBuilder::new()
    }

    /// Copy this mail into a builder. Changes to the builder never affect `self`.
    pub fn to_builder(&self) -> MailBuilder {
        MailBuilder { mail: self.clone() }
    }

    /// Sender address
    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// Primary recipients, in order
    pub fn to(&self) -> &[String] {
        &self.to
    }

    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    pub fn reply_to(&self) -> &[String] {
        &self.reply_to
    }

    /// Subject line, `None` when the source message had none
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Charset of the body, if declared
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Sub-type of the body (e.g. "plain" or "html"), if known
    pub fn sub_type(&self) -> Option<&str> {
        self.sub_type.as_deref()
    }

    /// Whether the message has been seen by some client
    pub fn is_read(&self) -> bool {
        self.read
    }

    /// When the message was sent
    pub fn sent(&self) -> Option<DateTime<Utc>> {
        self.sent
    }

    /// Identifier derived by the receiver
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Files attached on the send path
    pub fn attachments(&self) -> &[PathBuf] {
        &self.attachments
    }
}

/// Mutable builder producing a [`Mail`]
#[derive(Debug, Clone)]
pub struct MailBuilder {
    mail: Mail,
}

impl Default for MailBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MailBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            mail: Mail {
                from: None,
                to: Vec::new(),
                cc: Vec::new(),
                reply_to: Vec::new(),
                subject: Some(DEFAULT_SUBJECT.to_string()),
                body: String::new(),
                charset: None,
                sub_type: None,
                read: false,
                sent: None,
                id: None,
                attachments: Vec::new(),
            },
        }
    }

    /// Create a builder with one recipient, a subject and a body
    pub fn addressed(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new().to(to).subject(subject).body(body)
    }

    /// Set the sender address
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.mail.from = Some(from.into());
        self
    }

    /// Add a To recipient
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.mail.to.push(address.into());
        self
    }

    /// Add several To recipients
    pub fn to_all<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mail.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Remove the first To recipient equal to `address`
    pub fn remove_to(mut self, address: &str) -> Self {
        remove_first(&mut self.mail.to, address);
        self
    }

    /// Add a CC recipient
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.mail.cc.push(address.into());
        self
    }

    /// Add several CC recipients
    pub fn cc_all<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mail.cc.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn remove_cc(mut self, address: &str) -> Self {
        remove_first(&mut self.mail.cc, address);
        self
    }

    /// Add a Reply-To address
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.mail.reply_to.push(address.into());
        self
    }

    pub fn reply_to_all<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mail
            .reply_to
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn remove_reply_to(mut self, address: &str) -> Self {
        remove_first(&mut self.mail.reply_to, address);
        self
    }

    /// Set the subject line
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.mail.subject = Some(subject.into());
        self
    }

    /// Set or clear the subject line
    pub fn subject_opt(mut self, subject: Option<String>) -> Self {
        self.mail.subject = subject;
        self
    }

    /// Set the body text
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.mail.body = body.into();
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.mail.charset = Some(charset.into());
        self
    }

    pub fn sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.mail.sub_type = Some(sub_type.into());
        self
    }

    pub fn read(mut self, read: bool) -> Self {
        self.mail.read = read;
        self
    }

    pub fn sent(mut self, sent: DateTime<Utc>) -> Self {
        self.mail.sent = Some(sent);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.mail.id = Some(id.into());
        self
    }

    /// Attach a file; it must exist
    pub fn attach(mut self, path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::AttachmentNotFound(path.to_path_buf()));
        }
        self.mail.attachments.push(path.to_path_buf());
        Ok(self)
    }

    /// Attach several files; fails on the first one that does not exist
    pub fn attach_all<I, P>(self, paths: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().try_fold(self, |builder, path| builder.attach(path))
    }

    pub fn remove_attachment(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if let Some(pos) = self.mail.attachments.iter().position(|p| p == path) {
            self.mail.attachments.remove(pos);
        }
        self
    }

    /// Freeze the builder into a read-only mail
    pub fn build(self) -> Mail {
        self.mail
    }
}

fn remove_first(list: &mut Vec<String>, value: &str) {
    if let Some(pos) = list.iter().position(|v| v == value) {
        list.remove(pos);
    }
}
