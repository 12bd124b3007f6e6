//! Conversion of transport messages into [`Mail`] values

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::mail::{Mail, MailBuilder};
use crate::transport::{MailTransport, MessageHandle, RawContent, RawEnvelope};
use crate::{CoreError, CoreResult};

/// Letters after the last '/' of a content type
static SUB_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*/([A-Za-z]+)").expect("valid sub-type pattern"));

/// Value of the last charset parameter, quotes optional
static CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^.*charset="?([a-zA-Z0-9_-]*)"?"#).expect("valid charset pattern")
});

/// Content type assumed when the transport declares none
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Read one message through the transport and freeze it into a mail
pub async fn create_mail(
    transport: &dyn MailTransport,
    handle: &MessageHandle,
) -> CoreResult<Mail> {
    let mut builder = Mail::builder();

    if let Some(envelope) = transport.envelope(handle).await? {
        let read = transport.flags(handle).await?.seen;
        builder = apply_envelope(builder, handle, envelope)?.read(read);
    }

    let content_type = transport
        .content_type(handle)
        .await?
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let content = transport.content(handle).await?;
    builder = apply_content(builder, &content_type, content)?;

    Ok(builder.build())
}

fn apply_envelope(
    builder: MailBuilder,
    handle: &MessageHandle,
    envelope: RawEnvelope,
) -> CoreResult<MailBuilder> {
    let sent = envelope
        .sent
        .ok_or_else(|| CoreError::Conversion(format!("message {} has no sent date", handle)))?;

    let mut id = format!("{}/{}", handle.folder().unwrap_or(""), sent.timestamp_millis());
    if let Some(subject) = &envelope.subject {
        id.push('-');
        id.push_str(subject);
    }

    let mut builder = builder
        .to_all(envelope.to)
        .cc_all(envelope.cc)
        .reply_to_all(envelope.reply_to)
        .subject_opt(envelope.subject)
        .sent(sent)
        .id(id);
    if let Some(from) = envelope.from.into_iter().next() {
        builder = builder.from(from);
    }
    Ok(builder)
}

fn apply_content(
    builder: MailBuilder,
    content_type: &str,
    content: RawContent,
) -> CoreResult<MailBuilder> {
    let kind = content_type.to_ascii_lowercase();

    if kind.starts_with("text/") {
        let RawContent::Text(text) = content else {
            return Err(CoreError::Conversion(format!(
                "{} declared but content is not text",
                content_type
            )));
        };
        Ok(with_type_details(builder, content_type).body(text))
    } else if kind.starts_with("multipart/") {
        let RawContent::Multipart(parts) = content else {
            return Err(CoreError::Conversion(format!(
                "{} declared but content is not multipart",
                content_type
            )));
        };
        // Only the first part becomes the body
        let Some(first) = parts.into_iter().next() else {
            return Ok(builder);
        };
        let part_type = first
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        Ok(with_type_details(builder, &part_type).body(first.content))
    } else {
        debug!("Leaving body empty for content type {}", content_type);
        Ok(builder)
    }
}

fn with_type_details(mut builder: MailBuilder, content_type: &str) -> MailBuilder {
    if let Some(sub_type) = SUB_TYPE.captures(content_type).and_then(|c| c.get(1)) {
        builder = builder.sub_type(sub_type.as_str());
    }
    if let Some(charset) = CHARSET.captures(content_type).and_then(|c| c.get(1)) {
        builder = builder.charset(charset.as_str());
    }
    builder
}
