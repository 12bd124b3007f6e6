//! RFC 822 message parsing for transports that download raw messages
//!
//! Both the IMAP and POP3 transports fetch the full message source and
//! answer envelope/content queries from the parsed result.

use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser, MessagePart, MimeHeaders, PartType};

use crate::transport::{BodyPart, RawContent, RawEnvelope, TransportError, TransportResult};

/// Email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub address: String,
}

impl EmailAddress {
    pub fn new(name: Option<String>, address: String) -> Self {
        Self { name, address }
    }

    /// Format as "Name <address>" or just "address"
    pub fn to_display_string(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.address),
            _ => self.address.clone(),
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Owned result of parsing one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub envelope: RawEnvelope,
    /// Content-Type of the top-level part
    pub content_type: Option<String>,
    pub content: RawContent,
}

/// Parse raw message bytes
pub fn parse_message(raw: &[u8]) -> TransportResult<ParsedMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| TransportError::Malformed("unparseable message".to_string()))?;

    let envelope = RawEnvelope {
        from: addresses(message.from()),
        to: addresses(message.to()),
        cc: addresses(message.cc()),
        reply_to: addresses(message.reply_to()),
        subject: message.subject().map(str::to_string),
        sent: message
            .date()
            .and_then(|date| DateTime::<Utc>::from_timestamp(date.to_timestamp(), 0)),
    };

    let root = message
        .parts
        .first()
        .ok_or_else(|| TransportError::Malformed("message has no body".to_string()))?;

    let content = match &root.body {
        PartType::Text(text) | PartType::Html(text) => RawContent::Text(text.to_string()),
        PartType::Multipart(ids) => RawContent::Multipart(
            ids.iter()
                .filter_map(|id| message.part(*id))
                .map(|part| BodyPart {
                    content_type: content_type_header(part),
                    content: part.text_contents().unwrap_or_default().to_string(),
                })
                .collect(),
        ),
        PartType::Message(_) => RawContent::Message,
        PartType::Binary(_) | PartType::InlineBinary(_) => RawContent::Binary,
    };

    Ok(ParsedMessage {
        envelope,
        content_type: content_type_header(root),
        content,
    })
}

/// Rebuild a Content-Type header value ("type/subtype; charset=...")
fn content_type_header(part: &MessagePart<'_>) -> Option<String> {
    let ct = MimeHeaders::content_type(part)?;
    let mut value = match ct.subtype() {
        Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
        None => ct.ctype().to_string(),
    };
    if let Some(charset) = ct.attribute("charset") {
        value.push_str("; charset=");
        value.push_str(charset);
    }
    Some(value)
}

fn addresses(addr: Option<&Address<'_>>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let to_email = |a: &mail_parser::Addr<'_>| {
        a.address.as_ref().map(|address| {
            EmailAddress::new(a.name.as_ref().map(|n| n.to_string()), address.to_string())
                .to_display_string()
        })
    };
    match addr {
        Address::List(list) => list.iter().filter_map(to_email).collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(to_email))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "From: Alice <alice@example.com>\r\n\
To: bob@example.com, Carol <carol@example.com>\r\n\
Cc: dave@example.com\r\n\
Subject: Hi\r\n\
Date: Thu, 01 Jan 1970 00:00:01 +0000\r\n\
Content-Type: text/plain; charset=\"utf-8\"\r\n\
\r\n\
Hello there\r\n";

    const MULTIPART: &str = "From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: Parts\r\n\
Date: Thu, 01 Jan 1970 00:00:02 +0000\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/html; charset=iso-8859-1\r\n\
\r\n\
<p>First</p>\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\
\r\n\
Second\r\n\
--XX--\r\n";

    #[test]
    fn test_parse_plain_message() {
        let parsed = parse_message(PLAIN.as_bytes()).unwrap();

        assert_eq!(parsed.envelope.from, ["Alice <alice@example.com>"]);
        assert_eq!(
            parsed.envelope.to,
            ["bob@example.com", "Carol <carol@example.com>"]
        );
        assert_eq!(parsed.envelope.cc, ["dave@example.com"]);
        assert_eq!(parsed.envelope.subject.as_deref(), Some("Hi"));
        assert_eq!(parsed.envelope.sent.map(|d| d.timestamp()), Some(1));
        assert_eq!(
            parsed.content_type.as_deref(),
            Some("text/plain; charset=utf-8")
        );
        match parsed.content {
            RawContent::Text(text) => assert!(text.starts_with("Hello there")),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_parse_multipart_message() {
        let parsed = parse_message(MULTIPART.as_bytes()).unwrap();

        assert!(parsed
            .content_type
            .as_deref()
            .unwrap()
            .starts_with("multipart/mixed"));
        match parsed.content {
            RawContent::Multipart(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[0].content_type.as_deref(),
                    Some("text/html; charset=iso-8859-1")
                );
                assert!(parts[0].content.contains("First"));
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_display_address() {
        let named = EmailAddress::new(Some("Alice".into()), "alice@example.com".into());
        let bare = EmailAddress::new(None, "bob@example.com".into());
        assert_eq!(named.to_string(), "Alice <alice@example.com>");
        assert_eq!(bare.to_string(), "bob@example.com");
    }
}
