//! Message records: what arrives, what gets derived, and what is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::{header, mime};

/// Separator used when the recipient list is flattened into one column.
pub const RECIPIENT_SEPARATOR: &str = ", ";

/// One accepted mail, exactly as the receiving collaborator hands it over.
///
/// The protocol layer has already validated envelope syntax and size limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope sender (`MAIL FROM`).
    pub sender: String,
    /// Envelope recipients (`RCPT TO`), in the order they were received.
    pub recipients: Vec<String>,
    /// The DATA payload, untouched.
    pub raw: Vec<u8>,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, recipients: Vec<String>, raw: impl Into<Vec<u8>>) -> Self {
        Self {
            sender: sender.into(),
            recipients,
            raw: raw.into(),
        }
    }

    /// Recipients in their stored, serialized form.
    pub fn joined_recipients(&self) -> String {
        self.recipients.join(RECIPIENT_SEPARATOR)
    }
}

/// The three fields extracted from a raw message by [`mime::decompose`].
///
/// Every field is trimmed and may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decomposed {
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

impl Decomposed {
    /// Build a triple, trimming every field.
    pub fn new(subject: &str, plain_body: &str, html_body: &str) -> Self {
        Self {
            subject: subject.trim().to_string(),
            plain_body: plain_body.trim().to_string(),
            html_body: html_body.trim().to_string(),
        }
    }

    /// Which body a viewer should render.
    pub fn primary(&self) -> ContentKind {
        ContentKind::for_bodies(&self.html_body)
    }
}

/// The body chosen as primary for rendering: HTML wins whenever it is non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    #[serde(rename = "text/plain")]
    Plain,
    #[serde(rename = "text/html")]
    Html,
}

impl ContentKind {
    fn for_bodies(html_body: &str) -> Self {
        if html_body.is_empty() {
            Self::Plain
        } else {
            Self::Html
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "text/plain",
            Self::Html => "text/html",
        }
    }
}

/// A row ready to be inserted into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub html: String,
    pub raw: String,
    /// Reception time; the repository assigns "now" when absent.
    pub received_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    /// Decode and decompose an envelope into an insertable row.
    ///
    /// This is the one place derived fields are computed during ingestion.
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let parts = mime::decompose(&envelope.raw);
        Self {
            from: envelope.sender.clone(),
            to: envelope.joined_recipients(),
            subject: parts.subject,
            body: parts.plain_body,
            html: parts.html_body,
            raw: header::decode_text(&envelope.raw),
            received_at: None,
        }
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }
}

/// The durable record of one received mail, shaped as the JSON API emits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub html: String,
    pub raw: String,
    pub timestamp: DateTime<Utc>,
    /// Derived on read: which body is primary.
    pub content_type: ContentKind,
    /// Derived on read: the plain body carries ANSI escape sequences.
    pub has_ansi: bool,
}

impl StoredMessage {
    /// Assemble a record from its stored columns, filling the derived flags.
    #[allow(clippy::too_many_arguments)]
    pub fn from_columns(
        id: i64,
        from: String,
        to: String,
        subject: String,
        body: String,
        html: String,
        raw: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let content_type = ContentKind::for_bodies(&html);
        let has_ansi = content_type == ContentKind::Plain && has_ansi_codes(&body);
        Self {
            id,
            from,
            to,
            subject,
            body,
            html,
            raw,
            timestamp,
            content_type,
            has_ansi,
        }
    }

    /// Recipients split back into a list.
    pub fn recipients(&self) -> Vec<&str> {
        self.to
            .split(RECIPIENT_SEPARATOR)
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// Whether text contains an ANSI CSI introducer (`ESC [`).
pub fn has_ansi_codes(text: &str) -> bool {
    text.contains("\x1b[")
}
