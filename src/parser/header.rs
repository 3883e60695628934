//! Header-block handling: splitting a message at its first blank line,
//! unfolding and validating header fields, and parsing `Content-Type`.
//!
//! Encoded-words (RFC 2047) are deliberately left undecoded; values are
//! returned verbatim apart from unfolding.

use std::collections::BTreeMap;

use thiserror::Error;

/// Structural problems found while reading a header block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The first line of the block is a continuation line.
    #[error("header block starts with a continuation line")]
    LeadingContinuation,

    /// A line is neither a continuation nor a `name: value` field.
    #[error("malformed header field on line {line}")]
    MalformedField { line: usize },
}

/// Decode raw message bytes to text.
///
/// Tries UTF-8 first, then falls back to Windows-1252, which maps every
/// byte to a character, so nothing is ever dropped. A leading UTF-16 BOM
/// is decoded as two Windows-1252 characters like any other bytes.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252
            .decode_without_bom_handling(bytes)
            .0
            .into_owned(),
    }
}

/// Strip the line terminator (`\n` or `\r\n`) from a line.
pub fn line_content(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Split text at its first empty line into `(header_block, body)`.
///
/// Both LF and CRLF line endings are recognized. The empty line itself
/// belongs to neither half. Returns `None` when no empty line exists.
pub fn split_at_blank_line(text: &str) -> Option<(&str, &str)> {
    let mut pos = 0;
    for line in text.split_inclusive('\n') {
        if line.ends_with('\n') && line_content(line).is_empty() {
            return Some((&text[..pos], &text[pos + line.len()..]));
        }
        pos += line.len();
    }
    None
}

/// An ordered list of header fields with lowercase names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Parse a header block strictly.
    ///
    /// Continuation lines (starting with space or tab) are joined to the
    /// previous field with a single space. Any other line must be a valid
    /// `name: value` field.
    pub fn parse(block: &str) -> Result<Self, HeaderError> {
        let mut fields: Vec<(String, String)> = Vec::new();

        for (idx, raw_line) in block.split_inclusive('\n').enumerate() {
            let line = line_content(raw_line);
            if line.starts_with(' ') || line.starts_with('\t') {
                let last = fields.last_mut().ok_or(HeaderError::LeadingContinuation)?;
                let extra = line.trim();
                if !extra.is_empty() {
                    if !last.1.is_empty() {
                        last.1.push(' ');
                    }
                    last.1.push_str(extra);
                }
                continue;
            }

            let (name, value) = line
                .split_once(':')
                .filter(|(name, _)| is_field_name(name))
                .ok_or(HeaderError::MalformedField { line: idx + 1 })?;
            fields.push((name.to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self { fields })
    }

    /// First value for a header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Content-Type`, if present and well-formed.
    pub fn content_type(&self) -> Option<ContentType> {
        self.get("content-type").and_then(ContentType::parse)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// RFC 5322 field names: printable ASCII except `:` and space.
fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

/// A parsed `Content-Type` value: `type/subtype; name=value; ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lowercased `type/subtype`.
    pub media_type: String,
    /// Parameters keyed by lowercased name, values unquoted.
    pub params: BTreeMap<String, String>,
}

impl ContentType {
    /// Parse a header value. Returns `None` when the media type itself is
    /// unusable; malformed parameters are skipped.
    pub fn parse(value: &str) -> Option<Self> {
        let mut segments = split_params(value).into_iter();
        let media_type = segments.next()?.trim().to_ascii_lowercase();

        let (main, sub) = media_type.split_once('/')?;
        if !is_token(main) || !is_token(sub) {
            return None;
        }

        let mut params = BTreeMap::new();
        for segment in segments {
            let Some((name, raw_value)) = segment.split_once('=') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            if !is_token(&name) {
                continue;
            }
            params.entry(name).or_insert_with(|| unquote(raw_value.trim()));
        }

        Some(Self { media_type, params })
    }

    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }

    /// The non-empty `boundary` parameter, if any.
    pub fn boundary(&self) -> Option<&str> {
        self.params
            .get("boundary")
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }
}

/// MIME tokens (RFC 2045): no spaces, controls or tspecials.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b > 32 && b < 127 && !b"()<>@,;:\\\"/[]?=".contains(&b))
}

/// Split on `;` outside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

/// Remove surrounding quotes and resolve backslash escapes.
fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"') else {
        return value.to_string();
    };
    let inner = inner.strip_suffix('"').unwrap_or(inner);

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Extract bare addresses from an address-list header value.
///
/// `"Last, First" <a@b.com>, c@d.com` → `["a@b.com", "c@d.com"]`.
/// Entries without an `@` are skipped.
pub fn addresses(value: &str) -> Vec<String> {
    let mut results = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    let mut flush = |entry: &mut String| {
        if let Some(addr) = bare_address(entry) {
            results.push(addr);
        }
        entry.clear();
    };

    for ch in value.chars() {
        match ch {
            '"' if !in_angle => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                flush(&mut current);
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    flush(&mut current);

    results
}

fn bare_address(entry: &str) -> Option<String> {
    let entry = entry.trim();
    let addr = match (entry.rfind('<'), entry.rfind('>')) {
        (Some(open), Some(close)) if close > open => entry[open + 1..close].trim(),
        _ => entry,
    };
    (addr.contains('@') && !addr.contains(char::is_whitespace)).then(|| addr.to_string())
}
