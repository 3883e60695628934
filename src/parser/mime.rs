//! MIME decomposition: extract subject, plain-text body and HTML body from a
//! raw message.
//!
//! Decoding runs in two stages. The structured stage understands header
//! blocks, `Content-Type` and one level of multipart; it reports any
//! structural surprise as a [`StructureError`]. When it does, the line-based
//! heuristic stage takes over. [`decompose`] itself has no error case.
//!
//! Content-transfer-encodings are not decoded: base64 and quoted-printable
//! bodies come out exactly as they appear on the wire.

use thiserror::Error;
use tracing::debug;

use crate::model::mail::Decomposed;
use crate::parser::header::{self, ContentType, HeaderError, Headers};

/// Why the structured stage gave up on a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    /// No empty line separates headers from body.
    #[error("no blank line after the header block")]
    MissingHeaderTerminator,

    /// The top-level header block is malformed.
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// A multipart message without a usable `boundary` parameter.
    #[error("multipart message has no boundary parameter")]
    MissingBoundary,

    /// The boundary never appears as a delimiter line in the body.
    #[error("boundary delimiter not found in body")]
    BoundaryNotFound,
}

const BYTE_ORDER_MARKS: [&[u8]; 3] = [b"\xEF\xBB\xBF", b"\xFF\xFE", b"\xFE\xFF"];

/// Extract `(subject, plain body, html body)` from raw message bytes.
///
/// Total and deterministic: malformed input falls back to the line heuristic.
/// Each field is trimmed of surrounding whitespace. A leading byte-order
/// mark (UTF-8 or a stray UTF-16 one) is skipped.
pub fn decompose(raw: &[u8]) -> Decomposed {
    let raw = BYTE_ORDER_MARKS
        .iter()
        .find_map(|bom| raw.strip_prefix(*bom))
        .unwrap_or(raw);
    let text = header::decode_text(raw);

    match decompose_structured(&text) {
        Ok(parts) => parts,
        Err(e) => {
            debug!(error = %e, "Structured MIME parse failed, using line heuristic");
            decompose_heuristic(&text)
        }
    }
}

/// Structured stage: headers, `Content-Type`, one level of multipart.
pub fn decompose_structured(text: &str) -> Result<Decomposed, StructureError> {
    let (block, body) =
        header::split_at_blank_line(text).ok_or(StructureError::MissingHeaderTerminator)?;
    let headers = Headers::parse(block)?;

    let subject = headers.get("subject").unwrap_or_default();
    let content_type = headers.content_type();
    let media_type = content_type
        .as_ref()
        .map(|ct| ct.media_type.as_str())
        .unwrap_or("text/plain");

    if let Some(ct) = content_type.as_ref().filter(|ct| ct.is_multipart()) {
        let (plain, html) = multipart_bodies(ct, body)?;
        debug!(media_type, "Decomposed multipart message");
        return Ok(Decomposed::new(subject, plain, html));
    }

    debug!(media_type, "Decomposed single-part message");
    if media_type == "text/html" {
        Ok(Decomposed::new(subject, "", body))
    } else {
        Ok(Decomposed::new(subject, body, ""))
    }
}

/// Pick the first `text/plain` and first `text/html` part of a multipart body.
fn multipart_bodies<'a>(
    ct: &ContentType,
    body: &'a str,
) -> Result<(&'a str, &'a str), StructureError> {
    let boundary = ct.boundary().ok_or(StructureError::MissingBoundary)?;
    let parts = split_parts(body, boundary).ok_or(StructureError::BoundaryNotFound)?;

    let mut plain = None;
    let mut html = None;

    for part in parts {
        // A part whose header block cannot be read ends the walk; the parts
        // already seen are kept.
        let Some((block, content)) = header::split_at_blank_line(part) else {
            debug!("Multipart part without header terminator, stopping");
            break;
        };
        let Ok(part_headers) = Headers::parse(block) else {
            debug!("Multipart part with malformed headers, stopping");
            break;
        };

        match part_headers.content_type().map(|ct| ct.media_type) {
            Some(t) if t == "text/plain" && plain.is_none() => plain = Some(content),
            Some(t) if t == "text/html" && html.is_none() => html = Some(content),
            _ => {}
        }
    }

    Ok((plain.unwrap_or_default(), html.unwrap_or_default()))
}

/// Split a multipart body into its parts (preamble and epilogue dropped).
///
/// Returns `None` when no delimiter line for `boundary` exists.
fn split_parts<'a>(body: &'a str, boundary: &str) -> Option<Vec<&'a str>> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut part_start: Option<usize> = None;
    let mut pos = 0;

    for line in body.split_inclusive('\n') {
        let content = header::line_content(line).trim_end_matches([' ', '\t']);
        let is_close = content
            .strip_prefix(delimiter.as_str())
            .is_some_and(|rest| rest == "--");

        if content == delimiter || is_close {
            if let Some(start) = part_start {
                parts.push(&body[start..pos]);
            }
            if is_close {
                return Some(parts);
            }
            part_start = Some(pos + line.len());
        }
        pos += line.len();
    }

    // Unclosed final part: keep what was delivered.
    let start = part_start?;
    if start < body.len() {
        parts.push(&body[start..]);
    }
    Some(parts)
}

/// Heuristic stage: scan lines, never fails.
///
/// Before the first empty line, `Subject: ` sets the subject and any line
/// mentioning `Content-Type: text/html` marks the body as HTML. Everything
/// after the empty line is the body.
pub fn decompose_heuristic(text: &str) -> Decomposed {
    let mut subject = "";
    let mut is_html = false;
    let mut in_body = false;
    let mut body = String::new();

    for line in text.split('\n') {
        if in_body {
            body.push_str(line);
            body.push('\n');
        } else if let Some(value) = line.strip_prefix("Subject: ") {
            subject = value;
        } else if line.contains("Content-Type: text/html") {
            is_html = true;
        } else if header::line_content(line).is_empty() {
            in_body = true;
        }
    }

    if is_html {
        Decomposed::new(subject, "", &body)
    } else {
        Decomposed::new(subject, &body, "")
    }
}
