//! Integration tests for MIME decomposition and header-derived envelopes.

use std::path::Path;

use mailsink::ingest::envelope_from_headers;
use mailsink::model::mail::{ContentKind, Decomposed, Envelope, NewMessage};
use mailsink::parser::mime::{decompose, decompose_structured, StructureError};
use proptest::prelude::*;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

// ─── Single-part messages ───────────────────────────────────────────

#[test]
fn test_plain_message() {
    let d = decompose(&fixture("plain.eml"));
    assert_eq!(d, Decomposed::new("Hello", "Hi there", ""));
    assert_eq!(d.primary(), ContentKind::Plain);
}

// ─── Multipart messages ─────────────────────────────────────────────

#[test]
fn test_multipart_picks_first_text_parts() {
    let d = decompose(&fixture("multipart.eml"));
    assert_eq!(d.subject, "Weekly report");
    assert_eq!(d.plain_body, "plain version");
    assert_eq!(d.html_body, "<b>html version</b>");
    assert_eq!(d.primary(), ContentKind::Html);
}

#[test]
fn test_multipart_ignores_attachment_payload() {
    let d = decompose(&fixture("multipart.eml"));
    assert!(!d.plain_body.contains("JVBERi0"));
    assert!(!d.html_body.contains("JVBERi0"));
    assert!(!d.plain_body.contains("second plain part"));
}

#[test]
fn test_crlf_multipart() {
    let d = decompose(&fixture("crlf_alternative.eml"));
    assert_eq!(d, Decomposed::new("Deploy finished", "All green", "<p>All green</p>"));
}

#[test]
fn test_multipart_without_text_parts() {
    let raw = b"Subject: Files\nContent-Type: multipart/mixed; boundary=z\n\n--z\nContent-Type: image/png\n\nPNGDATA\n--z--\n";
    assert_eq!(decompose(raw), Decomposed::new("Files", "", ""));
}

// ─── Fallback ───────────────────────────────────────────────────────

#[test]
fn test_missing_blank_line_uses_heuristic() {
    let raw = fixture("no_separator.eml");
    let text = String::from_utf8(raw.clone()).unwrap();
    assert_eq!(
        decompose_structured(&text),
        Err(StructureError::MissingHeaderTerminator)
    );

    let d = decompose(&raw);
    assert_eq!(d.subject, "Headers only");
    assert_eq!(d.plain_body, "");
    assert_eq!(d.html_body, "");
}

#[test]
fn test_malformed_header_uses_heuristic() {
    let d = decompose(&fixture("broken_header.eml"));
    assert_eq!(d, Decomposed::new("Still found", "", "<p>fallback body</p>"));
}

#[test]
fn test_non_utf8_bytes() {
    let d = decompose(b"Subject: Caf\xe9\n\nPrix: 5\x80\n");
    assert_eq!(d.subject, "Café");
    assert_eq!(d.plain_body, "Prix: 5€");
}

#[test]
fn test_stray_utf16_bom_is_skipped() {
    let raw = b"\xff\xfeSubject: x\n\nbody \xe9\n";
    assert_eq!(decompose(raw), Decomposed::new("x", "body é", ""));

    // The stored source keeps every delivered byte.
    let msg = NewMessage::from_envelope(&Envelope::new("a@x", vec!["b@x".into()], raw.to_vec()));
    assert_eq!(msg.raw, "ÿþSubject: x\n\nbody é\n");
    assert_eq!(msg.subject, "x");
}

#[test]
fn test_empty_input() {
    assert_eq!(decompose(b""), Decomposed::default());
}

// ─── Envelopes from headers ─────────────────────────────────────────

#[test]
fn test_envelope_from_fixture_headers() {
    let env = envelope_from_headers(fixture("multipart.eml")).unwrap();
    assert_eq!(env.sender, "alice@example.com");
    assert_eq!(env.recipients, vec!["bob@example.com", "carol@example.com"]);
    assert_eq!(env.raw, fixture("multipart.eml"));
}

// ─── Properties ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_decompose_is_total_and_deterministic(raw in proptest::collection::vec(any::<u8>(), 0..512)) {
        let first = decompose(&raw);
        let second = decompose(&raw);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.subject.trim(), first.subject.as_str());
        prop_assert_eq!(first.plain_body.trim(), first.plain_body.as_str());
        prop_assert_eq!(first.html_body.trim(), first.html_body.as_str());
    }

    #[test]
    fn prop_decompose_handles_mail_shaped_text(
        subject in "[ -~]{0,40}",
        body in "[ -~\n]{0,200}",
        boundary in "[a-z0-9]{1,10}",
        multipart in any::<bool>(),
    ) {
        let raw = if multipart {
            format!("Subject: {subject}\nContent-Type: multipart/alternative; boundary={boundary}\n\n--{boundary}\nContent-Type: text/plain\n\n{body}\n--{boundary}--\n")
        } else {
            format!("Subject: {subject}\n\n{body}\n")
        };
        let d = decompose(raw.as_bytes());
        prop_assert_eq!(d.subject.as_str(), subject.trim());
        prop_assert_eq!(d.html_body.as_str(), "");
    }
}
