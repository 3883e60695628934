//! Forwarding collaborators: where a copy of each accepted message goes after
//! it has been stored.
//!
//! Relaying over SMTP is left to external tooling; the built-in
//! [`SpoolForwarder`] drops each message into a directory as an `.eml` file,
//! which such tooling (or a human) can pick up.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::debug;

use crate::error::{Result, SinkError};
use crate::model::mail::Envelope;

/// Receives the original bytes of every ingested message.
pub trait Forwarder: Send + Sync {
    fn forward(&self, envelope: &Envelope) -> Result<()>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// Writes each message, unchanged, to `<dir>/<time>_<sender>_<n>.eml`.
pub struct SpoolForwarder {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SpoolForwarder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&self, envelope: &Envelope) -> String {
        let time = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let sender = sanitize_filename_part(&envelope.sender, 40);
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{time}_{sender}_{n}.eml")
    }
}

impl Forwarder for SpoolForwarder {
    fn forward(&self, envelope: &Envelope) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SinkError::io(&self.dir, e))?;
        let path = self.dir.join(self.file_name(envelope));
        std::fs::write(&path, &envelope.raw).map_err(|e| SinkError::io(&path, e))?;
        debug!(path = %path.display(), "Spooled message");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("spool directory {}", self.dir.display())
    }
}

/// Make a string safe for use in a file name.
///
/// Keeps alphanumerics and `-._@`, replaces everything else with `_`, and
/// truncates to `max_len` characters.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .take(max_len)
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}
