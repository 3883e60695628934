//! Ingestion pipeline: decompose an accepted message, store it, and hand a
//! copy to the forwarder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, SinkError};
use crate::forward::Forwarder;
use crate::model::mail::{Envelope, NewMessage};
use crate::parser::header::{self, Headers};
use crate::store::repository::Repository;

/// Stores messages delivered by the mail receiver.
///
/// One `Ingestor` per concurrent session; each owns its repository
/// connection, while the forwarder may be shared.
pub struct Ingestor {
    repo: Repository,
    forwarder: Option<Arc<dyn Forwarder>>,
}

impl Ingestor {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            forwarder: None,
        }
    }

    pub fn with_forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Store one message and return its identity.
    ///
    /// Decomposition never fails; only storage errors are returned.
    /// Forwarding happens after the message is safely stored and its
    /// failure is logged, not returned.
    pub fn ingest(&mut self, envelope: &Envelope) -> Result<i64> {
        let message = NewMessage::from_envelope(envelope);
        let id = self.repo.insert(&message)?;

        info!(
            id,
            from = %envelope.sender,
            to = %message.to,
            "Email received"
        );

        if let Some(forwarder) = &self.forwarder {
            match forwarder.forward(envelope) {
                Ok(()) => info!(id, target = %forwarder.describe(), "Email forwarded"),
                Err(e) => warn!(id, error = %e, "Failed to forward email"),
            }
        }

        Ok(id)
    }
}

/// Build an envelope from a message's own `From`/`To`/`Cc` headers.
///
/// Used when importing saved `.eml` files, which carry no SMTP envelope.
/// Returns `None` when the header block is unreadable or names no recipient.
pub fn envelope_from_headers(raw: Vec<u8>) -> Option<Envelope> {
    let text = header::decode_text(&raw);
    let (block, _) = header::split_at_blank_line(&text)?;
    let headers = Headers::parse(block).ok()?;

    let sender = headers
        .get("from")
        .and_then(|v| header::addresses(v).into_iter().next())
        .unwrap_or_default();
    let recipients: Vec<String> = ["to", "cc"]
        .iter()
        .filter_map(|name| headers.get(name))
        .flat_map(header::addresses)
        .collect();

    if recipients.is_empty() {
        return None;
    }
    Some(Envelope::new(sender, recipients, raw))
}

/// Outcome of a directory import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: usize,
    pub skipped: Vec<PathBuf>,
}

/// List the `.eml` files in a directory, sorted by name.
pub fn eml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| SinkError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| SinkError::io(dir, e))?.path();
        let is_eml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"));
        if is_eml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Ingest every `.eml` file in `dir`, taking envelopes from the headers.
///
/// Files whose envelope cannot be determined are skipped and reported.
/// The progress callback receives `(current, total)`.
pub fn import_dir(
    ingestor: &mut Ingestor,
    dir: &Path,
    progress: &dyn Fn(usize, usize),
) -> Result<ImportStats> {
    let files = eml_files(dir)?;
    let total = files.len();
    let mut stats = ImportStats::default();

    for (i, path) in files.into_iter().enumerate() {
        progress(i, total);
        let raw = std::fs::read(&path).map_err(|e| SinkError::io(&path, e))?;
        match envelope_from_headers(raw) {
            Some(envelope) => {
                ingestor.ingest(&envelope)?;
                stats.imported += 1;
            }
            None => {
                warn!(path = %path.display(), "No usable envelope in headers, skipping");
                stats.skipped.push(path);
            }
        }
    }
    progress(total, total);

    Ok(stats)
}
