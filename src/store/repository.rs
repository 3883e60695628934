//! The email repository: persistence and retrieval of [`StoredMessage`]s.
//!
//! Each `Repository` owns one SQLite connection. Concurrent workers open
//! their own repository on the same file; SQLite's locking (with a busy
//! timeout) serializes writers. Nothing is cached in-process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension as _, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{Result, SinkError};
use crate::model::mail::{NewMessage, StoredMessage};
use crate::parser::mime;
use crate::search::query::CompiledQuery;

use super::schema;

/// Upper bound on rows returned by one list or search call.
pub const MAX_LIMIT: usize = 100;

/// How long a writer waits for the database lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Storage format for timestamps. Queries order by `julianday(timestamp)`,
/// so rows written with `CURRENT_TIMESTAMP` sort by instant alongside these.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const SELECT_COLUMNS: &str =
    "e.id, e.from_addr, e.to_addr, e.subject, e.body, e.html, e.raw, e.timestamp";

/// A connection to the message store.
pub struct Repository {
    path: PathBuf,
    cxn: rusqlite::Connection,
}

impl Repository {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with an explicit lock wait for concurrent writers.
    pub fn open_with_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SinkError::io(parent, e))?;
        }

        let mut cxn = rusqlite::Connection::open(&path)?;
        cxn.busy_timeout(busy_timeout)?;
        cxn.pragma_update(None, "journal_mode", "WAL")?;
        cxn.pragma_update(None, "synchronous", "NORMAL")?;
        schema::apply_migrations(&mut cxn)?;

        debug!(path = %path.display(), "Opened message store");
        Ok(Self { path, cxn })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist one message and return its identity.
    ///
    /// The index mirror is updated by the insert trigger inside the same
    /// transaction.
    pub fn insert(&mut self, message: &NewMessage) -> Result<i64> {
        let timestamp = format_timestamp(message.received_at.unwrap_or_else(Utc::now));

        let txn = self
            .cxn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        txn.execute(
            "INSERT INTO emails (from_addr, to_addr, subject, body, html, raw, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.from,
                message.to,
                message.subject,
                message.body,
                message.html,
                message.raw,
                timestamp,
            ],
        )?;
        let id = txn.last_insert_rowid();
        txn.commit()?;

        debug!(id, "Inserted email");
        Ok(id)
    }

    /// Most recent messages, newest first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<StoredMessage>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM emails e \
             ORDER BY julianday(e.timestamp) DESC, e.id DESC LIMIT ?1"
        );
        let mut stmt = self.cxn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![clamp_limit(limit)], from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Messages matching a compiled query, newest first.
    pub fn search(&self, query: &CompiledQuery, limit: usize) -> Result<Vec<StoredMessage>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM emails e \
             JOIN emails_fts ON e.id = emails_fts.rowid \
             WHERE emails_fts MATCH ?1 \
             ORDER BY julianday(e.timestamp) DESC, e.id DESC LIMIT ?2"
        );
        let mut stmt = self.cxn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![query.as_str(), clamp_limit(limit)], from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// A single message by identity.
    pub fn get(&self, id: i64) -> Result<StoredMessage> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM emails e WHERE e.id = ?1");
        self.cxn
            .prepare_cached(&sql)?
            .query_row(params![id], from_row)
            .optional()?
            .ok_or(SinkError::NotFound(id))
    }

    /// Remove a message; the delete trigger drops its index entry.
    pub fn delete(&mut self, id: i64) -> Result<()> {
        let removed = self.cxn.execute("DELETE FROM emails WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(SinkError::NotFound(id));
        }
        info!(id, "Deleted email");
        Ok(())
    }

    /// Recompute subject and bodies from the stored raw source.
    ///
    /// This is the only update path; the update trigger re-indexes the row.
    pub fn rederive(&mut self, id: i64) -> Result<StoredMessage> {
        let txn = self
            .cxn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw: Option<String> = txn
            .query_row(
                "SELECT COALESCE(raw, '') FROM emails WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or(SinkError::NotFound(id))?;

        let parts = mime::decompose(raw.as_bytes());
        txn.execute(
            "UPDATE emails SET subject = ?1, body = ?2, html = ?3 WHERE id = ?4",
            params![parts.subject, parts.plain_body, parts.html_body, id],
        )?;
        txn.commit()?;

        info!(id, "Re-derived email fields from raw source");
        self.get(id)
    }

    /// Number of stored messages.
    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .cxn
            .query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

fn clamp_limit(limit: usize) -> i64 {
    limit.clamp(1, MAX_LIMIT) as i64
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Read a timestamp written by us, by `CURRENT_TIMESTAMP`, or as RFC 3339.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };

    let raw_ts = text(7)?;
    let timestamp = parse_timestamp(&raw_ts).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Text,
            Box::new(SinkError::InvalidTimestamp(raw_ts.clone())),
        )
    })?;

    Ok(StoredMessage::from_columns(
        row.get(0)?,
        text(1)?,
        text(2)?,
        text(3)?,
        text(4)?,
        text(5)?,
        text(6)?,
        timestamp,
    ))
}
