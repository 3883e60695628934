//! SQLite schema for the message store and its FTS5 mirror.
//!
//! The `emails` table and the `emails_fts` external-content index are the
//! on-disk contract other tools read directly. The index is maintained by
//! triggers only; application code never writes to `emails_fts`.

use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

/// Ordered migrations; `PRAGMA user_version` records how many have run.
static MIGRATIONS: &[&str] = &[V1_SCHEMA, V2_RECEIVED_ORDER];

const V1_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS emails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_addr TEXT NOT NULL,
    to_addr TEXT NOT NULL,
    subject TEXT,
    body TEXT,
    html TEXT,
    raw TEXT,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS emails_timestamp ON emails (timestamp DESC, id DESC);

CREATE VIRTUAL TABLE IF NOT EXISTS emails_fts USING fts5(
    subject, body, from_addr, to_addr,
    content=emails,
    content_rowid=id
);

-- External-content FTS5 tables must be told the old values on delete;
-- databases created by earlier tooling may carry triggers that do not.
DROP TRIGGER IF EXISTS emails_ai;
DROP TRIGGER IF EXISTS emails_ad;
DROP TRIGGER IF EXISTS emails_au;

CREATE TRIGGER emails_ai AFTER INSERT ON emails BEGIN
    INSERT INTO emails_fts(rowid, subject, body, from_addr, to_addr)
    VALUES (new.id, new.subject, new.body, new.from_addr, new.to_addr);
END;

CREATE TRIGGER emails_ad AFTER DELETE ON emails BEGIN
    INSERT INTO emails_fts(emails_fts, rowid, subject, body, from_addr, to_addr)
    VALUES ('delete', old.id, old.subject, old.body, old.from_addr, old.to_addr);
END;

CREATE TRIGGER emails_au AFTER UPDATE ON emails BEGIN
    INSERT INTO emails_fts(emails_fts, rowid, subject, body, from_addr, to_addr)
    VALUES ('delete', old.id, old.subject, old.body, old.from_addr, old.to_addr);
    INSERT INTO emails_fts(rowid, subject, body, from_addr, to_addr)
    VALUES (new.id, new.subject, new.body, new.from_addr, new.to_addr);
END;

INSERT INTO emails_fts(emails_fts) VALUES ('rebuild');
";

/// Rows are ordered by the instant they denote, so `...:SS` written by
/// `CURRENT_TIMESTAMP` ties with `...:SS.000` written by us.
const V2_RECEIVED_ORDER: &str = "
DROP INDEX IF EXISTS emails_timestamp;
CREATE INDEX IF NOT EXISTS emails_received ON emails (julianday(timestamp) DESC, id DESC);
";

/// Bring the database up to the latest schema version.
///
/// Runs inside an exclusive transaction so concurrent openers do not race.
pub fn apply_migrations(cxn: &mut Connection) -> rusqlite::Result<()> {
    let latest = MIGRATIONS.len();
    let current: usize = cxn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= latest {
        return Ok(());
    }

    let txn = cxn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    // Re-read under the lock: another connection may have migrated meanwhile.
    let current: usize = txn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (version, migration) in MIGRATIONS
        .iter()
        .copied()
        .enumerate()
        .map(|(ix, migration)| (ix + 1, migration))
        .skip(current)
    {
        info!(version, "Applying schema migration");
        txn.execute_batch(migration)?;
        txn.pragma_update(None, "user_version", version)?;
    }

    txn.commit()
}
