//! Centralized error types for mailsink.

use std::path::PathBuf;
use thiserror::Error;

/// Rejection reasons produced by the search query compiler.
///
/// This is the only error kind the compiler ever returns; callers surface it
/// to the user as a rejected request rather than rewriting the query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A `"` opened a phrase that was never closed.
    #[error("unterminated quote starting at position {position}")]
    UnterminatedQuote { position: usize },

    /// Nothing searchable remained after tokenization.
    #[error("query contains no searchable terms")]
    NoTerms,

    /// Every term was an exclusion; the index cannot match "everything except".
    #[error("query needs at least one term that is not excluded")]
    OnlyExclusions,
}

/// All errors produced by the mailsink library.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Any failure reported by SQLite (connection, constraint, disk, FTS syntax).
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// No stored message has this identity.
    #[error("email {0} not found")]
    NotFound(i64),

    /// The search string failed compilation.
    #[error("invalid search query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Handing a message to the forwarding collaborator failed.
    #[error("forwarding failed: {0}")]
    Forward(String),

    /// A stored timestamp could not be read back.
    #[error("unreadable timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Convenience alias for `Result<T, SinkError>`.
pub type Result<T> = std::result::Result<T, SinkError>;

impl SinkError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means "absent" rather than "broken".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
