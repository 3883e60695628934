//! `mailsink`: a mail-capture sink.
//!
//! Accepted messages are decomposed into subject, plain-text and HTML
//! bodies, stored in SQLite with an FTS5 mirror kept in sync by triggers,
//! and retrieved newest-first by listing or by a Google-style search query.

pub mod config;
pub mod error;
pub mod forward;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod search;
pub mod store;
