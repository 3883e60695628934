//! Message store: SQLite tables, the FTS5 index mirror, and the repository.

pub mod repository;
pub mod schema;
