//! Search: query compilation and the query service that picks between the
//! chronological scan and the full-text index.

pub mod query;

use tracing::debug;

use crate::error::Result;
use crate::model::mail::StoredMessage;
use crate::store::repository::Repository;

use self::query::compile;

/// Answer a search request.
///
/// An absent or blank query means "no filter": the most recent messages are
/// returned. Anything else is compiled and matched against the index; a
/// query that fails compilation is rejected with `SinkError::InvalidQuery`.
pub fn execute(
    repo: &Repository,
    query: Option<&str>,
    limit: usize,
) -> Result<Vec<StoredMessage>> {
    let Some(raw) = query.map(str::trim).filter(|q| !q.is_empty()) else {
        return repo.list_recent(limit);
    };

    let compiled = compile(raw)?;
    debug!(query = raw, fts = %compiled, "Compiled search query");
    repo.search(&compiled, limit)
}
