use crate::{
    dates,
    docstore::{self, now_ms},
    error::Result,
};
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::debug;
use tripsync_schema::{paths, Day};

/// Create day documents for every date in `[start, end]` that does not exist
/// yet, in a single transaction. Returns the ids that were written; a second
/// call over the same range returns an empty list. Existing days outside the
/// range are never removed.
pub fn ensure_days_for_range(
    conn: &Connection,
    event_id: &str,
    start: &str,
    end: &str,
) -> Result<Vec<String>> {
    let wanted = dates::days_between(start, end)?;
    let tx = docstore::write_tx(conn)?;
    let written = write_missing_days(&tx, event_id, &wanted)?;
    tx.commit()?;
    Ok(written)
}

/// Writes the subset of `wanted` that is missing. The caller owns the transaction.
pub(crate) fn write_missing_days(
    conn: &Connection,
    event_id: &str,
    wanted: &[String],
) -> Result<Vec<String>> {
    let have: HashSet<String> = docstore::list_ids(conn, &paths::days(event_id))?
        .into_iter()
        .collect();
    let now = now_ms();
    let mut written = Vec::new();
    for id in wanted.iter().filter(|id| !have.contains(*id)) {
        let day = Day {
            day_id: id.clone(),
            created_at: now,
        };
        if docstore::create(conn, &paths::day(event_id, id), &day)? {
            written.push(id.clone());
        }
    }
    debug!(event_id, written = written.len(), "days materialized");
    Ok(written)
}

/// Create a single day document if missing.
pub fn create_day(conn: &Connection, event_id: &str, day_id: &str) -> Result<bool> {
    dates::parse_day(day_id)?;
    let day = Day {
        day_id: day_id.to_string(),
        created_at: now_ms(),
    };
    docstore::create(conn, &paths::day(event_id, day_id), &day)
}

/// Day ids in ascending (chronological) order.
pub fn list_day_ids(conn: &Connection, event_id: &str) -> Result<Vec<String>> {
    let mut ids = docstore::list_ids(conn, &paths::days(event_id))?;
    ids.sort();
    Ok(ids)
}
