//! Hierarchical document store on SQLite.
//!
//! Every record lives at a slash-separated path (`events/{id}/members/{uid}`)
//! and carries a JSON payload. A document's collection is its path minus the
//! last segment, and its collection group is the last segment of that
//! collection (`members`), which is what cross-event queries filter on.
//! Payloads are decoded into typed records on read; a payload that does not
//! fit its record type is reported as [`Error::Malformed`].

use crate::error::{Error, Result};
use rand::{distributions::Alphanumeric, Rng};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tripsync_schema::Doc;

/// Ordering for collection listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    NewestFirst,
    OldestFirst,
    ById,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Order::NewestFirst => "created_at DESC, seq DESC",
            Order::OldestFirst => "created_at ASC, seq ASC",
            Order::ById => "id ASC",
        }
    }
}

/// Milliseconds since the epoch; the server-assigned timestamp for writes.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Generate a 20 character document id.
pub fn auto_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

/// Begin a write transaction that takes the database write lock up front, so
/// read-then-write sequences inside it cannot interleave with other writers.
pub fn write_tx(conn: &Connection) -> Result<Transaction<'_>> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

struct Location<'a> {
    collection: &'a str,
    group: &'a str,
    id: &'a str,
}

fn locate(path: &str) -> Result<Location<'_>> {
    let (collection, id) = path
        .rsplit_once('/')
        .ok_or_else(|| Error::validation(format!("invalid document path {path}")))?;
    let group = collection.rsplit('/').next().unwrap_or(collection);
    if id.is_empty() || collection.is_empty() || path.split('/').any(str::is_empty) {
        return Err(Error::validation(format!("invalid document path {path}")));
    }
    Ok(Location {
        collection,
        group,
        id,
    })
}

fn decode<T: DeserializeOwned>(path: &str, id: String, raw: &str) -> Result<Doc<T>> {
    let data = serde_json::from_str(raw).map_err(|e| Error::Malformed {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Doc { id, data })
}

/// Read and decode one document.
pub fn get<T: DeserializeOwned>(conn: &Connection, path: &str) -> Result<Option<Doc<T>>> {
    let mut stmt = conn.prepare("SELECT id, data FROM documents WHERE path = ?1")?;
    let row: Option<(String, String)> = stmt
        .query_row([path], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    row.map(|(id, raw)| decode(path, id, &raw)).transpose()
}

/// Read a document, failing with `NotFound(what)` when it is absent.
pub fn require<T: DeserializeOwned>(conn: &Connection, path: &str, what: &str) -> Result<Doc<T>> {
    get(conn, path)?.ok_or_else(|| Error::not_found(what))
}

pub fn exists(conn: &Connection, path: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM documents WHERE path = ?1")?;
    let found: Option<i64> = stmt.query_row([path], |row| row.get(0)).optional()?;
    Ok(found.is_some())
}

/// Write a document, replacing any existing payload.
pub fn set<T: Serialize>(conn: &Connection, path: &str, value: &T) -> Result<()> {
    let loc = locate(path)?;
    let data = serde_json::to_string(value)?;
    let now = now_ms();
    conn.execute(
        "INSERT INTO documents (path, collection, collection_group, id, data, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
         ON CONFLICT(path) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![path, loc.collection, loc.group, loc.id, data, now],
    )?;
    Ok(())
}

/// Write a document only if nothing exists at `path`. Returns whether it was written.
pub fn create<T: Serialize>(conn: &Connection, path: &str, value: &T) -> Result<bool> {
    let loc = locate(path)?;
    let data = serde_json::to_string(value)?;
    let now = now_ms();
    let changed = conn.execute(
        "INSERT INTO documents (path, collection, collection_group, id, data, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) ON CONFLICT(path) DO NOTHING",
        params![path, loc.collection, loc.group, loc.id, data, now],
    )?;
    Ok(changed == 1)
}

/// Append a document with a generated id to `collection`.
pub fn add<T: Serialize>(conn: &Connection, collection: &str, value: &T) -> Result<String> {
    loop {
        let id = auto_id();
        if create(conn, &format!("{collection}/{id}"), value)? {
            return Ok(id);
        }
    }
}

/// Shallow-merge the fields of `patch` into the document, creating it if absent.
pub fn merge(conn: &Connection, path: &str, patch: Value) -> Result<()> {
    let Value::Object(fields) = patch else {
        return Err(Error::validation("merge patch must be an object"));
    };
    let mut current = match get::<Value>(conn, path)? {
        Some(Doc {
            data: Value::Object(map),
            ..
        }) => map,
        Some(_) => {
            return Err(Error::Malformed {
                path: path.to_string(),
                reason: "payload is not an object".into(),
            })
        }
        None => serde_json::Map::new(),
    };
    current.extend(fields);
    set(conn, path, &Value::Object(current))
}

/// Remove a document. Sub-collections are left in place.
pub fn delete(conn: &Connection, path: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM documents WHERE path = ?1", [path])?;
    Ok(changed == 1)
}

/// Decode every document of a collection.
pub fn list<T: DeserializeOwned>(
    conn: &Connection,
    collection: &str,
    order: Order,
) -> Result<Vec<Doc<T>>> {
    let sql = format!(
        "SELECT path, id, data FROM documents WHERE collection = ?1 ORDER BY {}",
        order.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(path, id, raw)| decode(&path, id, &raw))
        .collect()
}

/// Ids of a collection in ascending order.
pub fn list_ids(conn: &Connection, collection: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT id FROM documents WHERE collection = ?1 ORDER BY id ASC")?;
    let ids = stmt
        .query_map([collection], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn count(conn: &Connection, collection: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE collection = ?1",
        [collection],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Documents of every collection named `group` whose top-level `field`
/// equals the given value, with their full paths. `filter: None` matches all.
pub fn collection_group<T: DeserializeOwned>(
    conn: &Connection,
    group: &str,
    filter: Option<(&str, &str)>,
) -> Result<Vec<(String, Doc<T>)>> {
    let rows = match filter {
        Some((field, value)) => {
            let mut stmt = conn.prepare(
                "SELECT path, id, data FROM documents \
                 WHERE collection_group = ?1 AND json_extract(data, ?2) = ?3 ORDER BY seq ASC",
            )?;
            let json_path = format!("$.{field}");
            let rows = stmt
                .query_map(params![group, json_path, value], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<(String, String, String)>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT path, id, data FROM documents WHERE collection_group = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt
                .query_map([group], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<Result<Vec<(String, String, String)>, _>>()?;
            rows
        }
    };
    rows.into_iter()
        .map(|(path, id, raw)| {
            let doc = decode(&path, id, &raw)?;
            Ok((path, doc))
        })
        .collect()
}
