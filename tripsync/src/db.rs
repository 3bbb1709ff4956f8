use crate::error::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::{path::Path, time::Duration};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open a single connection and run migrations. Used by tests with `:memory:`.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Build a connection pool over a database file, migrating every new connection.
pub fn open_pool<P: AsRef<Path>>(path: P, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| configure(conn));
    let pool = Pool::builder().max_size(max_size).build(manager)?;
    Ok(pool)
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch(SCHEMA)
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  path TEXT UNIQUE NOT NULL,
  collection TEXT NOT NULL,
  collection_group TEXT NOT NULL,
  id TEXT NOT NULL,
  data TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS documents_by_collection
  ON documents(collection, created_at);
CREATE INDEX IF NOT EXISTS documents_by_group
  ON documents(collection_group, id);

CREATE TABLE IF NOT EXISTS auth_claims (
  uid TEXT PRIMARY KEY,
  claims TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#;
