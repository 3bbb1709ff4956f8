//! Per-user event claims, kept in sync with membership documents.
//!
//! Membership writes publish a [`MemberChange`] on a broadcast channel; the
//! sync task applies each change to the `auth_claims` table. Claims are
//! eventually consistent: readers fall back to the membership document.

use crate::{
    db::DbPool,
    docstore::{self, now_ms},
    error::Result,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};
use tripsync_schema::{Doc, Member};

/// A membership document was written (`exists`) or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberChange {
    pub event_id: String,
    pub uid: String,
    pub exists: bool,
}

impl MemberChange {
    pub fn joined(event_id: &str, uid: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            uid: uid.to_string(),
            exists: true,
        }
    }

    pub fn left(event_id: &str, uid: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            uid: uid.to_string(),
            exists: false,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredClaims {
    #[serde(default)]
    events: BTreeMap<String, bool>,
}

fn read(conn: &Connection, uid: &str) -> Result<StoredClaims> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT claims FROM auth_claims WHERE uid = ?1",
            [uid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match raw {
        Some(raw) => serde_json::from_str(&raw)?,
        None => StoredClaims::default(),
    })
}

fn write(conn: &Connection, uid: &str, claims: &StoredClaims) -> Result<()> {
    conn.execute(
        "INSERT INTO auth_claims (uid, claims, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(uid) DO UPDATE SET claims = excluded.claims, updated_at = excluded.updated_at",
        params![uid, serde_json::to_string(claims)?, now_ms()],
    )?;
    Ok(())
}

/// Set or clear `events[event_id]` for the user.
pub fn apply_member_change(conn: &Connection, change: &MemberChange) -> Result<()> {
    let tx = docstore::write_tx(conn)?;
    let mut claims = read(&tx, &change.uid)?;
    if change.exists {
        claims.events.insert(change.event_id.clone(), true);
    } else {
        claims.events.remove(&change.event_id);
    }
    write(&tx, &change.uid, &claims)?;
    tx.commit()?;
    debug!(uid = %change.uid, event_id = %change.event_id, exists = change.exists, "claims updated");
    Ok(())
}

pub fn get_claims(conn: &Connection, uid: &str) -> Result<BTreeMap<String, bool>> {
    Ok(read(conn, uid)?.events)
}

/// Recompute every user's claims from the membership documents. Returns the
/// number of users with claims.
pub fn rebuild_all(conn: &Connection) -> Result<usize> {
    let tx = docstore::write_tx(conn)?;
    let members = docstore::collection_group::<Member>(&tx, "members", None)?;
    let mut by_user: BTreeMap<String, StoredClaims> = BTreeMap::new();
    for (path, Doc { id: uid, .. }) in members {
        if let Some(event_id) = tripsync_schema::paths::event_id_of(&path) {
            by_user
                .entry(uid)
                .or_default()
                .events
                .insert(event_id.to_string(), true);
        }
    }
    tx.execute("DELETE FROM auth_claims", [])?;
    for (uid, claims) in &by_user {
        write(&tx, uid, claims)?;
    }
    tx.commit()?;
    Ok(by_user.len())
}

/// Run the sync worker until every sender is dropped.
pub fn spawn_sync(pool: DbPool, mut rx: broadcast::Receiver<MemberChange>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let pool = pool.clone();
            let outcome = match rx.recv().await {
                Ok(change) => {
                    tokio::task::spawn_blocking(move || -> Result<()> {
                        let conn = pool.get()?;
                        apply_member_change(&conn, &change)
                    })
                    .await
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "claims sync lagged; rebuilding");
                    tokio::task::spawn_blocking(move || -> Result<()> {
                        let conn = pool.get()?;
                        let users = rebuild_all(&conn)?;
                        info!(users, "claims rebuilt");
                        Ok(())
                    })
                    .await
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "claims sync failed"),
                Err(e) => error!(error = %e, "claims sync task panicked"),
            }
        }
        debug!("claims sync stopped");
    })
}
