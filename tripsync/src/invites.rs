use crate::{
    docstore::{self, now_ms},
    error::{Error, Result},
    events,
};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};
use tripsync_schema::{paths, Doc, Invite, InviteStatus, Member, Role};
use url::Url;
use uuid::Uuid;

/// Whether accepting an invite consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvitePolicy {
    #[default]
    SingleUse,
    MultiUse,
}

impl InvitePolicy {
    pub fn from_single_use(single_use: bool) -> Self {
        if single_use {
            InvitePolicy::SingleUse
        } else {
            InvitePolicy::MultiUse
        }
    }
}

/// Create a pending invite and return it. Inviting someone as owner is not allowed.
pub fn create_invite(conn: &Connection, event_id: &str, role: Option<Role>) -> Result<Doc<Invite>> {
    let role = role.unwrap_or_default();
    if role == Role::Owner {
        return Err(Error::validation("cannot invite as owner"));
    }
    events::get_event(conn, event_id)?;
    let token = Uuid::new_v4().to_string();
    let invite = Invite {
        token: token.clone(),
        role,
        status: InviteStatus::Pending,
        created_at: now_ms(),
        accepted_by: None,
        accepted_at: None,
    };
    docstore::set(conn, &paths::invite(event_id, &token), &invite)?;
    info!(event_id, %role, "invite created");
    Ok(Doc {
        id: token,
        data: invite,
    })
}

/// `<origin>/join/{token}?e={eventId}`
pub fn join_url(origin: &str, event_id: &str, token: &str) -> Result<String> {
    let mut url =
        Url::parse(origin).map_err(|e| Error::validation(format!("invalid origin: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| Error::validation("origin cannot be a base url"))?
        .pop_if_empty()
        .push("join")
        .push(token);
    url.query_pairs_mut().clear().append_pair("e", event_id);
    Ok(url.into())
}

pub fn get_invite_for_event(conn: &Connection, event_id: &str, token: &str) -> Result<Doc<Invite>> {
    docstore::require(conn, &paths::invite(event_id, token), "invite")
}

/// An invite found without knowing its event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatedInvite {
    pub event_id: String,
    #[serde(flatten)]
    pub invite: Doc<Invite>,
}

/// Look an invite up by token across all events.
pub fn find_invite_by_token(conn: &Connection, token: &str) -> Result<LocatedInvite> {
    let hits = docstore::collection_group::<Invite>(conn, "invites", Some(("token", token)))?;
    let (path, invite) = hits
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found("invite"))?;
    let event_id = paths::event_id_of(&path)
        .ok_or_else(|| Error::not_found("invite"))?
        .to_string();
    Ok(LocatedInvite { event_id, invite })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub event_id: String,
    pub role: Role,
    pub already: bool,
}

/// Accept an invite on behalf of `uid`.
///
/// The invite must be pending, except that the user who already accepted a
/// single-use invite gets `already: true` back when retrying. A user who is
/// already a member is never modified. The check and the membership write
/// happen in one transaction.
pub fn join_event_with_token(
    conn: &Connection,
    event_id: &str,
    token: &str,
    uid: &str,
    policy: InvitePolicy,
) -> Result<JoinOutcome> {
    let tx = docstore::write_tx(conn)?;
    let invite_path = paths::invite(event_id, token);
    let mut invite: Doc<Invite> = docstore::require(&tx, &invite_path, "invite")?;
    let member_path = paths::member(event_id, uid);
    let existing = docstore::get::<Member>(&tx, &member_path)?;

    let retried = invite.data.status == InviteStatus::Accepted
        && invite.data.accepted_by.as_deref() == Some(uid);
    if invite.data.status != InviteStatus::Pending && !(retried && existing.is_some()) {
        warn!(event_id, status = %invite.data.status, "join with unusable invite");
        return Err(Error::InvalidInvite(invite.data.status));
    }
    if let Some(member) = existing {
        return Ok(JoinOutcome {
            event_id: event_id.to_string(),
            role: member.data.role,
            already: true,
        });
    }

    let now = now_ms();
    let member = Member {
        user_id: uid.to_string(),
        role: invite.data.role,
        joined_at: now,
        invite_token: Some(token.to_string()),
    };
    docstore::set(&tx, &member_path, &member)?;
    if policy == InvitePolicy::SingleUse {
        invite.data.status = InviteStatus::Accepted;
        invite.data.accepted_by = Some(uid.to_string());
        invite.data.accepted_at = Some(now);
        docstore::set(&tx, &invite_path, &invite.data)?;
    }
    tx.commit()?;
    info!(event_id, uid, role = %member.role, "joined via invite");
    Ok(JoinOutcome {
        event_id: event_id.to_string(),
        role: member.role,
        already: false,
    })
}

/// Mark an invite expired. Later joins fail with `InvalidInvite`.
pub fn expire_invite(conn: &Connection, event_id: &str, token: &str) -> Result<Doc<Invite>> {
    let tx = docstore::write_tx(conn)?;
    let path = paths::invite(event_id, token);
    let mut invite: Doc<Invite> = docstore::require(&tx, &path, "invite")?;
    invite.data.status = InviteStatus::Expired;
    docstore::set(&tx, &path, &invite.data)?;
    tx.commit()?;
    Ok(invite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tripsync_schema::EventType;

    fn event(conn: &Connection) -> String {
        events::create_event(
            conn,
            "owner",
            &events::NewEvent {
                kind: EventType::Event,
                name: "Birthday Dinner".into(),
                cover_photo_url: None,
                start_date: Some("2025-11-02".into()),
                end_date: None,
                event_date: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn join_twice_is_idempotent() {
        let conn = db::init_db(":memory:").unwrap();
        let e = event(&conn);
        let invite = create_invite(&conn, &e, None).unwrap();
        assert_eq!(invite.data.role, Role::Editor);
        let first =
            join_event_with_token(&conn, &e, &invite.id, "u2", InvitePolicy::SingleUse).unwrap();
        assert!(!first.already);
        let second =
            join_event_with_token(&conn, &e, &invite.id, "u2", InvitePolicy::SingleUse).unwrap();
        assert!(second.already);
        assert_eq!(events::count_members(&conn, &e).unwrap(), 2);
        let member = events::get_member(&conn, &e, "u2").unwrap().unwrap();
        assert_eq!(member.data.invite_token.as_deref(), Some(invite.id.as_str()));
    }

    #[test]
    fn accepted_invite_cannot_be_reused() {
        let conn = db::init_db(":memory:").unwrap();
        let e = event(&conn);
        let invite = create_invite(&conn, &e, Some(Role::Viewer)).unwrap();
        join_event_with_token(&conn, &e, &invite.id, "u2", InvitePolicy::SingleUse).unwrap();
        let stored = get_invite_for_event(&conn, &e, &invite.id).unwrap();
        assert_eq!(stored.data.status, InviteStatus::Accepted);
        assert_eq!(stored.data.accepted_by.as_deref(), Some("u2"));
        let err = join_event_with_token(&conn, &e, &invite.id, "u3", InvitePolicy::SingleUse)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInvite(InviteStatus::Accepted)));
        assert!(events::get_member(&conn, &e, "u3").unwrap().is_none());
    }

    #[test]
    fn multi_use_invites_stay_pending() {
        let conn = db::init_db(":memory:").unwrap();
        let e = event(&conn);
        let invite = create_invite(&conn, &e, None).unwrap();
        for uid in ["a", "b", "c"] {
            join_event_with_token(&conn, &e, &invite.id, uid, InvitePolicy::MultiUse).unwrap();
        }
        assert_eq!(events::count_members(&conn, &e).unwrap(), 4);
        let stored = get_invite_for_event(&conn, &e, &invite.id).unwrap();
        assert_eq!(stored.data.status, InviteStatus::Pending);
    }

    #[test]
    fn expired_invite_is_rejected() {
        let conn = db::init_db(":memory:").unwrap();
        let e = event(&conn);
        let invite = create_invite(&conn, &e, None).unwrap();
        expire_invite(&conn, &e, &invite.id).unwrap();
        let err = join_event_with_token(&conn, &e, &invite.id, "u2", InvitePolicy::MultiUse)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInvite(InviteStatus::Expired)));
        assert_eq!(events::count_members(&conn, &e).unwrap(), 1);
    }

    #[test]
    fn unknown_token_and_owner_role() {
        let conn = db::init_db(":memory:").unwrap();
        let e = event(&conn);
        assert!(matches!(
            join_event_with_token(&conn, &e, "nope", "u2", InvitePolicy::SingleUse),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            create_invite(&conn, &e, Some(Role::Owner)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn lookup_by_token_finds_event() {
        let conn = db::init_db(":memory:").unwrap();
        let e = event(&conn);
        let invite = create_invite(&conn, &e, None).unwrap();
        let found = find_invite_by_token(&conn, &invite.id).unwrap();
        assert_eq!(found.event_id, e);
        assert_eq!(found.invite.data.status, InviteStatus::Pending);
        assert!(find_invite_by_token(&conn, "missing").is_err());
    }

    #[test]
    fn join_url_shape() {
        assert_eq!(
            join_url("https://fitlist.app", "e1", "t-1").unwrap(),
            "https://fitlist.app/join/t-1?e=e1"
        );
        assert_eq!(
            join_url("http://localhost:3000/", "e1", "t").unwrap(),
            "http://localhost:3000/join/t?e=e1"
        );
        assert!(join_url("not a url", "e", "t").is_err());
    }
}
