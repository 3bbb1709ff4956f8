use crate::{
    error::{Error, Result},
    events,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use time::{Duration, OffsetDateTime};
use tracing::info;
use tripsync_schema::Role;

const SECRET_FILE: &str = "jwt.secret";

/// Claims stored within issued JWTs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    /// Events the subject belonged to when the token was issued.
    #[serde(default)]
    pub events: BTreeMap<String, bool>,
}

impl Claims {
    pub fn has_event(&self, event_id: &str) -> bool {
        self.events.get(event_id).copied().unwrap_or(false)
    }
}

/// Issue a JWT for a subject and its event claims, valid for the provided duration.
pub fn issue_jwt(
    secret: &[u8],
    sub: &str,
    events: BTreeMap<String, bool>,
    valid_for: Duration,
) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp().max(0) as usize;
    let claims = Claims {
        sub: sub.into(),
        exp,
        events,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}

/// Determine if a token should be refreshed given a threshold duration.
pub fn needs_refresh(claims: &Claims, within: Duration) -> bool {
    match OffsetDateTime::from_unix_timestamp(claims.exp as i64) {
        Ok(expire) => expire - OffsetDateTime::now_utc() < within,
        Err(_) => true,
    }
}

/// Resolve the token signing secret: the configured base64 value if any,
/// otherwise `jwt.secret` under the data directory, generated on first run.
pub async fn load_or_create_secret(data_dir: &Path, configured: Option<&str>) -> Result<Vec<u8>> {
    if let Some(encoded) = configured {
        return STANDARD
            .decode(encoded.trim())
            .map_err(|_| Error::validation("jwt secret is not valid base64"));
    }
    let path = data_dir.join(SECRET_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|_| Error::validation(format!("{} is not valid base64", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut secret = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            tokio::fs::create_dir_all(data_dir).await?;
            tokio::fs::write(&path, STANDARD.encode(&secret)).await?;
            info!(path = %path.display(), "generated token secret");
            Ok(secret)
        }
        Err(e) => Err(e.into()),
    }
}

/// Read access to an event: the token's claims first, then the membership
/// document for members whose claims have not caught up yet. A token claim
/// only counts while the recorded claims still list the event, so removal
/// revokes access before the token expires.
pub fn authorize_event(conn: &Connection, claims: &Claims, event_id: &str) -> Result<()> {
    events::get_event(conn, event_id)?;
    let claimed = claims.has_event(event_id)
        && crate::claims::get_claims(conn, &claims.sub)?.contains_key(event_id);
    if claimed || events::get_member(conn, event_id, &claims.sub)?.is_some() {
        return Ok(());
    }
    Err(Error::denied("not a member of this event"))
}

/// The caller's role in an event, which must satisfy `allowed`.
pub fn require_role(
    conn: &Connection,
    event_id: &str,
    uid: &str,
    allowed: impl Fn(Role) -> bool,
) -> Result<Role> {
    events::get_event(conn, event_id)?;
    let member = events::get_member(conn, event_id, uid)?
        .ok_or_else(|| Error::denied("not a member of this event"))?;
    if !allowed(member.data.role) {
        return Err(Error::denied(format!(
            "role {} may not do this",
            member.data.role
        )));
    }
    Ok(member.data.role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{claims::MemberChange, db};
    use tripsync_schema::EventType;

    #[test]
    fn jwt_issue_and_verify() {
        let secret = b"secret";
        let events = BTreeMap::from([("e1".to_string(), true)]);
        let token = issue_jwt(secret, "user", events, Duration::seconds(60)).unwrap();
        let claims = verify_jwt(secret, &token).unwrap();
        assert_eq!(claims.sub, "user");
        assert!(claims.has_event("e1"));
        assert!(!claims.has_event("e2"));
        assert!(verify_jwt(b"other", &token).is_err());
    }

    #[test]
    fn jwt_expiry() {
        let secret = b"secret";
        let token = issue_jwt(secret, "user", BTreeMap::new(), Duration::seconds(-10)).unwrap();
        assert!(matches!(verify_jwt(secret, &token), Err(Error::Token(_))));
    }

    #[test]
    fn refresh_logic() {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: "a".into(),
            exp: (now + Duration::minutes(5)).unix_timestamp() as usize,
            events: BTreeMap::new(),
        };
        assert!(needs_refresh(&claims, Duration::hours(1)));
        assert!(!needs_refresh(&claims, Duration::minutes(1)));
    }

    #[tokio::test]
    async fn secret_is_generated_once() {
        let tmp = tempfile::tempdir().unwrap();
        let first = load_or_create_secret(tmp.path(), None).await.unwrap();
        let second = load_or_create_secret(tmp.path(), None).await.unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
        let configured = load_or_create_secret(tmp.path(), Some("c2VjcmV0")).await.unwrap();
        assert_eq!(configured, b"secret");
        assert!(load_or_create_secret(tmp.path(), Some("***")).await.is_err());
    }

    #[test]
    fn membership_falls_back_to_document() {
        let conn = db::init_db(":memory:").unwrap();
        let e = events::create_event(
            &conn,
            "owner",
            &events::NewEvent {
                kind: EventType::Event,
                name: "Brunch".into(),
                cover_photo_url: None,
                start_date: None,
                end_date: None,
                event_date: Some("2025-03-03".into()),
            },
        )
        .unwrap();
        let claims = |sub: &str| Claims {
            sub: sub.into(),
            exp: usize::MAX,
            events: BTreeMap::new(),
        };
        assert!(authorize_event(&conn, &claims("owner"), &e).is_ok());
        assert!(matches!(
            authorize_event(&conn, &claims("stranger"), &e),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            authorize_event(&conn, &claims("owner"), "missing"),
            Err(Error::NotFound(_))
        ));
        events::add_member(&conn, &e, "v", Role::Viewer).unwrap();
        let mut token = claims("v");
        token.events.insert(e.clone(), true);
        crate::claims::apply_member_change(&conn, &MemberChange::joined(&e, "v")).unwrap();
        assert!(authorize_event(&conn, &token, &e).is_ok());
        events::remove_member(&conn, &e, "v").unwrap();
        crate::claims::apply_member_change(&conn, &MemberChange::left(&e, "v")).unwrap();
        assert!(matches!(
            authorize_event(&conn, &token, &e),
            Err(Error::PermissionDenied(_))
        ));
        events::add_member(&conn, &e, "v", Role::Viewer).unwrap();
        assert!(require_role(&conn, &e, "v", |r| r.can_contribute()).is_err());
        assert_eq!(
            require_role(&conn, &e, "owner", |r| r.can_manage()).unwrap(),
            Role::Owner
        );
    }
}
