use crate::{
    docstore::{self, now_ms},
    error::{Error, Result},
};
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::BTreeMap;
use tripsync_schema::{paths, Doc, UserProfile};

/// Name shown for users without a profile or display name.
pub const FALLBACK_NAME: &str = "Friend";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
}

/// Up to two upper-cased letters, one from the start of each word of the
/// display name, or of the email when there is no display name.
pub fn initials(display_name: Option<&str>, email: &str) -> String {
    let base = display_name.filter(|d| !d.trim().is_empty()).unwrap_or(email);
    let mut out = String::new();
    let mut in_word = false;
    for c in base.chars() {
        let word_char = c.is_alphanumeric() || c == '_';
        if word_char && !in_word {
            out.extend(c.to_uppercase());
            if out.chars().count() == 2 {
                break;
            }
        }
        in_word = word_char;
    }
    out
}

fn non_blank(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Create or update `users/{uid}`. Creation requires an email; `createdAt`
/// is kept on later updates.
pub fn upsert_profile(
    conn: &Connection,
    uid: &str,
    update: &ProfileUpdate,
) -> Result<Doc<UserProfile>> {
    let path = paths::user(uid);
    let tx = docstore::write_tx(conn)?;
    let existing = docstore::get::<UserProfile>(&tx, &path)?.map(|d| d.data);
    let now = now_ms();

    let first_name = non_blank(&update.first_name)
        .or_else(|| existing.as_ref().and_then(|p| p.first_name.clone()));
    let last_name = non_blank(&update.last_name)
        .or_else(|| existing.as_ref().and_then(|p| p.last_name.clone()));
    let composed = [first_name.as_deref(), last_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let names_changed = update.first_name.is_some() || update.last_name.is_some();
    let display_name = non_blank(&update.display_name)
        .or_else(|| names_changed.then_some(composed))
        .filter(|d| !d.is_empty())
        .or_else(|| existing.as_ref().and_then(|p| p.display_name.clone()));
    let email = match (non_blank(&update.email), &existing) {
        (Some(email), _) => email,
        (None, Some(p)) => p.email.clone(),
        (None, None) => return Err(Error::validation("email is required")),
    };

    let profile = UserProfile {
        initials: initials(display_name.as_deref(), &email),
        first_name,
        last_name,
        display_name,
        email,
        photo_url: non_blank(&update.photo_url)
            .or_else(|| existing.as_ref().and_then(|p| p.photo_url.clone())),
        created_at: existing.as_ref().map_or(now, |p| p.created_at),
        updated_at: now,
    };
    docstore::set(&tx, &path, &profile)?;
    tx.commit()?;
    Ok(Doc {
        id: uid.to_string(),
        data: profile,
    })
}

pub fn get_profile(conn: &Connection, uid: &str) -> Result<Doc<UserProfile>> {
    docstore::require(conn, &paths::user(uid), "profile")
}

/// Point the profile at a new avatar. Returns the previous avatar URL.
pub fn set_photo_url(conn: &Connection, uid: &str, url: &str) -> Result<Option<String>> {
    let path = paths::user(uid);
    let tx = docstore::write_tx(conn)?;
    let mut profile: Doc<UserProfile> = docstore::require(&tx, &path, "profile")?;
    let previous = profile.data.photo_url.replace(url.to_string());
    profile.data.updated_at = now_ms();
    docstore::set(&tx, &path, &profile.data)?;
    tx.commit()?;
    Ok(previous)
}

/// Display name per uid, falling back to [`FALLBACK_NAME`].
pub fn display_names(conn: &Connection, uids: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for uid in uids {
        let name = docstore::get::<UserProfile>(conn, &paths::user(uid))?
            .and_then(|p| p.data.display_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| FALLBACK_NAME.to_string());
        out.insert(uid.clone(), name);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn initials_from_name_or_email() {
        assert_eq!(initials(Some("ana maria lopez"), "x@y.z"), "AM");
        assert_eq!(initials(None, "sam@example.com"), "SE");
        assert_eq!(initials(Some("  "), "zoe@example.com"), "ZE");
        assert_eq!(initials(Some("Ö"), "x@y.z"), "Ö");
    }

    #[test]
    fn upsert_keeps_created_at_and_composes_name() {
        let conn = db::init_db(":memory:").unwrap();
        let first = upsert_profile(
            &conn,
            "u1",
            &ProfileUpdate {
                first_name: Some("Ana".into()),
                last_name: Some("Lopez".into()),
                email: Some("ana@example.com".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(first.data.display_name.as_deref(), Some("Ana Lopez"));
        assert_eq!(first.data.initials, "AL");
        let second = upsert_profile(
            &conn,
            "u1",
            &ProfileUpdate {
                display_name: Some("Annie".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(second.data.created_at, first.data.created_at);
        assert_eq!(second.data.email, "ana@example.com");
        assert_eq!(second.data.initials, "A");
    }

    #[test]
    fn new_profile_needs_email() {
        let conn = db::init_db(":memory:").unwrap();
        assert!(matches!(
            upsert_profile(&conn, "u1", &ProfileUpdate::default()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(get_profile(&conn, "u1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn names_fall_back_to_friend() {
        let conn = db::init_db(":memory:").unwrap();
        upsert_profile(
            &conn,
            "u1",
            &ProfileUpdate {
                display_name: Some("Ana".into()),
                email: Some("ana@example.com".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let names = display_names(&conn, &["u1".into(), "ghost".into()]).unwrap();
        assert_eq!(names["u1"], "Ana");
        assert_eq!(names["ghost"], FALLBACK_NAME);
    }

    #[test]
    fn avatar_replaces_previous_url() {
        let conn = db::init_db(":memory:").unwrap();
        upsert_profile(
            &conn,
            "u1",
            &ProfileUpdate {
                email: Some("a@b.c".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(set_photo_url(&conn, "u1", "http://x/1.jpg").unwrap(), None);
        assert_eq!(
            set_photo_url(&conn, "u1", "http://x/2.jpg").unwrap().as_deref(),
            Some("http://x/1.jpg")
        );
        assert_eq!(
            get_profile(&conn, "u1").unwrap().data.photo_url.as_deref(),
            Some("http://x/2.jpg")
        );
        assert!(set_photo_url(&conn, "ghost", "http://x/3.jpg").is_err());
    }
}
