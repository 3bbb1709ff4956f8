use crate::{
    docstore::{self, now_ms, Order},
    error::{Error, Result},
    events,
};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;
use tripsync_schema::{
    paths, Activity, Doc, DEFAULT_ACTIVITY_KIND, GALLERY_ACTIVITY_ID, GALLERY_KIND,
};

/// Input for [`add_activity`]. `time` and `kind` are stored as given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub title: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub day_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub ref_photo_url: Option<String>,
}

pub fn add_activity(
    conn: &Connection,
    event_id: &str,
    actor: &str,
    new: &NewActivity,
) -> Result<Doc<Activity>> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(Error::validation("title is required"));
    }
    let kind = new
        .kind
        .clone()
        .unwrap_or_else(|| DEFAULT_ACTIVITY_KIND.to_string());
    if kind == GALLERY_KIND {
        return Err(Error::validation("reserved activity kind"));
    }
    events::get_event(conn, event_id)?;
    let activity = Activity {
        title: title.to_string(),
        time: new.time.clone(),
        kind,
        day_id: new.day_id.clone(),
        description: new.description.clone(),
        notes: new.notes.clone(),
        ref_photo_url: new.ref_photo_url.clone(),
        created_at: now_ms(),
        created_by: actor.to_string(),
    };
    let id = docstore::add(conn, &paths::activities(event_id), &activity)?;
    info!(event_id, activity_id = %id, "activity added");
    Ok(Doc { id, data: activity })
}

pub fn get_activity(conn: &Connection, event_id: &str, activity_id: &str) -> Result<Doc<Activity>> {
    docstore::require(conn, &paths::activity(event_id, activity_id), "activity")
}

/// Itinerary activities in creation order, without the gallery bucket.
pub fn list_activities(conn: &Connection, event_id: &str) -> Result<Vec<Doc<Activity>>> {
    Ok(
        docstore::list::<Activity>(conn, &paths::activities(event_id), Order::OldestFirst)?
            .into_iter()
            .filter(|a| !a.data.is_gallery())
            .collect(),
    )
}

/// Activities scheduled on a day, earliest time first; untimed ones last.
pub fn list_activities_for_day(
    conn: &Connection,
    event_id: &str,
    day_id: &str,
) -> Result<Vec<Doc<Activity>>> {
    let mut list: Vec<_> = list_activities(conn, event_id)?
        .into_iter()
        .filter(|a| a.data.day_id.as_deref() == Some(day_id))
        .collect();
    // stable sort keeps creation order among equal times
    list.sort_by(|a, b| match (&a.data.time, &b.data.time) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    Ok(list)
}

/// Most recently created itinerary activities.
pub fn recent_activities(
    conn: &Connection,
    event_id: &str,
    limit: usize,
) -> Result<Vec<Doc<Activity>>> {
    Ok(
        docstore::list::<Activity>(conn, &paths::activities(event_id), Order::NewestFirst)?
            .into_iter()
            .filter(|a| !a.data.is_gallery())
            .take(limit)
            .collect(),
    )
}

/// Return the event's gallery activity, creating it on first use. The id is
/// fixed, so concurrent callers all end up with the same document.
pub fn ensure_gallery_activity(
    conn: &Connection,
    event_id: &str,
    actor: &str,
) -> Result<Doc<Activity>> {
    let path = paths::activity(event_id, GALLERY_ACTIVITY_ID);
    if let Some(existing) = docstore::get::<Activity>(conn, &path)? {
        return Ok(existing);
    }
    events::get_event(conn, event_id)?;
    let gallery = Activity {
        title: "Gallery".into(),
        time: None,
        kind: GALLERY_KIND.into(),
        day_id: None,
        description: None,
        notes: None,
        ref_photo_url: None,
        created_at: now_ms(),
        created_by: actor.to_string(),
    };
    if docstore::create(conn, &path, &gallery)? {
        info!(event_id, "gallery activity created");
    }
    docstore::require(conn, &path, "gallery activity")
}
