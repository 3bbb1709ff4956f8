use crate::{
    activities,
    docstore::{self, now_ms, Order},
    error::Result,
};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;
use tripsync_schema::{paths, Doc, RefPhoto, GALLERY_ACTIVITY_ID};

/// A stored image ready to be recorded: its public URL and final size.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPhoto {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

pub fn add_ref_photo(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
    uploader: &str,
    photo: &NewPhoto,
) -> Result<Doc<RefPhoto>> {
    activities::get_activity(conn, event_id, activity_id)?;
    let data = RefPhoto {
        url: photo.url.clone(),
        width: photo.width,
        height: photo.height,
        uploaded_by: uploader.to_string(),
        created_at: now_ms(),
    };
    let id = docstore::add(conn, &paths::ref_photos(event_id, activity_id), &data)?;
    info!(event_id, activity_id, photo_id = %id, "reference photo added");
    Ok(Doc { id, data })
}

/// Reference photos of an activity, newest first.
pub fn list_ref_photos(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
) -> Result<Vec<Doc<RefPhoto>>> {
    docstore::list(
        conn,
        &paths::ref_photos(event_id, activity_id),
        Order::NewestFirst,
    )
}

pub fn latest_ref_photo(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
) -> Result<Option<Doc<RefPhoto>>> {
    Ok(list_ref_photos(conn, event_id, activity_id)?.into_iter().next())
}

/// Record an event-wide photo under the gallery activity, creating the
/// gallery on first use.
pub fn add_gallery_photo(
    conn: &Connection,
    event_id: &str,
    uploader: &str,
    photo: &NewPhoto,
) -> Result<Doc<RefPhoto>> {
    activities::ensure_gallery_activity(conn, event_id, uploader)?;
    add_ref_photo(conn, event_id, GALLERY_ACTIVITY_ID, uploader, photo)
}

pub fn list_gallery_photos(conn: &Connection, event_id: &str) -> Result<Vec<Doc<RefPhoto>>> {
    list_ref_photos(conn, event_id, GALLERY_ACTIVITY_ID)
}
