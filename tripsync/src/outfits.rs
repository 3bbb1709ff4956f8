//! Outfit photos, per-member outfit notes and likes.
//!
//! Photos live flat under `outfitPhotos`, one document per upload; the
//! per-member `outfits/{uid}` document holds only notes and items.

use crate::{
    activities,
    docstore::{self, now_ms, Order},
    error::{Error, Result},
    photos::NewPhoto,
};
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use tripsync_schema::{paths, Doc, OutfitMeta, OutfitPhoto};

pub fn add_outfit_photo(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
    uploader: &str,
    photo: &NewPhoto,
    caption: Option<String>,
) -> Result<Doc<OutfitPhoto>> {
    activities::get_activity(conn, event_id, activity_id)?;
    let data = OutfitPhoto {
        url: photo.url.clone(),
        width: photo.width,
        height: photo.height,
        uploaded_by: uploader.to_string(),
        created_at: now_ms(),
        likes_count: 0,
        liked_by: Vec::new(),
        comments_count: 0,
        caption,
    };
    let id = docstore::add(conn, &paths::outfit_photos(event_id, activity_id), &data)?;
    info!(event_id, activity_id, photo_id = %id, "outfit photo added");
    Ok(Doc { id, data })
}

/// All outfit photos of an activity, newest first.
pub fn list_outfit_photos(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
) -> Result<Vec<Doc<OutfitPhoto>>> {
    docstore::list(
        conn,
        &paths::outfit_photos(event_id, activity_id),
        Order::NewestFirst,
    )
}

/// One member's outfit: their notes and items plus the photos they uploaded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutfitBundle {
    pub uid: String,
    pub notes: Option<String>,
    pub items: Vec<String>,
    pub photos: Vec<Doc<OutfitPhoto>>,
}

impl OutfitBundle {
    fn empty(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            notes: None,
            items: Vec::new(),
            photos: Vec::new(),
        }
    }
}

/// Outfits keyed by member uid. Members with notes but no photos appear with
/// an empty photo list.
pub fn list_outfits_with_photos(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
) -> Result<BTreeMap<String, OutfitBundle>> {
    let mut out = BTreeMap::new();
    let metas: Vec<Doc<OutfitMeta>> = docstore::list(
        conn,
        &paths::outfit_metas(event_id, activity_id),
        Order::ById,
    )?;
    for meta in metas {
        let bundle = out
            .entry(meta.id.clone())
            .or_insert_with(|| OutfitBundle::empty(&meta.id));
        bundle.notes = meta.data.notes;
        bundle.items = meta.data.items;
    }
    for photo in list_outfit_photos(conn, event_id, activity_id)? {
        let uid = photo.data.uploaded_by.clone();
        out.entry(uid.clone())
            .or_insert_with(|| OutfitBundle::empty(&uid))
            .photos
            .push(photo);
    }
    Ok(out)
}

fn present<'de, D, T>(de: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Partial update of a member's outfit notes. Absent fields are left alone;
/// `notes: null` clears the notes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutfitMetaUpdate {
    #[serde(default)]
    pub items: Option<Vec<String>>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
}

pub fn upsert_outfit_meta(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
    uid: &str,
    update: &OutfitMetaUpdate,
) -> Result<Doc<OutfitMeta>> {
    activities::get_activity(conn, event_id, activity_id)?;
    let path = paths::outfit_meta(event_id, activity_id, uid);
    let tx = docstore::write_tx(conn)?;
    let mut meta = docstore::get::<OutfitMeta>(&tx, &path)?
        .map(|d| d.data)
        .unwrap_or_default();
    if let Some(items) = &update.items {
        meta.items = items.clone();
    }
    if let Some(notes) = &update.notes {
        meta.notes = notes.clone();
    }
    meta.updated_at = now_ms();
    docstore::set(&tx, &path, &meta)?;
    tx.commit()?;
    Ok(Doc {
        id: uid.to_string(),
        data: meta,
    })
}

/// Delete an outfit photo. Only its uploader may do so. Returns the removed
/// document so the caller can drop the stored object.
pub fn delete_outfit_photo(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
    photo_id: &str,
    actor: &str,
) -> Result<Doc<OutfitPhoto>> {
    let path = paths::outfit_photo(event_id, activity_id, photo_id);
    let photo: Doc<OutfitPhoto> = docstore::require(conn, &path, "outfit photo")?;
    if photo.data.uploaded_by != actor {
        return Err(Error::denied("only the uploader can delete this photo"));
    }
    docstore::delete(conn, &path)?;
    info!(event_id, activity_id, photo_id, "outfit photo deleted");
    Ok(photo)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub liked: bool,
    pub likes_count: i64,
}

fn update_like(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
    photo_id: &str,
    uid: &str,
    want: impl FnOnce(bool) -> bool,
) -> Result<LikeState> {
    let path = paths::outfit_photo(event_id, activity_id, photo_id);
    let tx = docstore::write_tx(conn)?;
    let mut photo: Doc<OutfitPhoto> = docstore::require(&tx, &path, "outfit photo")?;
    let has = photo.data.liked_by.iter().any(|u| u == uid);
    let liked = want(has);
    if liked != has {
        if liked {
            photo.data.liked_by.push(uid.to_string());
            photo.data.likes_count += 1;
        } else {
            photo.data.liked_by.retain(|u| u != uid);
            photo.data.likes_count = (photo.data.likes_count - 1).max(0);
        }
        docstore::set(&tx, &path, &photo.data)?;
    }
    tx.commit()?;
    debug!(photo_id, uid, liked, changed = liked != has, "outfit like");
    Ok(LikeState {
        liked,
        likes_count: photo.data.likes_count,
    })
}

/// Like or unlike. Repeating the same request changes nothing.
pub fn set_outfit_like(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
    photo_id: &str,
    uid: &str,
    liked: bool,
) -> Result<LikeState> {
    update_like(conn, event_id, activity_id, photo_id, uid, |_| liked)
}

pub fn toggle_outfit_like(
    conn: &Connection,
    event_id: &str,
    activity_id: &str,
    photo_id: &str,
    uid: &str,
) -> Result<LikeState> {
    update_like(conn, event_id, activity_id, photo_id, uid, |has| !has)
}
