//! Document and object paths. These must stay byte-compatible with data
//! written by the web client.

pub const EVENTS: &str = "events";
pub const USERS: &str = "users";

pub fn event(event_id: &str) -> String {
    format!("events/{event_id}")
}

pub fn members(event_id: &str) -> String {
    format!("events/{event_id}/members")
}

pub fn member(event_id: &str, uid: &str) -> String {
    format!("events/{event_id}/members/{uid}")
}

pub fn days(event_id: &str) -> String {
    format!("events/{event_id}/days")
}

pub fn day(event_id: &str, day_id: &str) -> String {
    format!("events/{event_id}/days/{day_id}")
}

pub fn activities(event_id: &str) -> String {
    format!("events/{event_id}/activities")
}

pub fn activity(event_id: &str, activity_id: &str) -> String {
    format!("events/{event_id}/activities/{activity_id}")
}

pub fn ref_photos(event_id: &str, activity_id: &str) -> String {
    format!("events/{event_id}/activities/{activity_id}/refPhotos")
}

pub fn outfit_photos(event_id: &str, activity_id: &str) -> String {
    format!("events/{event_id}/activities/{activity_id}/outfitPhotos")
}

pub fn outfit_photo(event_id: &str, activity_id: &str, photo_id: &str) -> String {
    format!("events/{event_id}/activities/{activity_id}/outfitPhotos/{photo_id}")
}

pub fn outfit_metas(event_id: &str, activity_id: &str) -> String {
    format!("events/{event_id}/activities/{activity_id}/outfits")
}

pub fn outfit_meta(event_id: &str, activity_id: &str, uid: &str) -> String {
    format!("events/{event_id}/activities/{activity_id}/outfits/{uid}")
}

pub fn invites(event_id: &str) -> String {
    format!("events/{event_id}/invites")
}

pub fn invite(event_id: &str, token: &str) -> String {
    format!("events/{event_id}/invites/{token}")
}

pub fn user(uid: &str) -> String {
    format!("users/{uid}")
}

/// Object path of a reference photo upload.
pub fn ref_object(event_id: &str, activity_id: &str, uid: &str, object_id: &str) -> String {
    format!("events/{event_id}/activities/{activity_id}/ref/{uid}/{object_id}.jpg")
}

/// Object path of an outfit photo upload.
pub fn outfit_object(event_id: &str, activity_id: &str, uid: &str, object_id: &str) -> String {
    format!("events/{event_id}/activities/{activity_id}/outfits/{uid}/{object_id}.jpg")
}

/// Object path of a profile avatar.
pub fn avatar_object(uid: &str, object_id: &str) -> String {
    format!("users/{uid}/avatar/{object_id}.jpg")
}

/// Event id of any path below `events/{eventId}/...`.
pub fn event_id_of(path: &str) -> Option<&str> {
    let mut parts = path.split('/');
    match (parts.next(), parts.next()) {
        (Some(EVENTS), Some(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}
