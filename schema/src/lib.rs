use serde::{Deserialize, Serialize};
use std::fmt;

pub mod paths;

/// Activity kind reserved for the hidden per-event photo bucket.
pub const GALLERY_KIND: &str = "__gallery__";
/// Well-known document id of the gallery activity inside an event.
pub const GALLERY_ACTIVITY_ID: &str = "gallery";
/// Kind assigned to activities created without one.
pub const DEFAULT_ACTIVITY_KIND: &str = "activity";

/// A stored document together with its id, the way documents are handed to
/// callers: `{ "id": ..., ...fields }`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Doc<T> {
    pub id: String,
    #[serde(flatten)]
    pub data: T,
}

/// Whether an event covers a single day or a date range.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Event,
    Trip,
}

/// Role of a member within an event.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    #[default]
    Editor,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }

    /// Owners and editors manage invites and the schedule.
    pub fn can_manage(&self) -> bool {
        matches!(self, Role::Owner | Role::Editor)
    }

    /// Everyone except viewers may add activities and photos.
    pub fn can_contribute(&self) -> bool {
        !matches!(self, Role::Viewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an invite token.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    #[default]
    Pending,
    Accepted,
    Expired,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `events/{eventId}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub owner_id: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub name: String,
    #[serde(default)]
    pub cover_photo_url: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub created_at: i64,
}

/// `events/{eventId}/members/{uid}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub role: Role,
    pub joined_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_token: Option<String>,
}

/// `events/{eventId}/days/{YYYY-MM-DD}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Day {
    pub day_id: String,
    pub created_at: i64,
}

fn default_kind() -> String {
    DEFAULT_ACTIVITY_KIND.to_string()
}

/// `events/{eventId}/activities/{activityId}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub title: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub day_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_photo_url: Option<String>,
    pub created_at: i64,
    pub created_by: String,
}

impl Activity {
    pub fn is_gallery(&self) -> bool {
        self.kind == GALLERY_KIND
    }
}

/// `events/{e}/activities/{a}/refPhotos/{id}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RefPhoto {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    pub uploaded_by: String,
    pub created_at: i64,
}

/// `events/{e}/activities/{a}/outfitPhotos/{id}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutfitPhoto {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    pub uploaded_by: String,
    pub created_at: i64,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub liked_by: Vec<String>,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub caption: Option<String>,
}

/// `events/{e}/activities/{a}/outfits/{uid}`: a member's notes for an activity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OutfitMeta {
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub updated_at: i64,
}

/// `events/{eventId}/invites/{token}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub token: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub status: InviteStatus,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<i64>,
}

/// `users/{uid}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub initials: String,
    pub email: String,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
