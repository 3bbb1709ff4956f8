//! Async entry point to the events library.
//!
//! A [`Client`] owns the connection pool, the object store and the sender of
//! membership changes. Database work runs on blocking threads; uploads go
//! through the image pipeline before their documents are written.

use crate::{
    activities::{self, NewActivity},
    claims::{self, MemberChange},
    config::Config,
    db::{self, DbPool},
    days,
    error::Result,
    events::{self, EventOverview, NewEvent},
    files::{random_object_id, ObjectStore},
    images,
    invites::{self, InvitePolicy, JoinOutcome},
    outfits::{self, LikeState, OutfitBundle, OutfitMetaUpdate},
    photos::{self, NewPhoto},
    profiles::{self, ProfileUpdate},
};
use bytes::Bytes;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};
use tripsync_schema::{
    paths, Activity, Doc, Event, EventType, Invite, InviteStatus, Member, OutfitMeta,
    OutfitPhoto, RefPhoto, Role, UserProfile, GALLERY_ACTIVITY_ID,
};

const CHANGE_CAPACITY: usize = 256;
const POOL_SIZE: u32 = 8;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub public_origin: String,
    pub invite_policy: InvitePolicy,
}

#[derive(Clone)]
pub struct Client {
    pool: DbPool,
    objects: ObjectStore,
    changes: broadcast::Sender<MemberChange>,
    settings: ClientSettings,
}

/// A freshly created invite and its shareable link.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteLink {
    pub token: String,
    pub role: Role,
    pub url: String,
}

/// What an invitee sees before joining.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePreview {
    pub event_id: String,
    pub event_name: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub role: Role,
    pub status: InviteStatus,
}

impl Client {
    pub fn new(pool: DbPool, objects: ObjectStore, settings: ClientSettings) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            pool,
            objects,
            changes,
            settings,
        }
    }

    /// Open the database and object store under the configured data directory.
    pub async fn open(config: &Config) -> Result<Self> {
        tokio::fs::create_dir_all(config.objects_dir()).await?;
        let db_path = config.database_path();
        let pool = tokio::task::spawn_blocking(move || db::open_pool(db_path, POOL_SIZE)).await??;
        let objects = ObjectStore::new(config.objects_dir(), &config.public_origin);
        let settings = ClientSettings {
            public_origin: config.public_origin.clone(),
            invite_policy: InvitePolicy::from_single_use(config.single_use_invites),
        };
        Ok(Self::new(pool, objects, settings))
    }

    /// Start the task mirroring membership changes into auth claims.
    pub fn start_claims_sync(&self) -> JoinHandle<()> {
        claims::spawn_sync(self.pool.clone(), self.changes.subscribe())
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Run `f` with a pooled connection on a blocking thread.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }

    fn publish(&self, change: MemberChange) {
        if self.changes.send(change).is_err() {
            debug!("no claims subscriber");
        }
    }

    // events

    pub async fn create_event(&self, owner: &str, new: NewEvent) -> Result<String> {
        let owner_id = owner.to_string();
        let id = self
            .with_conn(move |conn| events::create_event(conn, &owner_id, &new))
            .await?;
        self.publish(MemberChange::joined(&id, owner));
        Ok(id)
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Doc<Event>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| events::get_event(conn, &event_id))
            .await
    }

    pub async fn event_overview(&self, event_id: &str) -> Result<EventOverview> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| events::event_overview(conn, &event_id))
            .await
    }

    pub async fn list_events_for_user(&self, uid: &str) -> Result<Vec<Doc<Event>>> {
        let uid = uid.to_string();
        self.with_conn(move |conn| events::list_events_for_user(conn, &uid))
            .await
    }

    pub async fn list_members(&self, event_id: &str) -> Result<Vec<Doc<Member>>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| events::list_members(conn, &event_id))
            .await
    }

    pub async fn add_member(&self, event_id: &str, uid: &str, role: Role) -> Result<Doc<Member>> {
        let (e, u) = (event_id.to_string(), uid.to_string());
        let member = self
            .with_conn(move |conn| events::add_member(conn, &e, &u, role))
            .await?;
        self.publish(MemberChange::joined(event_id, uid));
        Ok(member)
    }

    pub async fn remove_member(&self, event_id: &str, uid: &str) -> Result<bool> {
        let (e, u) = (event_id.to_string(), uid.to_string());
        let removed = self
            .with_conn(move |conn| events::remove_member(conn, &e, &u))
            .await?;
        if removed {
            self.publish(MemberChange::left(event_id, uid));
        }
        Ok(removed)
    }

    pub async fn list_day_ids(&self, event_id: &str) -> Result<Vec<String>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| events::list_day_ids(conn, &event_id))
            .await
    }

    pub async fn create_day(&self, event_id: &str, day_id: &str) -> Result<bool> {
        let (e, d) = (event_id.to_string(), day_id.to_string());
        self.with_conn(move |conn| {
            events::get_event(conn, &e)?;
            days::create_day(conn, &e, &d)
        })
        .await
    }

    // activities

    pub async fn add_activity(
        &self,
        event_id: &str,
        actor: &str,
        new: NewActivity,
    ) -> Result<Doc<Activity>> {
        let (e, a) = (event_id.to_string(), actor.to_string());
        self.with_conn(move |conn| activities::add_activity(conn, &e, &a, &new))
            .await
    }

    pub async fn get_activity(&self, event_id: &str, activity_id: &str) -> Result<Doc<Activity>> {
        let (e, a) = (event_id.to_string(), activity_id.to_string());
        self.with_conn(move |conn| activities::get_activity(conn, &e, &a))
            .await
    }

    pub async fn list_activities(&self, event_id: &str) -> Result<Vec<Doc<Activity>>> {
        let e = event_id.to_string();
        self.with_conn(move |conn| activities::list_activities(conn, &e))
            .await
    }

    pub async fn list_activities_for_day(
        &self,
        event_id: &str,
        day_id: &str,
    ) -> Result<Vec<Doc<Activity>>> {
        let (e, d) = (event_id.to_string(), day_id.to_string());
        self.with_conn(move |conn| activities::list_activities_for_day(conn, &e, &d))
            .await
    }

    // photos

    /// Downscale, store and record an uploaded photo. The stored object is
    /// removed again when recording fails.
    async fn store_photo<T, F>(&self, object_path: String, raw: Bytes, record: F) -> Result<T>
    where
        F: FnOnce(&Connection, NewPhoto) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let prepared = tokio::task::spawn_blocking(move || images::prepare_photo(&raw)).await??;
        let url = self.objects.put(&object_path, prepared.bytes).await?;
        let photo = NewPhoto {
            url,
            width: Some(prepared.width),
            height: Some(prepared.height),
        };
        match self.with_conn(move |conn| record(conn, photo)).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if let Err(cleanup) = self.objects.delete(&object_path).await {
                    warn!(object_path, error = %cleanup, "orphaned object");
                }
                Err(e)
            }
        }
    }

    pub async fn upload_ref_photo(
        &self,
        event_id: &str,
        activity_id: &str,
        uploader: &str,
        raw: Bytes,
    ) -> Result<Doc<RefPhoto>> {
        let object_path = paths::ref_object(event_id, activity_id, uploader, &random_object_id());
        let (e, a, u) = (
            event_id.to_string(),
            activity_id.to_string(),
            uploader.to_string(),
        );
        self.store_photo(object_path, raw, move |conn, photo| {
            photos::add_ref_photo(conn, &e, &a, &u, &photo)
        })
        .await
    }

    pub async fn list_ref_photos(
        &self,
        event_id: &str,
        activity_id: &str,
    ) -> Result<Vec<Doc<RefPhoto>>> {
        let (e, a) = (event_id.to_string(), activity_id.to_string());
        self.with_conn(move |conn| photos::list_ref_photos(conn, &e, &a))
            .await
    }

    pub async fn upload_gallery_photo(
        &self,
        event_id: &str,
        uploader: &str,
        raw: Bytes,
    ) -> Result<Doc<RefPhoto>> {
        let object_path =
            paths::ref_object(event_id, GALLERY_ACTIVITY_ID, uploader, &random_object_id());
        let (e, u) = (event_id.to_string(), uploader.to_string());
        self.store_photo(object_path, raw, move |conn, photo| {
            photos::add_gallery_photo(conn, &e, &u, &photo)
        })
        .await
    }

    pub async fn list_gallery_photos(&self, event_id: &str) -> Result<Vec<Doc<RefPhoto>>> {
        let e = event_id.to_string();
        self.with_conn(move |conn| photos::list_gallery_photos(conn, &e))
            .await
    }

    // outfits

    pub async fn upload_outfit_photo(
        &self,
        event_id: &str,
        activity_id: &str,
        uploader: &str,
        raw: Bytes,
        caption: Option<String>,
    ) -> Result<Doc<OutfitPhoto>> {
        let object_path =
            paths::outfit_object(event_id, activity_id, uploader, &random_object_id());
        let (e, a, u) = (
            event_id.to_string(),
            activity_id.to_string(),
            uploader.to_string(),
        );
        self.store_photo(object_path, raw, move |conn, photo| {
            outfits::add_outfit_photo(conn, &e, &a, &u, &photo, caption)
        })
        .await
    }

    pub async fn list_outfits_with_photos(
        &self,
        event_id: &str,
        activity_id: &str,
    ) -> Result<BTreeMap<String, OutfitBundle>> {
        let (e, a) = (event_id.to_string(), activity_id.to_string());
        self.with_conn(move |conn| outfits::list_outfits_with_photos(conn, &e, &a))
            .await
    }

    pub async fn upsert_outfit_meta(
        &self,
        event_id: &str,
        activity_id: &str,
        uid: &str,
        update: OutfitMetaUpdate,
    ) -> Result<Doc<OutfitMeta>> {
        let (e, a, u) = (
            event_id.to_string(),
            activity_id.to_string(),
            uid.to_string(),
        );
        self.with_conn(move |conn| outfits::upsert_outfit_meta(conn, &e, &a, &u, &update))
            .await
    }

    /// Delete the actor's own outfit photo and its stored object.
    pub async fn delete_outfit_photo(
        &self,
        event_id: &str,
        activity_id: &str,
        photo_id: &str,
        actor: &str,
    ) -> Result<Doc<OutfitPhoto>> {
        let (e, a, p, u) = (
            event_id.to_string(),
            activity_id.to_string(),
            photo_id.to_string(),
            actor.to_string(),
        );
        let removed = self
            .with_conn(move |conn| outfits::delete_outfit_photo(conn, &e, &a, &p, &u))
            .await?;
        if let Some(object_path) = self.objects.path_from_url(&removed.data.url) {
            if let Err(e) = self.objects.delete(object_path).await {
                warn!(object_path, error = %e, "failed to delete outfit object");
            }
        }
        Ok(removed)
    }

    pub async fn set_outfit_like(
        &self,
        event_id: &str,
        activity_id: &str,
        photo_id: &str,
        uid: &str,
        liked: bool,
    ) -> Result<LikeState> {
        let (e, a, p, u) = (
            event_id.to_string(),
            activity_id.to_string(),
            photo_id.to_string(),
            uid.to_string(),
        );
        self.with_conn(move |conn| outfits::set_outfit_like(conn, &e, &a, &p, &u, liked))
            .await
    }

    pub async fn toggle_outfit_like(
        &self,
        event_id: &str,
        activity_id: &str,
        photo_id: &str,
        uid: &str,
    ) -> Result<LikeState> {
        let (e, a, p, u) = (
            event_id.to_string(),
            activity_id.to_string(),
            photo_id.to_string(),
            uid.to_string(),
        );
        self.with_conn(move |conn| outfits::toggle_outfit_like(conn, &e, &a, &p, &u))
            .await
    }

    // invites

    pub async fn create_invite(&self, event_id: &str, role: Option<Role>) -> Result<InviteLink> {
        let e = event_id.to_string();
        let invite = self
            .with_conn(move |conn| invites::create_invite(conn, &e, role))
            .await?;
        let url = invites::join_url(&self.settings.public_origin, event_id, &invite.id)?;
        Ok(InviteLink {
            token: invite.id,
            role: invite.data.role,
            url,
        })
    }

    /// Invite details for the join page. Without an event id the token is
    /// looked up across all events.
    pub async fn invite_preview(&self, event_id: Option<&str>, token: &str) -> Result<InvitePreview> {
        let (e, t) = (event_id.map(str::to_string), token.to_string());
        self.with_conn(move |conn| {
            let (event_id, invite): (String, Doc<Invite>) = match e {
                Some(e) => {
                    let invite = invites::get_invite_for_event(conn, &e, &t)?;
                    (e, invite)
                }
                None => {
                    let found = invites::find_invite_by_token(conn, &t)?;
                    (found.event_id, found.invite)
                }
            };
            let event = events::get_event(conn, &event_id)?;
            Ok(InvitePreview {
                event_id,
                event_name: event.data.name,
                kind: event.data.kind,
                role: invite.data.role,
                status: invite.data.status,
            })
        })
        .await
    }

    pub async fn join_event_with_token(
        &self,
        event_id: Option<&str>,
        token: &str,
        uid: &str,
    ) -> Result<JoinOutcome> {
        let (e, t, u) = (
            event_id.map(str::to_string),
            token.to_string(),
            uid.to_string(),
        );
        let policy = self.settings.invite_policy;
        let outcome = self
            .with_conn(move |conn| {
                let e = match e {
                    Some(e) => e,
                    None => invites::find_invite_by_token(conn, &t)?.event_id,
                };
                invites::join_event_with_token(conn, &e, &t, &u, policy)
            })
            .await?;
        if !outcome.already {
            self.publish(MemberChange::joined(&outcome.event_id, uid));
        }
        Ok(outcome)
    }

    pub async fn expire_invite(&self, event_id: &str, token: &str) -> Result<Doc<Invite>> {
        let (e, t) = (event_id.to_string(), token.to_string());
        self.with_conn(move |conn| invites::expire_invite(conn, &e, &t))
            .await
    }

    // profiles

    pub async fn get_profile(&self, uid: &str) -> Result<Doc<UserProfile>> {
        let uid = uid.to_string();
        self.with_conn(move |conn| profiles::get_profile(conn, &uid))
            .await
    }

    pub async fn upsert_profile(&self, uid: &str, update: ProfileUpdate) -> Result<Doc<UserProfile>> {
        let uid = uid.to_string();
        self.with_conn(move |conn| profiles::upsert_profile(conn, &uid, &update))
            .await
    }

    /// Store a new avatar, point the profile at it and drop the previous one.
    pub async fn upload_avatar(&self, uid: &str, raw: Bytes) -> Result<Doc<UserProfile>> {
        let object_path = paths::avatar_object(uid, &random_object_id());
        let u = uid.to_string();
        let previous = self
            .store_photo(object_path, raw, move |conn, photo| {
                profiles::set_photo_url(conn, &u, &photo.url)
            })
            .await?;
        if let Some(object_path) = previous.as_deref().and_then(|url| self.objects.path_from_url(url)) {
            if let Err(e) = self.objects.delete(object_path).await {
                warn!(object_path, error = %e, "failed to delete previous avatar");
            }
        }
        self.get_profile(uid).await
    }

    pub async fn display_names(&self, uids: Vec<String>) -> Result<BTreeMap<String, String>> {
        self.with_conn(move |conn| profiles::display_names(conn, &uids))
            .await
    }

    /// Event claims currently recorded for the user.
    pub async fn claims(&self, uid: &str) -> Result<BTreeMap<String, bool>> {
        let uid = uid.to_string();
        self.with_conn(move |conn| claims::get_claims(conn, &uid))
            .await
    }
}
