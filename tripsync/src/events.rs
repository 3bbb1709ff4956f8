use crate::{
    activities, dates, days,
    docstore::{self, now_ms, Order},
    error::{Error, Result},
    photos,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;
use tripsync_schema::{paths, Activity, Doc, Event, EventType, Member, Role};

/// Input for [`create_event`]. Single-day events take `event_date` (or
/// `start_date`); trips take `start_date` and `end_date`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub name: String,
    #[serde(default)]
    pub cover_photo_url: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
}

fn normalize_dates(new: &NewEvent) -> Result<(String, String)> {
    match new.kind {
        EventType::Event => {
            let day = new
                .event_date
                .clone()
                .or_else(|| new.start_date.clone())
                .ok_or_else(|| Error::validation("eventDate is required for an event"))?;
            dates::parse_day(&day)?;
            Ok((day.clone(), day))
        }
        EventType::Trip => {
            let (Some(start), Some(end)) = (new.start_date.clone(), new.end_date.clone()) else {
                return Err(Error::validation("startDate and endDate are required for a trip"));
            };
            let (first, last) = (dates::parse_day(&start)?, dates::parse_day(&end)?);
            if first > last {
                return Err(Error::validation("startDate is after endDate"));
            }
            dates::check_span(first, last)?;
            Ok((start, end))
        }
    }
}

/// Create an event or trip owned by `owner_id`: the event document, the
/// owner's membership and the day documents, all in one transaction.
/// Returns the new event id.
pub fn create_event(conn: &Connection, owner_id: &str, new: &NewEvent) -> Result<String> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(Error::validation("name is required"));
    }
    let (start, end) = normalize_dates(new)?;
    let now = now_ms();
    let event = Event {
        owner_id: owner_id.to_string(),
        kind: new.kind,
        name: name.to_string(),
        cover_photo_url: new.cover_photo_url.clone(),
        start_date: start.clone(),
        end_date: end.clone(),
        created_at: now,
    };

    let tx = docstore::write_tx(conn)?;
    let id = docstore::add(&tx, paths::EVENTS, &event)?;
    let owner = Member {
        user_id: owner_id.to_string(),
        role: Role::Owner,
        joined_at: now,
        invite_token: None,
    };
    docstore::set(&tx, &paths::member(&id, owner_id), &owner)?;
    let wanted = dates::days_between(&start, &end)?;
    days::write_missing_days(&tx, &id, &wanted)?;
    tx.commit()?;

    info!(event_id = %id, owner_id, kind = ?new.kind, "event created");
    Ok(id)
}

pub fn get_event(conn: &Connection, event_id: &str) -> Result<Doc<Event>> {
    docstore::require(conn, &paths::event(event_id), "event")
}

pub fn count_members(conn: &Connection, event_id: &str) -> Result<u64> {
    docstore::count(conn, &paths::members(event_id))
}

/// Number of itinerary activities; the gallery bucket is not counted.
pub fn count_activities(conn: &Connection, event_id: &str) -> Result<u64> {
    Ok(activities::list_activities(conn, event_id)?.len() as u64)
}

pub fn list_day_ids(conn: &Connection, event_id: &str) -> Result<Vec<String>> {
    days::list_day_ids(conn, event_id)
}

pub fn get_member(conn: &Connection, event_id: &str, uid: &str) -> Result<Option<Doc<Member>>> {
    docstore::get(conn, &paths::member(event_id, uid))
}

pub fn list_members(conn: &Connection, event_id: &str) -> Result<Vec<Doc<Member>>> {
    docstore::list(conn, &paths::members(event_id), Order::OldestFirst)
}

/// Insert or update a membership. The original join time is kept on update.
/// The owner's membership is fixed.
pub fn add_member(conn: &Connection, event_id: &str, uid: &str, role: Role) -> Result<Doc<Member>> {
    let event = get_event(conn, event_id)?;
    if event.data.owner_id == uid {
        return Err(Error::denied("the owner's role cannot be changed"));
    }
    if role == Role::Owner {
        return Err(Error::validation("an event has a single owner"));
    }
    let tx = docstore::write_tx(conn)?;
    let path = paths::member(event_id, uid);
    let member = match docstore::get::<Member>(&tx, &path)? {
        Some(existing) => Member {
            role,
            ..existing.data
        },
        None => Member {
            user_id: uid.to_string(),
            role,
            joined_at: now_ms(),
            invite_token: None,
        },
    };
    docstore::set(&tx, &path, &member)?;
    tx.commit()?;
    Ok(Doc {
        id: uid.to_string(),
        data: member,
    })
}

/// Remove a membership. The owner cannot be removed.
pub fn remove_member(conn: &Connection, event_id: &str, uid: &str) -> Result<bool> {
    let event = get_event(conn, event_id)?;
    if event.data.owner_id == uid {
        return Err(Error::denied("the owner cannot leave their event"));
    }
    docstore::delete(conn, &paths::member(event_id, uid))
}

/// Events the user belongs to, sorted by name. Falls back to events the user
/// owns when no membership is found.
pub fn list_events_for_user(conn: &Connection, uid: &str) -> Result<Vec<Doc<Event>>> {
    let memberships = docstore::collection_group::<Member>(conn, "members", Some(("userId", uid)))?;
    let ids: BTreeSet<String> = memberships
        .iter()
        .filter_map(|(path, _)| paths::event_id_of(path).map(str::to_string))
        .collect();
    let mut list = Vec::new();
    for id in ids {
        if let Some(event) = docstore::get::<Event>(conn, &paths::event(&id))? {
            list.push(event);
        }
    }
    if list.is_empty() {
        list = docstore::list::<Event>(conn, paths::EVENTS, Order::OldestFirst)?
            .into_iter()
            .filter(|e| e.data.owner_id == uid)
            .collect();
    }
    list.sort_by(|a, b| a.data.name.cmp(&b.data.name));
    Ok(list)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPreview {
    #[serde(flatten)]
    pub activity: Doc<Activity>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOverview {
    pub event: Doc<Event>,
    pub member_count: u64,
    pub activity_count: u64,
    pub day_ids: Vec<String>,
    pub recent: Vec<ActivityPreview>,
}

const RECENT_ACTIVITIES: usize = 10;

/// Everything the event landing page shows.
pub fn event_overview(conn: &Connection, event_id: &str) -> Result<EventOverview> {
    let event = get_event(conn, event_id)?;
    let recent = activities::recent_activities(conn, event_id, RECENT_ACTIVITIES)?
        .into_iter()
        .map(|activity| -> Result<ActivityPreview> {
            let cover_url = photos::latest_ref_photo(conn, event_id, &activity.id)?
                .map(|p| p.data.url);
            Ok(ActivityPreview {
                activity,
                cover_url,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(EventOverview {
        event,
        member_count: count_members(conn, event_id)?,
        activity_count: count_activities(conn, event_id)?,
        day_ids: list_day_ids(conn, event_id)?,
        recent,
    })
}
