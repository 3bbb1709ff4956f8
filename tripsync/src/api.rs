use crate::{
    activities::NewActivity,
    auth::{self, Claims},
    client::Client,
    config::Config,
    error::{Error, Result},
    events::NewEvent,
    outfits::OutfitMetaUpdate,
    profiles::ProfileUpdate,
};
use axum::{
    body::StreamBody,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};
use time::Duration;
use tokio_util::io::ReaderStream;
use tracing::info;
use tripsync_schema::{Doc, Member, Role};

const TOKEN_LIFETIME_HOURS: i64 = 24;
const MAX_TOKEN_LIFETIME_HOURS: i64 = 24 * 365;
const REFRESH_HINT_HEADER: &str = "x-token-expiring";

#[derive(Clone)]
pub struct AppState {
    pub client: Client,
    pub config: Config,
    secret: Arc<[u8]>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let client = Client::open(&config).await?;
        let secret =
            auth::load_or_create_secret(&config.data_dir, config.jwt_secret.as_deref()).await?;
        client.start_claims_sync();
        Ok(Self {
            client,
            config,
            secret: secret.into(),
        })
    }

    /// Issue a bearer token carrying the user's current event claims.
    pub async fn issue_token(&self, uid: &str) -> Result<String> {
        self.issue_token_for(uid, TOKEN_LIFETIME_HOURS).await
    }

    pub async fn issue_token_for(&self, uid: &str, hours: i64) -> Result<String> {
        if !(1..=MAX_TOKEN_LIFETIME_HOURS).contains(&hours) {
            return Err(Error::validation(format!(
                "token lifetime must be between 1 and {MAX_TOKEN_LIFETIME_HOURS} hours"
            )));
        }
        let events = self.client.claims(uid).await?;
        auth::issue_jwt(&self.secret, uid, events, Duration::hours(hours))
    }

    fn verify(&self, token: &str) -> Result<Claims> {
        auth::verify_jwt(&self.secret, token)
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/me", get(me).put(update_me))
        .route("/api/me/avatar", post(upload_avatar))
        .route("/api/token/refresh", post(refresh_token))
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/:id", get(get_event))
        .route("/api/events/:id/overview", get(event_overview))
        .route("/api/events/:id/members", get(list_members).post(add_member))
        .route("/api/events/:id/members/:uid", delete(remove_member))
        .route("/api/events/:id/days", get(list_days).post(create_day))
        .route("/api/events/:id/days/:day/activities", get(day_activities))
        .route(
            "/api/events/:id/activities",
            get(list_activities).post(add_activity),
        )
        .route("/api/events/:id/activities/:aid", get(get_activity))
        .route(
            "/api/events/:id/activities/:aid/ref-photos",
            get(list_ref_photos).post(upload_ref_photo),
        )
        .route(
            "/api/events/:id/activities/:aid/outfits",
            get(list_outfits).post(upload_outfit),
        )
        .route(
            "/api/events/:id/activities/:aid/outfits/meta",
            put(update_outfit_meta),
        )
        .route(
            "/api/events/:id/activities/:aid/outfits/:pid",
            delete(delete_outfit),
        )
        .route(
            "/api/events/:id/activities/:aid/outfits/:pid/like",
            post(like_outfit).delete(unlike_outfit),
        )
        .route(
            "/api/events/:id/activities/:aid/outfits/:pid/like/toggle",
            post(toggle_like),
        )
        .route(
            "/api/events/:id/gallery",
            get(list_gallery).post(upload_gallery),
        )
        .route("/api/events/:id/invites", post(create_invite))
        .route("/api/events/:id/invites/:token", delete(expire_invite))
        .route("/api/join/:token", post(join))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes() as usize));
    Router::new()
        .route("/api/health", get(health))
        .route("/api/join/:token", get(join_preview))
        .route("/objects/*path", get(download_object))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(Error::Unauthenticated)?;
    let claims = state.verify(token).map_err(|_| Error::Unauthenticated)?;
    let expiring = auth::needs_refresh(&claims, Duration::hours(1));
    req.extensions_mut().insert(claims);
    let mut resp = next.run(req).await;
    if expiring {
        resp.headers_mut()
            .insert(REFRESH_HINT_HEADER, HeaderValue::from_static("1"));
    }
    Ok(resp)
}

async fn require_member(state: &AppState, claims: &Claims, event_id: &str) -> Result<()> {
    let (claims, event_id) = (claims.clone(), event_id.to_string());
    state
        .client
        .with_conn(move |conn| auth::authorize_event(conn, &claims, &event_id))
        .await
}

async fn require_role(
    state: &AppState,
    claims: &Claims,
    event_id: &str,
    allowed: fn(Role) -> bool,
) -> Result<Role> {
    let (uid, event_id) = (claims.sub.clone(), event_id.to_string());
    state
        .client
        .with_conn(move |conn| auth::require_role(conn, &event_id, &uid, allowed))
        .await
}

fn can_manage(role: Role) -> bool {
    role.can_manage()
}

fn can_contribute(role: Role) -> bool {
    role.can_contribute()
}

struct Upload {
    data: Bytes,
    caption: Option<String>,
}

/// The first file field of a multipart body plus an optional `caption` field.
async fn read_upload(mut multipart: Multipart) -> Result<Upload> {
    let bad = |e: axum::extract::multipart::MultipartError| Error::validation(e.to_string());
    let mut data = None;
    let mut caption = None;
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().map(str::to_string);
        let is_file = field.file_name().is_some() || name.as_deref() == Some("file");
        if name.as_deref() == Some("caption") {
            caption = Some(field.text().await.map_err(bad)?).filter(|c| !c.trim().is_empty());
        } else if is_file && data.is_none() {
            data = Some(field.bytes().await.map_err(bad)?);
        }
    }
    let data = data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| Error::validation("missing file"))?;
    Ok(Upload { data, caption })
}

// profile

async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.client.get_profile(&claims.sub).await?))
}

async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(update): Json<ProfileUpdate>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.client.upsert_profile(&claims.sub, update).await?))
}

async fn upload_avatar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    let upload = read_upload(multipart).await?;
    Ok(Json(
        state.client.upload_avatar(&claims.sub, upload.data).await?,
    ))
}

#[derive(Serialize)]
struct TokenResp {
    token: String,
    events: BTreeMap<String, bool>,
}

async fn refresh_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse> {
    let token = state.issue_token(&claims.sub).await?;
    let events = state.verify(&token)?.events;
    Ok(Json(TokenResp { token, events }))
}

// events

async fn list_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.client.list_events_for_user(&claims.sub).await?))
}

async fn create_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(new): Json<NewEvent>,
) -> Result<impl IntoResponse> {
    let id = state.client.create_event(&claims.sub, new).await?;
    info!(event_id = %id, uid = %claims.sub, "event created via api");
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn get_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(state.client.get_event(&id).await?))
}

async fn event_overview(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(state.client.event_overview(&id).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberView {
    #[serde(flatten)]
    member: Doc<Member>,
    display_name: String,
}

async fn list_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    let members = state.client.list_members(&id).await?;
    let mut names = state
        .client
        .display_names(members.iter().map(|m| m.id.clone()).collect())
        .await?;
    let view: Vec<MemberView> = members
        .into_iter()
        .map(|member| MemberView {
            display_name: names.remove(&member.id).unwrap_or_default(),
            member,
        })
        .collect();
    Ok(Json(view))
}

#[derive(Deserialize)]
struct AddMemberReq {
    uid: String,
    #[serde(default)]
    role: Option<Role>,
}

async fn add_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<AddMemberReq>,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_manage).await?;
    let role = req.role.unwrap_or(Role::Member);
    Ok(Json(state.client.add_member(&id, &req.uid, role).await?))
}

async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, uid)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    if uid != claims.sub {
        require_role(&state, &claims, &id, can_manage).await?;
    }
    let removed = state.client.remove_member(&id, &uid).await?;
    if !removed {
        return Err(Error::not_found("member"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_days(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(state.client.list_day_ids(&id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDayReq {
    day_id: String,
}

async fn create_day(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<CreateDayReq>,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_manage).await?;
    let created = state.client.create_day(&id, &req.day_id).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "dayId": req.day_id, "created": created }))))
}

// activities

async fn list_activities(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(state.client.list_activities(&id).await?))
}

async fn day_activities(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, day)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(state.client.list_activities_for_day(&id, &day).await?))
}

async fn add_activity(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(new): Json<NewActivity>,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_contribute).await?;
    let activity = state.client.add_activity(&id, &claims.sub, new).await?;
    Ok((StatusCode::CREATED, Json(activity)))
}

async fn get_activity(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(state.client.get_activity(&id, &aid).await?))
}

// photos

async fn list_ref_photos(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(state.client.list_ref_photos(&id, &aid).await?))
}

async fn upload_ref_photo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid)): Path<(String, String)>,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_contribute).await?;
    let upload = read_upload(multipart).await?;
    let photo = state
        .client
        .upload_ref_photo(&id, &aid, &claims.sub, upload.data)
        .await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

async fn list_gallery(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(state.client.list_gallery_photos(&id).await?))
}

async fn upload_gallery(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_contribute).await?;
    let upload = read_upload(multipart).await?;
    let photo = state
        .client
        .upload_gallery_photo(&id, &claims.sub, upload.data)
        .await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

// outfits

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutfitsView {
    outfits: BTreeMap<String, crate::outfits::OutfitBundle>,
    display_names: BTreeMap<String, String>,
}

async fn list_outfits(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    let outfits = state.client.list_outfits_with_photos(&id, &aid).await?;
    let display_names = state
        .client
        .display_names(outfits.keys().cloned().collect())
        .await?;
    Ok(Json(OutfitsView {
        outfits,
        display_names,
    }))
}

async fn upload_outfit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid)): Path<(String, String)>,
    multipart: Multipart,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_contribute).await?;
    let upload = read_upload(multipart).await?;
    let photo = state
        .client
        .upload_outfit_photo(&id, &aid, &claims.sub, upload.data, upload.caption)
        .await?;
    Ok((StatusCode::CREATED, Json(photo)))
}

async fn update_outfit_meta(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid)): Path<(String, String)>,
    Json(update): Json<OutfitMetaUpdate>,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_contribute).await?;
    Ok(Json(
        state
            .client
            .upsert_outfit_meta(&id, &aid, &claims.sub, update)
            .await?,
    ))
}

async fn delete_outfit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid, pid)): Path<(String, String, String)>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    state
        .client
        .delete_outfit_photo(&id, &aid, &pid, &claims.sub)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_outfit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid, pid)): Path<(String, String, String)>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(
        state
            .client
            .set_outfit_like(&id, &aid, &pid, &claims.sub, true)
            .await?,
    ))
}

async fn unlike_outfit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid, pid)): Path<(String, String, String)>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(
        state
            .client
            .set_outfit_like(&id, &aid, &pid, &claims.sub, false)
            .await?,
    ))
}

async fn toggle_like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, aid, pid)): Path<(String, String, String)>,
) -> Result<impl IntoResponse> {
    require_member(&state, &claims, &id).await?;
    Ok(Json(
        state
            .client
            .toggle_outfit_like(&id, &aid, &pid, &claims.sub)
            .await?,
    ))
}

// invites

#[derive(Deserialize, Default)]
struct CreateInviteReq {
    #[serde(default)]
    role: Option<Role>,
}

async fn create_invite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    body: Option<Json<CreateInviteReq>>,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_manage).await?;
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let link = state.client.create_invite(&id, req.role).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn expire_invite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, token)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    require_role(&state, &claims, &id, can_manage).await?;
    Ok(Json(state.client.expire_invite(&id, &token).await?))
}

#[derive(Deserialize)]
struct JoinQuery {
    #[serde(default)]
    e: Option<String>,
}

async fn join_preview(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(q): Query<JoinQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state.client.invite_preview(q.e.as_deref(), &token).await?,
    ))
}

async fn join(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(token): Path<String>,
    Query(q): Query<JoinQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state
            .client
            .join_event_with_token(q.e.as_deref(), &token, &claims.sub)
            .await?,
    ))
}

// objects

async fn download_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse> {
    let local = state
        .client
        .objects()
        .local_path(path.trim_start_matches('/'))?;
    let file = tokio::fs::File::open(&local)
        .await
        .map_err(|_| Error::not_found("object"))?;
    let mime = mime_guess::from_path(&local).first_or_octet_stream();
    let body = StreamBody::new(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, mime.to_string())], body))
}

/// Run the HTTP server until interrupted.
pub async fn run_http_server(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    info!(%addr, origin = %state.config.public_origin, "listening");
    hyper::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
