use axum::http::StatusCode;
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use serde_json::{json, Value};
use std::io::Cursor;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::task::JoinHandle;
use tripsync::{
    api::{build_router, AppState},
    config::Config,
};

async fn spawn_server() -> (SocketAddr, JoinHandle<()>, AppState, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        public_origin: format!("http://{addr}"),
        max_upload_mb: 5,
        logging_enabled: false,
        jwt_secret: None,
        single_use_invites: true,
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state, tmp)
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let buf = ImageBuffer::from_pixel(width, height, Rgb([90u8, 160, 220]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(buf)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .unwrap();
    out
}

fn photo_form(bytes: Vec<u8>) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name("look.png")
        .mime_str("image/png")
        .unwrap();
    reqwest::multipart::Form::new().part("file", part)
}

async fn create_trip(client: &reqwest::Client, addr: SocketAddr, token: &str) -> String {
    let resp = client
        .post(format!("http://{addr}/api/events"))
        .bearer_auth(token)
        .json(&json!({
            "type": "trip",
            "name": "Mallorca Friends",
            "startDate": "2025-09-28",
            "endDate": "2025-09-30"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let v: Value = resp.json().await.unwrap();
    v["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn mallorca_trip_end_to_end() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let owner = state.issue_token("owner").await.unwrap();
    let id = create_trip(&client, addr, &owner).await;

    let overview: Value = client
        .get(format!("http://{addr}/api/events/{id}/overview"))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(overview["memberCount"], 1);
    assert_eq!(overview["activityCount"], 0);
    assert_eq!(
        overview["dayIds"],
        json!(["2025-09-28", "2025-09-29", "2025-09-30"])
    );
    assert_eq!(overview["event"]["type"], "trip");

    let resp = client
        .post(format!("http://{addr}/api/events/{id}/activities"))
        .bearer_auth(&owner)
        .json(&json!({"title": "Beach", "time": "11:00", "dayId": "2025-09-29"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let activity: Value = resp.json().await.unwrap();
    assert_eq!(activity["createdBy"], "owner");
    assert_eq!(activity["kind"], "activity");

    let on_day: Value = client
        .get(format!(
            "http://{addr}/api/events/{id}/days/2025-09-29/activities"
        ))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(on_day.as_array().unwrap().len(), 1);
    assert_eq!(on_day[0]["title"], "Beach");

    let list: Value = client
        .get(format!("http://{addr}/api/events"))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list[0]["id"], id.as_str());

    server.abort();
}

#[tokio::test]
async fn invite_join_and_claims() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let owner = state.issue_token("owner").await.unwrap();
    let guest = state.issue_token("guest").await.unwrap();
    let id = create_trip(&client, addr, &owner).await;

    // strangers cannot read the event
    let resp = client
        .get(format!("http://{addr}/api/events/{id}"))
        .bearer_auth(&guest)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = client
        .post(format!("http://{addr}/api/events/{id}/invites"))
        .bearer_auth(&owner)
        .json(&json!({"role": "viewer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let invite: Value = resp.json().await.unwrap();
    let token = invite["token"].as_str().unwrap().to_string();
    assert_eq!(
        invite["url"].as_str().unwrap(),
        format!("http://{addr}/join/{token}?e={id}")
    );

    // preview needs no token
    let preview: Value = client
        .get(format!("http://{addr}/api/join/{token}?e={id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(preview["eventName"], "Mallorca Friends");
    assert_eq!(preview["status"], "pending");

    for already in [false, true] {
        let joined: Value = client
            .post(format!("http://{addr}/api/join/{token}?e={id}"))
            .bearer_auth(&guest)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(joined["already"], already);
        assert_eq!(joined["role"], "viewer");
    }

    // single use: a third person is turned away
    let late = state.issue_token("late").await.unwrap();
    let resp = client
        .post(format!("http://{addr}/api/join/{token}?e={id}"))
        .bearer_auth(&late)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_invite");

    // the guest's token predates the join; membership is read directly
    let resp = client
        .get(format!("http://{addr}/api/events/{id}"))
        .bearer_auth(&guest)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // viewers read but do not contribute
    let resp = client
        .post(format!("http://{addr}/api/events/{id}/activities"))
        .bearer_auth(&guest)
        .json(&json!({"title": "Karaoke"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // claims catch up eventually and land in refreshed tokens
    let mut events = Value::Null;
    for _ in 0..50 {
        let refreshed: Value = client
            .post(format!("http://{addr}/api/token/refresh"))
            .bearer_auth(&guest)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        events = refreshed["events"].clone();
        if events.get(&id).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(events[&id], true);

    server.abort();
}

#[tokio::test]
async fn outfit_likes_and_delete() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let owner = state.issue_token("owner").await.unwrap();
    let friend = state.issue_token("friend").await.unwrap();
    let id = create_trip(&client, addr, &owner).await;
    client
        .post(format!("http://{addr}/api/events/{id}/members"))
        .bearer_auth(&owner)
        .json(&json!({"uid": "friend", "role": "member"}))
        .send()
        .await
        .unwrap();
    let activity: Value = client
        .post(format!("http://{addr}/api/events/{id}/activities"))
        .bearer_auth(&owner)
        .json(&json!({"title": "Dinner", "time": "20:00", "dayId": "2025-09-28"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let aid = activity["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("http://{addr}/api/events/{id}/activities/{aid}/outfits"))
        .bearer_auth(&owner)
        .multipart(photo_form(png(2000, 1000)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let photo: Value = resp.json().await.unwrap();
    assert_eq!(photo["width"], 1600);
    assert_eq!(photo["height"], 800);
    let pid = photo["id"].as_str().unwrap().to_string();

    // stored object is served back as jpeg
    let resp = client
        .get(photo["url"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");

    let like_url = format!("http://{addr}/api/events/{id}/activities/{aid}/outfits/{pid}/like");
    for _ in 0..2 {
        let state: Value = client
            .post(&like_url)
            .bearer_auth(&friend)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(state, json!({"liked": true, "likesCount": 1}));
    }

    client
        .put(format!(
            "http://{addr}/api/events/{id}/activities/{aid}/outfits/meta"
        ))
        .bearer_auth(&friend)
        .json(&json!({"items": ["linen shirt"], "notes": "still deciding"}))
        .send()
        .await
        .unwrap();
    let outfits: Value = client
        .get(format!("http://{addr}/api/events/{id}/activities/{aid}/outfits"))
        .bearer_auth(&friend)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outfits["outfits"]["owner"]["photos"][0]["likedBy"], json!(["friend"]));
    assert_eq!(outfits["outfits"]["friend"]["photos"], json!([]));
    assert_eq!(outfits["displayNames"]["friend"], "Friend");

    // only the uploader may delete
    let photo_url = format!("http://{addr}/api/events/{id}/activities/{aid}/outfits/{pid}");
    let resp = client
        .delete(&photo_url)
        .bearer_auth(&friend)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = client
        .delete(&photo_url)
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = client
        .get(photo["url"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.abort();
}

#[tokio::test]
async fn gallery_and_profile_uploads() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let owner = state.issue_token("owner").await.unwrap();
    let id = create_trip(&client, addr, &owner).await;

    let uploads = (0..3).map(|_| {
        client
            .post(format!("http://{addr}/api/events/{id}/gallery"))
            .bearer_auth(&owner)
            .multipart(photo_form(png(120, 80)))
            .send()
    });
    for resp in futures::future::join_all(uploads).await {
        assert_eq!(resp.unwrap().status(), StatusCode::CREATED);
    }
    let gallery: Value = client
        .get(format!("http://{addr}/api/events/{id}/gallery"))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(gallery.as_array().unwrap().len(), 3);
    let activities: Value = client
        .get(format!("http://{addr}/api/events/{id}/activities"))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(activities, json!([]));

    // non-images are rejected
    let resp = client
        .post(format!("http://{addr}/api/events/{id}/gallery"))
        .bearer_auth(&owner)
        .multipart(photo_form(b"plain text".to_vec()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .put(format!("http://{addr}/api/me"))
        .bearer_auth(&owner)
        .json(&json!({"firstName": "Ana", "lastName": "Lopez", "email": "ana@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let profile: Value = client
        .post(format!("http://{addr}/api/me/avatar"))
        .bearer_auth(&owner)
        .multipart(photo_form(png(300, 300)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile["initials"], "AL");
    assert!(profile["photoURL"]
        .as_str()
        .unwrap()
        .contains("/objects/users/owner/avatar/"));

    server.abort();
}
