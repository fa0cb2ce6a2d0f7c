//! HTTP surface tests: token issuance, the delivery gate and sync routes
//!
//! Run with: cargo test -p playsync-api --test http_tests

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use playsync_api::{create_router, AppState};
use playsync_cluster::DeviceMessageHub;
use playsync_core::{
    models::{DeviceId, PlaybackSession, SessionId, UserId, VideoId, VideoQuality},
    repository::{MemoryPlaybackSessions, MemorySyncStateRepository},
    service::{
        FsMediaCatalog, StaticCapabilityProfile, StreamTokenService, SyncEngine, SyncEngineConfig,
    },
    Config,
};

const FILE_SIZE: usize = 1000;

struct TestApp {
    router: Router,
    tokens: Arc<StreamTokenService>,
    engine: SyncEngine,
    _media: tempfile::TempDir,
}

fn media_bytes() -> Vec<u8> {
    (0..FILE_SIZE).map(|i| (i % 251) as u8).collect()
}

fn test_app() -> TestApp {
    let media = tempfile::tempdir().unwrap();
    let video_dir = media.path().join("v1");
    std::fs::create_dir_all(&video_dir).unwrap();
    std::fs::write(video_dir.join("720p.mp4"), media_bytes()).unwrap();

    let tokens = Arc::new(StreamTokenService::new(
        b"integration-secret-integration-secret".to_vec(),
        ChronoDuration::hours(2),
        "",
    ));

    let sessions = MemoryPlaybackSessions::new();
    sessions.upsert(PlaybackSession::new(SessionId::from("party")));
    let hub = DeviceMessageHub::new();
    let engine = SyncEngine::new(
        Arc::new(MemorySyncStateRepository::new()),
        Arc::new(sessions),
        Arc::new(StaticCapabilityProfile::default()),
        Arc::new(hub.clone()),
        SyncEngineConfig::default(),
    );

    let state = AppState {
        tokens: tokens.clone(),
        catalog: Arc::new(FsMediaCatalog::new(media.path())),
        engine: engine.clone(),
        message_hub: hub,
        config: Arc::new(Config::default()),
    };

    TestApp {
        router: create_router(state),
        tokens,
        engine,
        _media: media,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    fn stream_url(&self) -> String {
        self.tokens
            .issue_signed_url(&VideoId::from("v1"), &UserId::from("alice"), VideoQuality::P720)
            .unwrap()
            .url
    }

    async fn get_range(&self, url: &str, range: Option<&str>) -> axum::response::Response {
        let mut builder = Request::builder().uri(url);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, uri: &str, body: Value) -> axum::response::Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'a>(response: &'a axum::response::Response, name: header::HeaderName) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn test_issue_token() {
    let app = test_app();
    let response = app
        .send(
            Request::builder()
                .uri("/api/videos/v1/token?quality=720p")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["videoId"], "v1");
    assert_eq!(body["quality"], "720p");
    assert!(body["signedUrl"]
        .as_str()
        .unwrap()
        .starts_with("/api/videos/v1/stream/secure?token="));

    let validated = app
        .post_json(
            "/api/videos/v1/validate-token",
            json!({ "token": body["token"] }),
        )
        .await;
    assert_eq!(validated.status(), StatusCode::OK);
    assert_eq!(body_json(validated).await["valid"], true);

    // A token for v1 says nothing about v2
    let wrong_video = app
        .post_json(
            "/api/videos/v2/validate-token",
            json!({ "token": body["token"] }),
        )
        .await;
    assert_eq!(wrong_video.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_issue_token_rejections() {
    let app = test_app();

    let anonymous = app
        .send(
            Request::builder()
                .uri("/api/videos/v1/token")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let missing = app
        .send(
            Request::builder()
                .uri("/api/videos/nope/token")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let bad_quality = app
        .send(
            Request::builder()
                .uri("/api/videos/v1/token?quality=8k")
                .header("x-user-id", "alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(bad_quality.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_body_without_range() {
    let app = test_app();
    let response = app.get_range(&app.stream_url(), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "1000");
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/mp4");
    assert_eq!(
        header_str(&response, header::CACHE_CONTROL),
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(header_str(&response, header::PRAGMA), "no-cache");
    assert_eq!(header_str(&response, header::EXPIRES), "0");
    assert_eq!(body_bytes(response).await, media_bytes());
}

#[tokio::test]
async fn test_partial_content() {
    let app = test_app();
    let url = app.stream_url();
    let bytes = media_bytes();

    let cases = [
        ("bytes=100-199", 100usize, 199usize),
        ("bytes=0-99", 0, 99),
        ("bytes=900-", 900, 999),
        ("bytes=-100", 900, 999),
        ("bytes=950-5000", 950, 999),
        ("bytes=10-19, 30-39", 10, 19),
    ];
    for (range, start, end) in cases {
        let response = app.get_range(&url, Some(range)).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT, "{range}");
        assert_eq!(
            header_str(&response, header::CONTENT_RANGE),
            format!("bytes {start}-{end}/1000"),
            "{range}"
        );
        assert_eq!(
            header_str(&response, header::CONTENT_LENGTH),
            (end - start + 1).to_string(),
            "{range}"
        );
        assert_eq!(body_bytes(response).await, bytes[start..=end].to_vec(), "{range}");
    }
}

#[tokio::test]
async fn test_unsatisfiable_ranges() {
    let app = test_app();
    let url = app.stream_url();

    let cases = [
        "bytes=2000-3000",
        "bytes=1000-",
        "bytes=500-100",
        "bytes=-0",
        "bytes=abc",
        "items=0-1",
    ];
    for range in cases {
        let response = app.get_range(&url, Some(range)).await;
        assert_eq!(
            response.status(),
            StatusCode::RANGE_NOT_SATISFIABLE,
            "{range}"
        );
        assert_eq!(
            header_str(&response, header::CONTENT_RANGE),
            "bytes */1000",
            "{range}"
        );
    }
}

#[tokio::test]
async fn test_gate_rejects_bad_tokens() {
    let app = test_app();

    let tampered = app.stream_url().replace("quality=720p", "quality=1080p");
    let response = app.get_range(&tampered, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let expired_token = app
        .tokens
        .issue_at(
            &VideoId::from("v1"),
            &UserId::from("alice"),
            VideoQuality::P720,
            Utc::now() - ChronoDuration::hours(3),
        )
        .unwrap();
    let expired = app
        .get_range(&app.tokens.signed_url_for(&expired_token), None)
        .await;
    assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);

    let unsigned = app
        .get_range("/api/videos/v1/stream/secure?expires=abc", None)
        .await;
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    // Expired and forged look the same to the caller
    assert_eq!(body_json(expired).await, body_json(response).await);
}

#[tokio::test]
async fn test_missing_rendition_is_404() {
    let app = test_app();
    let url = app
        .tokens
        .issue_signed_url(&VideoId::from("v1"), &UserId::from("alice"), VideoQuality::P2160)
        .unwrap()
        .url;
    let response = app.get_range(&url, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sync_routes() {
    let app = test_app();

    for (device, platform) in [("phone", "mobile"), ("tv", "tv")] {
        let joined = app
            .post_json(
                &format!("/api/sessions/party/devices/{device}"),
                json!({ "platform": platform }),
            )
            .await;
        assert_eq!(joined.status(), StatusCode::CREATED);
    }

    let accepted = app
        .post_json(
            "/api/sessions/party/devices/phone/position",
            json!({ "position": 42.5 }),
        )
        .await;
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(accepted).await["kind"], "position");

    let mut propagated = false;
    for _ in 0..100 {
        let tv = app
            .engine
            .get_replica(&SessionId::from("party"), &DeviceId::from("tv"))
            .await
            .unwrap();
        if tv.sync_data.position == 42.5 {
            propagated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(propagated);

    let replicas = app
        .send(
            Request::builder()
                .uri("/api/sessions/party/replicas")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(replicas.status(), StatusCode::OK);
    assert_eq!(body_json(replicas).await.as_array().unwrap().len(), 2);

    let no_conflict = app
        .post_json(
            "/api/sessions/party/devices/tv/conflict/resolve",
            json!({ "strategy": "latest_wins" }),
        )
        .await;
    assert_eq!(no_conflict.status(), StatusCode::CONFLICT);

    let unknown = app
        .send(
            Request::builder()
                .uri("/api/sessions/party/devices/fridge")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_health() {
    let app = test_app();
    let response = app
        .send(
            Request::builder()
                .uri("/api/admin/sync/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    let metrics = app
        .send(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await;
    assert_eq!(metrics.status(), StatusCode::OK);
}
