//! Integration tests for the HTTP gateway and the lobby subscription socket.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use lobbygate::prelude::*;
use lobbygate::{API_KEY_HEADER, router};
use lobbygate_gateway::{RateLimitRule, RawApiKey, UsageOutcome};
use lobbygate_protocol::{PushStateRequest, SessionToken};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

// =========================================================================
// Helpers
// =========================================================================

struct Fixture {
    lobby: Arc<Lobby>,
    app: Router,
    key: RawApiKey,
    room: RoomId,
    token: SessionToken,
}

async fn fixture_with(config: GatewayConfig, scope: &[Permission], class: RateLimitClass) -> Fixture {
    let lobby = Arc::new(Lobby::new(config).expect("lobby should build"));
    let (_, key) = lobby
        .provision_key("trivia-server", scope.iter().copied(), class)
        .await
        .unwrap();

    let (room, _) = lobby.open_room("trivia", 2).await.unwrap();
    lobby.start_game(room).await.unwrap();
    let launch = lobby
        .launch(
            room,
            LaunchRequest {
                player: Some(PlatformUserId::new("user-1")),
                display_name: Some("Ada".into()),
                ..LaunchRequest::default()
            },
        )
        .await
        .unwrap();

    Fixture {
        app: router(Arc::clone(&lobby)),
        lobby,
        key,
        room,
        token: launch.token,
    }
}

async fn fixture() -> Fixture {
    fixture_with(GatewayConfig::default(), &Permission::ALL, RateLimitClass::Trusted).await
}

fn get(uri: &str, key: Option<&RawApiKey>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key.expose());
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, key: &RawApiKey, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(API_KEY_HEADER, key.expose())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// =========================================================================
// HTTP surface
// =========================================================================

#[tokio::test]
async fn test_healthz_ok() {
    let f = fixture().await;
    let response = send(&f.app, get("/healthz", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_validate_missing_key_is_unauthorized() {
    let f = fixture().await;
    let uri = format!("/v1/rooms/{}/validate", f.token.as_str());

    let response = send(&f.app, get(&uri, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "invalid_api_key");

    let records = f.lobby.auth().ledger().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].api_key_id, None);
    assert_eq!(records[0].endpoint, "session.validate");
    assert_eq!(records[0].outcome, UsageOutcome::Denied);
}

#[tokio::test]
async fn test_validate_returns_session_info_without_room_code() {
    let f = fixture().await;
    let code = f.lobby.directory().get(f.room).await.unwrap().code;
    let uri = format!("/v1/rooms/{}/validate", f.token.as_str());

    let response = send(&f.app, get(&uri, Some(&f.key))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["roomId"], f.room.0);
    assert_eq!(body["gameType"], "trivia");
    assert_eq!(body["playerId"], "user-1");
    assert_eq!(body["phase"], "in_game");
    assert!(!body.to_string().contains(code.as_str()));
}

#[tokio::test]
async fn test_validate_unknown_token_is_not_found() {
    let f = fixture().await;
    let response = send(&f.app, get("/v1/rooms/deadbeef/validate", Some(&f.key))).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "token_not_found");
}

#[tokio::test]
async fn test_unknown_token_with_bad_key_is_unauthorized() {
    let f = fixture().await;
    let bogus = RawApiKey::new("lgk_nope");
    let response = send(&f.app, get("/v1/rooms/deadbeef/validate", Some(&bogus))).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_push_stale_then_pull_returns_authoritative_state() {
    let f = fixture().await;
    let uri = format!("/v1/rooms/{}/state", f.token.as_str());

    let response = send(&f.app, post(&uri, &f.key, json!({ "version": 3, "payload": { "round": 3 } }))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["version"], 3);

    let response = send(&f.app, post(&uri, &f.key, json!({ "version": 2, "payload": { "round": 2 } }))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["error"], "stale_write");
    assert_eq!(body["currentVersion"], 3);

    let response = send(&f.app, get(&uri, Some(&f.key))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "version": 3, "payload": { "round": 3 } }));
}

#[tokio::test]
async fn test_push_malformed_body_is_bad_request() {
    let f = fixture().await;
    let uri = format!("/v1/rooms/{}/state", f.token.as_str());

    let response = send(&f.app, post(&uri, &f.key, json!({ "payload": {} }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_push_read_only_key_is_forbidden() {
    let f = fixture_with(
        GatewayConfig::default(),
        &Permission::READ_ONLY,
        RateLimitClass::Trusted,
    )
    .await;
    let uri = format!("/v1/rooms/{}/state", f.token.as_str());

    let response = send(&f.app, post(&uri, &f.key, json!({ "version": 1, "payload": null }))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "permission_denied");
}

#[tokio::test]
async fn test_rate_limit_exceeded_has_retry_after() {
    let mut config = GatewayConfig::default();
    config.rate_limits.standard = Some(RateLimitRule::per_minute(2));
    let f = fixture_with(config, &Permission::ALL, RateLimitClass::Standard).await;
    let uri = format!("/v1/rooms/{}/validate", f.token.as_str());

    for _ in 0..2 {
        let response = send(&f.app, get(&uri, Some(&f.key))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&f.app, get(&uri, Some(&f.key))).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn test_player_status_unbound_then_bound() {
    let f = fixture().await;
    let status_uri = |player: &str| {
        format!("/v1/rooms/{}/players/{player}/status", f.token.as_str())
    };

    let response = send(&f.app, post(&status_uri("ext-42"), &f.key, json!({ "status": "online" }))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "player_not_found");

    let join_uri = format!("/v1/rooms/{}/join", f.token.as_str());
    let response = send(&f.app, post(&join_uri, &f.key, json!({ "externalPlayerId": "ext-42" }))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["platformUserId"], "user-1");

    let response = send(&f.app, post(&status_uri("ext-99"), &f.key, json!({ "status": "away" }))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &f.app,
        post(&status_uri("ext-42"), &f.key, json!({ "status": "in_game", "location": "round-2" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["platformUserId"], "user-1");
    assert_eq!(body["status"], "in_game");
}

#[tokio::test]
async fn test_event_retry_with_same_key_is_duplicate() {
    let f = fixture().await;
    let uri = format!("/v1/rooms/{}/events", f.token.as_str());
    let event = json!({ "type": "round_won", "data": { "by": "user-1" }, "idempotencyKey": "r1" });

    let response = send(&f.app, post(&uri, &f.key, event.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "sequence": 1, "duplicate": false }));

    let response = send(&f.app, post(&uri, &f.key, event)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "sequence": 1, "duplicate": true }));
}

#[tokio::test]
async fn test_terminated_room_token_is_not_found() {
    let f = fixture().await;
    f.lobby.terminate(f.room).await.unwrap();
    let uri = format!("/v1/rooms/{}/state", f.token.as_str());

    let response = send(&f.app, get(&uri, Some(&f.key))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_token_is_gone() {
    let mut config = GatewayConfig::default();
    config.session.default_ttl = Duration::from_millis(50);
    let f = fixture_with(config, &Permission::ALL, RateLimitClass::Trusted).await;
    let uri = format!("/v1/rooms/{}/validate", f.token.as_str());

    tokio::time::sleep(Duration::from_millis(80)).await;

    let response = send(&f.app, get(&uri, Some(&f.key))).await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(json_body(response).await["error"], "token_expired");
}

// =========================================================================
// Lobby subscription
// =========================================================================

#[tokio::test]
async fn test_subscribe_unknown_room_is_not_found() {
    let f = fixture().await;
    let response = send(&f.app, get("/lobby/rooms/999/subscribe", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subscriber_receives_push_then_termination() {
    let server = GatewayServer::builder()
        .bind(([127, 0, 0, 1], 0).into())
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr().unwrap();
    let lobby = Arc::clone(server.lobby());

    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.run_until(async move {
        let _ = stopped.await;
    }));

    let (_, key) = lobby
        .provision_key("trivia-server", Permission::ALL, RateLimitClass::Trusted)
        .await
        .unwrap();
    let (room, _) = lobby.open_room("trivia", 2).await.unwrap();
    lobby.start_game(room).await.unwrap();
    let launch = lobby.launch(room, LaunchRequest::default()).await.unwrap();

    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/lobby/rooms/{}/subscribe", room.0))
            .await
            .expect("should connect");

    let caller = lobby
        .auth()
        .authenticate(Some(&key), Permission::WriteState, "test")
        .await
        .unwrap();
    lobby
        .sync()
        .push(
            &caller,
            &launch.token,
            PushStateRequest {
                version: 1,
                payload: json!({ "board": [1, 2, 3] }),
            },
        )
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("delta should arrive")
        .unwrap()
        .unwrap();
    let delta: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(delta["type"], "StateChanged");
    assert_eq!(delta["version"], 1);
    assert_eq!(delta["payload"], json!({ "board": [1, 2, 3] }));

    lobby.terminate(room).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("phase change should arrive")
        .unwrap()
        .unwrap();
    let delta: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(delta["type"], "PhaseChanged");
    assert_eq!(delta["phase"], "terminated");

    let closing = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("socket should close");
    assert!(matches!(closing, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    drop(ws);

    let _ = stop.send(());
    serving.await.unwrap().unwrap();
}
