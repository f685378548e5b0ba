//! Integration tests for room state synchronization.
//!
//! Each test wires a full stack: session broker, key registry and limiter,
//! room directory, state store, broadcast hub, synchronizer.

use std::sync::Arc;
use std::time::Duration;

use lobbygate_gateway::{
    ApiKeyRegistry, AuthError, AuthorizedCaller, GatewayAuthenticator, RateLimitClass,
    RateLimitPolicy, RateLimiter, RawApiKey, UsageLedger,
};
use lobbygate_protocol::{
    ApiKeyId, EventKind, EventRequest, ExternalPlayerId, JoinRequest, LobbyDelta, Permission,
    PlatformUserId, PlayerPresence, PlayerStatusRequest, ProtocolError, PushStateRequest, RoomId,
    RoomPhase, SessionToken,
};
use lobbygate_room::{
    LobbyBroadcast, RoomDirectory, RoomStateStore, RoomStateSynchronizer, SyncConfig, SyncError,
};
use lobbygate_session::{EventClaim, IssueRequest, SessionBroker, SessionConfig, SessionError};
use serde_json::{Value, json};

// =========================================================================
// Fixture
// =========================================================================

const LOCK: Duration = Duration::from_secs(2);

struct Stack {
    broker: Arc<SessionBroker>,
    auth: GatewayAuthenticator,
    directory: Arc<RoomDirectory>,
    states: Arc<RoomStateStore>,
    broadcast: Arc<LobbyBroadcast>,
    sync: Arc<RoomStateSynchronizer>,
}

fn stack() -> Stack {
    stack_with(SyncConfig::default())
}

fn stack_with(config: SyncConfig) -> Stack {
    let broker = Arc::new(SessionBroker::new(SessionConfig::default()));
    let auth = GatewayAuthenticator::new(
        Arc::new(ApiKeyRegistry::new(LOCK)),
        Arc::new(RateLimiter::new(RateLimitPolicy::default(), LOCK)),
        Arc::new(UsageLedger::default()),
    );
    let states = Arc::new(RoomStateStore::new(config.event_history, LOCK));
    let broadcast = Arc::new(LobbyBroadcast::new(config.broadcast_capacity));
    let directory = Arc::new(RoomDirectory::new(
        Arc::clone(&broker),
        Arc::clone(&states),
        Arc::clone(&broadcast),
        LOCK,
    ));
    let sync = Arc::new(RoomStateSynchronizer::new(
        Arc::clone(&broker),
        auth.clone(),
        Arc::clone(&directory),
        Arc::clone(&states),
        Arc::clone(&broadcast),
        config,
    ));
    Stack {
        broker,
        auth,
        directory,
        states,
        broadcast,
        sync,
    }
}

impl Stack {
    async fn caller(&self, scope: &[Permission]) -> (ApiKeyId, AuthorizedCaller) {
        let (id, raw) = self
            .auth
            .registry()
            .provision("trivia-server", scope.iter().copied(), RateLimitClass::Trusted)
            .await
            .unwrap();
        (id, self.authorized(&raw, scope[0]).await)
    }

    async fn authorized(&self, raw: &RawApiKey, permission: Permission) -> AuthorizedCaller {
        self.auth.check(Some(raw), permission, "test").await.unwrap()
    }

    async fn in_game_room(&self) -> RoomId {
        let (room, _) = self.directory.open("trivia", 2).await.unwrap();
        self.directory.start_game(room).await.unwrap();
        room
    }

    async fn issue(&self, room: RoomId, player: Option<&str>) -> SessionToken {
        let ticket = self.directory.ticket(room).await.unwrap();
        self.broker
            .issue(
                &ticket,
                IssueRequest {
                    player: player.map(PlatformUserId::new),
                    game_type: "trivia".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }
}

fn push(version: u64, payload: Value) -> PushStateRequest {
    PushStateRequest { version, payload }
}

fn event(kind: EventKind, key: Option<&str>) -> EventRequest {
    EventRequest {
        kind,
        data: json!({}),
        idempotency_key: key.map(str::to_owned),
    }
}

fn ext(id: &str) -> ExternalPlayerId {
    ExternalPlayerId::new(id)
}

// =========================================================================
// Push / pull
// =========================================================================

#[tokio::test]
async fn test_push_stale_push_then_pull_scenario() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    let v1 = s.sync.push(&caller, &token, push(1, json!("P1"))).await.unwrap();
    assert_eq!(v1.version, 1);

    let stale = s.sync.push(&caller, &token, push(1, json!("P2"))).await;
    assert!(matches!(stale, Err(SyncError::StaleWrite { current: 1, .. })));

    let v2 = s.sync.push(&caller, &token, push(2, json!("P2"))).await.unwrap();
    assert_eq!(v2.version, 2);

    let snapshot = s.sync.pull(&caller, &token).await.unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.payload, json!("P2"));
}

#[tokio::test]
async fn test_push_version_zero_is_stale_against_fresh_state() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    let result = s.sync.push(&caller, &token, push(0, json!(1))).await;

    assert!(matches!(result, Err(SyncError::StaleWrite { current: 0, .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pushes_same_version_exactly_one_wins() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let sync = Arc::clone(&s.sync);
        let caller = caller.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            sync.push(&caller, &token, push(1, json!(i))).await
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(SyncError::StaleWrite { current: 1, .. }) => {}
            Err(other) => panic!("unexpected: {other}"),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pushes_final_version_is_max_accepted() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    let mut handles = Vec::new();
    for version in 1..=32u64 {
        let sync = Arc::clone(&s.sync);
        let caller = caller.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            (version, sync.push(&caller, &token, push(version, json!(version))).await)
        }));
    }

    let mut accepted = Vec::new();
    for handle in handles {
        let (version, result) = handle.await.unwrap();
        match result {
            Ok(resp) => {
                assert_eq!(resp.version, version);
                accepted.push(version);
            }
            Err(SyncError::StaleWrite { current, .. }) => assert!(version <= current),
            Err(other) => panic!("unexpected: {other}"),
        }
    }

    let snapshot = s.sync.pull(&caller, &token).await.unwrap();
    assert!(accepted.contains(&32));
    assert_eq!(snapshot.version, accepted.iter().copied().max().unwrap());
    assert_eq!(snapshot.payload, json!(32));
}

#[tokio::test]
async fn test_push_broadcasts_state_change() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;
    let mut rx = s.broadcast.subscribe(room);

    s.sync.push(&caller, &token, push(3, json!({"score": 7}))).await.unwrap();

    let delta = rx.recv().await.unwrap();
    assert_eq!(
        *delta,
        LobbyDelta::StateChanged {
            room_id: room,
            version: 3,
            payload: json!({"score": 7}),
        }
    );
}

#[tokio::test]
async fn test_push_payload_over_limit_rejected() {
    let s = stack_with(SyncConfig {
        max_payload_bytes: 16,
        ..Default::default()
    });
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    let result = s
        .sync
        .push(&caller, &token, push(1, json!("this payload is far too long")))
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Protocol(ProtocolError::PayloadTooLarge { limit: 16, .. }))
    ));
}

#[tokio::test]
async fn test_push_with_read_only_key_is_denied() {
    let s = stack();
    let (_, reader) = s.caller(&Permission::READ_ONLY).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    let result = s.sync.push(&reader, &token, push(1, json!(1))).await;

    assert!(matches!(
        result,
        Err(SyncError::Auth(AuthError::PermissionDenied(Permission::WriteState)))
    ));
    assert!(s.sync.pull(&reader, &token).await.is_ok());
}

#[tokio::test]
async fn test_push_after_key_revoked_is_rejected() {
    let s = stack();
    let (id, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    s.auth.registry().revoke(id).await.unwrap();

    let result = s.sync.push(&caller, &token, push(1, json!(1))).await;
    assert!(matches!(result, Err(SyncError::Auth(AuthError::InvalidApiKey))));
    assert_eq!(s.states.snapshot(room).await.unwrap().unwrap().version, 0);
}

#[tokio::test(start_paused = true)]
async fn test_push_with_expired_token_is_token_expired() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    tokio::time::advance(Duration::from_secs(3 * 3600 + 1)).await;

    let result = s.sync.push(&caller, &token, push(1, json!(1))).await;
    assert!(matches!(result, Err(SyncError::Session(SessionError::TokenExpired))));
}

#[tokio::test]
async fn test_push_after_terminate_is_token_not_found() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    s.directory.terminate(room).await.unwrap();

    let result = s.sync.push(&caller, &token, push(1, json!(1))).await;
    assert!(matches!(result, Err(SyncError::Session(SessionError::TokenNotFound))));
}

#[tokio::test]
async fn test_issue_with_ticket_read_before_terminate_is_refused() {
    let s = stack();
    let room = s.in_game_room().await;
    let ticket = s.directory.ticket(room).await.unwrap();

    s.directory.terminate(room).await.unwrap();
    let result = s
        .broker
        .issue(
            &ticket,
            IssueRequest {
                player: Some(PlatformUserId::new("U1")),
                game_type: "trivia".into(),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(ticket.phase, RoomPhase::InGame);
    assert!(matches!(
        result,
        Err(SessionError::InvalidRoomState { phase: RoomPhase::Terminated, .. })
    ));
    assert_eq!(s.broker.stats().await.unwrap().stored, 0);
}

// =========================================================================
// Validate / join / identity
// =========================================================================

#[tokio::test]
async fn test_validate_session_returns_context_without_room_code() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let (room, code) = s.directory.open("trivia", 3).await.unwrap();
    s.directory.start_game(room).await.unwrap();
    let token = s.issue(room, Some("U1")).await;

    let info = s.sync.validate_session(&caller, &token).await.unwrap();

    assert_eq!(info.room_id, room);
    assert_eq!(info.phase, RoomPhase::InGame);
    assert_eq!(info.expected_players, 3);
    assert_eq!(info.player_id, Some(PlatformUserId::new("U1")));
    let body = serde_json::to_string(&info).unwrap();
    assert!(!body.contains(code.as_str()));
}

#[tokio::test]
async fn test_join_binds_and_announces_player() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;
    let mut rx = s.broadcast.subscribe(room);

    let joined = s
        .sync
        .join(
            &caller,
            &token,
            JoinRequest {
                external_player_id: ext("ext-abc"),
                display_name: Some("Ada".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(joined.platform_user_id, PlatformUserId::new("U1"));
    assert!(matches!(
        rx.recv().await.unwrap().as_ref(),
        LobbyDelta::PlayerJoined { display_name: Some(name), .. } if name == "Ada"
    ));
}

#[tokio::test]
async fn test_update_status_with_unbound_external_id_is_player_not_found() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;
    s.sync.resolver().bind(&token, &ext("ext-abc")).await.unwrap();

    let status = PlayerStatusRequest {
        status: PlayerPresence::Away,
        location: None,
        reason: Some("afk".into()),
    };
    let result = s
        .sync
        .update_player_status(&caller, &token, &ext("ext-xyz"), status.clone())
        .await;
    assert!(matches!(result, Err(SyncError::Session(SessionError::PlayerNotFound))));

    let mut rx = s.broadcast.subscribe(room);
    let ok = s
        .sync
        .update_player_status(&caller, &token, &ext("ext-abc"), status)
        .await
        .unwrap();

    assert_eq!(ok.platform_user_id, PlatformUserId::new("U1"));
    assert_eq!(s.states.roster(room).await.unwrap()["U1"].status, PlayerPresence::Away);
    assert!(matches!(
        rx.recv().await.unwrap().as_ref(),
        LobbyDelta::PlayerStatus { status: PlayerPresence::Away, .. }
    ));
}

// =========================================================================
// Events
// =========================================================================

#[tokio::test]
async fn test_event_same_idempotency_key_recorded_once() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;
    let kind = EventKind::Custom("round_won".into());

    let first = s.sync.event(&caller, &token, event(kind.clone(), Some("k-1"))).await.unwrap();
    let second = s.sync.event(&caller, &token, event(kind, Some("k-1"))).await.unwrap();

    assert!(!first.duplicate);
    assert_eq!(first.sequence, 1);
    assert!(second.duplicate);
    assert_eq!(second.sequence, 1);
    assert_eq!(s.states.events(room).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_event_key_still_recording_is_not_acked_as_duplicate() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;
    assert_eq!(s.broker.claim_event_key(&token, "k-1").await.unwrap(), EventClaim::Claimed);

    let result = s
        .sync
        .event(&caller, &token, event(EventKind::PlayerLeft, Some("k-1")))
        .await;

    assert!(matches!(result, Err(SyncError::EventInFlight { ref key, .. }) if key == "k-1"));
    assert!(s.states.events(room).await.unwrap().is_empty());

    // Once the first request gives the key back, the retry records.
    s.broker.release_event_key(&token, "k-1").await.unwrap();
    let ack = s
        .sync
        .event(&caller, &token, event(EventKind::PlayerLeft, Some("k-1")))
        .await
        .unwrap();
    assert!(!ack.duplicate);
    assert_eq!(ack.sequence, 1);
}

#[tokio::test]
async fn test_event_without_key_is_recorded_each_time() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    for _ in 0..3 {
        s.sync.event(&caller, &token, event(EventKind::PlayerLeft, None)).await.unwrap();
    }

    assert_eq!(s.states.events(room).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_event_match_completed_finishes_room() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;
    s.sync.push(&caller, &token, push(1, json!("final"))).await.unwrap();

    s.sync
        .event(&caller, &token, event(EventKind::MatchCompleted, Some("done")))
        .await
        .unwrap();

    assert_eq!(s.directory.phase(room).await.unwrap(), RoomPhase::Finished);
    let push_after = s.sync.push(&caller, &token, push(2, json!("late"))).await;
    assert!(matches!(
        push_after,
        Err(SyncError::InvalidRoomState { phase: RoomPhase::Finished, .. })
    ));
    assert_eq!(s.sync.pull(&caller, &token).await.unwrap().payload, json!("final"));

    // A retried completion with the same key is still just a duplicate.
    let retry = s
        .sync
        .event(&caller, &token, event(EventKind::MatchCompleted, Some("done")))
        .await
        .unwrap();
    assert!(retry.duplicate);
}

#[tokio::test]
async fn test_event_rejected_by_phase_releases_key() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;
    s.directory.finish(room).await.unwrap();

    let result = s
        .sync
        .event(&caller, &token, event(EventKind::MatchStarted, Some("k")))
        .await;
    assert!(matches!(result, Err(SyncError::InvalidRoomState { .. })));

    // The key was not consumed by the failed attempt.
    assert_eq!(s.broker.claim_event_key(&token, "k").await.unwrap(), EventClaim::Claimed);
}

#[tokio::test]
async fn test_event_empty_custom_type_is_protocol_error() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    let result = s
        .sync
        .event(&caller, &token, event(EventKind::Custom("  ".into()), None))
        .await;

    assert!(matches!(result, Err(SyncError::Protocol(ProtocolError::InvalidMessage(_)))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_same_key_applied_once() {
    let s = stack();
    let (_, caller) = s.caller(&Permission::ALL).await;
    let room = s.in_game_room().await;
    let token = s.issue(room, Some("U1")).await;

    let mut handles = Vec::new();
    for _ in 0..12 {
        let sync = Arc::clone(&s.sync);
        let caller = caller.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            sync.event(&caller, &token, event(EventKind::PlayerJoined, Some("once")))
                .await
        }));
    }

    let mut fresh = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(ack) if !ack.duplicate => fresh += 1,
            Ok(ack) => assert_eq!(ack.sequence, 1),
            Err(e) => assert!(matches!(e, SyncError::EventInFlight { .. }), "{e}"),
        }
    }
    assert_eq!(fresh, 1);
    assert_eq!(s.states.events(room).await.unwrap().len(), 1);
}
