//! End-to-end scenarios over the matchmaker core and two simulated
//! processes sharing one in-process Presence bus.

use roomfleet::errors::MatchmakeError;
use roomfleet::handler::RoomDefinition;
use roomfleet::matchmaker::Matchmaker;
use roomfleet::presence::{LocalPresence, Presence};
use roomfleet::registry::{FindConditions, LocalRegistryDriver, Listing, RegistryDriver};
use roomfleet::room::RoomLogic;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct ChatRoom;

#[async_trait]
impl RoomLogic for ChatRoom {
    async fn on_create(&mut self, _options: Value) -> Result<(), String> {
        Ok(())
    }
}

fn chat_factory() -> Box<dyn RoomLogic> {
    Box::new(ChatRoom)
}

async fn new_matchmaker(process_id: &str, presence: Arc<dyn Presence>, driver: Arc<dyn RegistryDriver>) -> Arc<Matchmaker> {
    let matchmaker = Matchmaker::new(process_id.to_string(), presence, driver);
    matchmaker
        .define(
            RoomDefinition::new("chat", Box::new(chat_factory)).max_clients(2),
        )
        .await;
    matchmaker
}

#[tokio::test]
async fn join_or_create_creates_reuses_and_relocks_rooms() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());
    let matchmaker = new_matchmaker("proc-A", presence, driver).await;

    // Scenario 1: no rooms yet, a fresh room is created.
    let first = matchmaker.join_or_create("chat", json!({})).await.unwrap();
    let room_id = first.room.room_id.clone();
    assert_eq!(first.room.clients, 1);

    // Scenario 2: still unlocked, the same room is reused with a fresh sessionId.
    let second = matchmaker.join_or_create("chat", json!({})).await.unwrap();
    assert_eq!(second.room.room_id, room_id);
    assert_ne!(second.session_id, first.session_id);
    assert_eq!(second.room.clients, 2);

    // Scenario 3: the room is now full (max_clients=2) and locks itself, so
    // the third join creates a new room.
    let third = matchmaker.join_or_create("chat", json!({})).await.unwrap();
    assert_ne!(third.room.room_id, room_id);
}

#[tokio::test]
async fn join_by_id_rejects_unknown_and_locked_rooms() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());
    let matchmaker = new_matchmaker("proc-A", presence, driver).await;

    // Scenario 4: unknown room id.
    let err = matchmaker
        .join_by_id("does-not-exist", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, MatchmakeError::RoomIdUnknownOrLocked(_)));

    // Fill the room to capacity so it locks, then joinById without a
    // sessionId must also be rejected as locked.
    let first = matchmaker.join_or_create("chat", json!({})).await.unwrap();
    matchmaker.join_or_create("chat", json!({})).await.unwrap();
    let err = matchmaker
        .join_by_id(&first.room.room_id, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, MatchmakeError::RoomIdUnknownOrLocked(_)));
}

#[tokio::test]
async fn join_by_id_rejoin_succeeds_with_live_reservation_and_fails_once_expired() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());
    let matchmaker = new_matchmaker("proc-A", presence, driver).await;

    let joined = matchmaker.join_or_create("chat", json!({})).await.unwrap();

    // Scenario: rejoin with the live reservation succeeds.
    let rejoined = matchmaker
        .join_by_id(&joined.room.room_id, json!({ "sessionId": joined.session_id }))
        .await
        .unwrap();
    assert_eq!(rejoined.session_id, joined.session_id);

    // Scenario 5: an unknown sessionId against the same room is rejected as expired.
    let err = matchmaker
        .join_by_id(&joined.room.room_id, json!({ "sessionId": "never-reserved" }))
        .await
        .unwrap_err();
    assert!(matches!(err, MatchmakeError::SessionExpired(_)));
}

#[tokio::test]
async fn remote_call_reaches_a_room_hosted_on_another_process() {
    // Scenario 6: two matchmakers share one Presence bus; A hosts the room,
    // B resolves a remote call to it within the timeout.
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());
    let matchmaker_a = new_matchmaker("proc-A", presence.clone(), driver.clone()).await;
    let matchmaker_b = new_matchmaker("proc-B", presence, driver).await;

    let joined = matchmaker_a.join_or_create("chat", json!({})).await.unwrap();

    // B has no local copy of the room, so joinById's hasReservedSeat probe
    // is forced over the Presence pub/sub round trip rather than a local
    // short circuit.
    let rejoined = matchmaker_b
        .join_by_id(&joined.room.room_id, json!({ "sessionId": joined.session_id }))
        .await
        .unwrap();
    assert_eq!(rejoined.session_id, joined.session_id);
}

#[tokio::test]
async fn stale_room_cleanup_removes_listings_whose_owner_is_gone() {
    // Scenario 7: a listing survives in the registry with no process
    // anywhere subscribed to answer for it, simulating a crash that skipped
    // graceful shutdown. Registering a handler for the type must reap it.
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());

    driver
        .save(&Listing {
            room_id: "ghost-room".to_string(),
            name: "chat".to_string(),
            process_id: "dead-proc".to_string(),
            locked: false,
            private: false,
            max_clients: 2,
            clients: 0,
            metadata: json!({}),
        })
        .await
        .unwrap();

    let listings_before = driver
        .find(&FindConditions {
            name: Some("chat".to_string()),
            ..Default::default()
        })
        .await;
    assert_eq!(listings_before.len(), 1);

    // Defining the handler triggers stale-room cleanup for "chat": the
    // ghost listing's owner never answers, so it is reaped.
    let _matchmaker = new_matchmaker("proc-B", presence.clone(), driver.clone()).await;

    let listings_after = driver
        .find(&FindConditions {
            name: Some("chat".to_string()),
            ..Default::default()
        })
        .await;
    assert!(listings_after.is_empty());

    // Idempotent: re-running cleanup on an already-clean registry removes
    // nothing.
    Matchmaker::new("proc-C", presence, driver.clone())
        .cleanup_stale_rooms("chat")
        .await;
    let empty = driver.find(&FindConditions::default()).await;
    assert!(empty.is_empty());
}

#[tokio::test]
async fn graceful_shutdown_empties_local_rooms_and_is_not_reentrant() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());
    let matchmaker = new_matchmaker("proc-A", presence, driver.clone()).await;

    matchmaker.join_or_create("chat", json!({})).await.unwrap();
    matchmaker.graceful_shutdown().await.unwrap();

    assert!(driver.find(&roomfleet::registry::FindConditions::default()).await.is_empty());
    assert!(matchmaker.is_gracefully_shutting_down());

    let err = matchmaker.graceful_shutdown().await.unwrap_err();
    assert!(matches!(err, MatchmakeError::Unhandled(_)));

    // New matchmake attempts are rejected once shutdown has started.
    let err = matchmaker.join_or_create("chat", json!({})).await.unwrap_err();
    assert!(matches!(err, MatchmakeError::Unhandled(_)));
}

#[tokio::test]
async fn join_fails_with_criteria_unsatisfied_when_no_room_exists() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());
    let matchmaker = new_matchmaker("proc-A", presence, driver).await;

    let err = matchmaker.join("chat", json!({})).await.unwrap_err();
    assert!(matches!(err, MatchmakeError::CriteriaUnsatisfied(_)));
}

#[tokio::test]
async fn create_requires_a_registered_handler() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());
    let matchmaker = Matchmaker::new("proc-A", presence, driver);

    let err = matchmaker.create("unknown", json!({})).await.unwrap_err();
    assert!(matches!(err, MatchmakeError::HandlerMissing(_)));
}

#[tokio::test]
async fn room_unlocks_and_refires_lock_events_once_a_seat_frees_up() {
    // A room that fills to capacity locks (firing `on_lock`); once a
    // connected client leaves and frees a seat it unlocks itself again
    // (firing `on_unlock`), and matchmaking can reuse it.
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let driver: Arc<dyn RegistryDriver> = Arc::new(LocalRegistryDriver::new());

    let events: Arc<std::sync::Mutex<Vec<&'static str>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let lock_events = events.clone();
    let unlock_events = events.clone();

    let matchmaker = Matchmaker::new("proc-A", presence, driver);
    matchmaker
        .define(
            RoomDefinition::new("chat", Box::new(chat_factory))
                .max_clients(2)
                .on_lock(Box::new(move |_room_id| lock_events.lock().unwrap().push("lock")))
                .on_unlock(Box::new(move |_room_id| unlock_events.lock().unwrap().push("unlock"))),
        )
        .await;

    let first = matchmaker.join_or_create("chat", json!({})).await.unwrap();
    let second = matchmaker.join_or_create("chat", json!({})).await.unwrap();
    assert_eq!(second.room.room_id, first.room.room_id);
    assert!(second.room.locked);
    assert_eq!(*events.lock().unwrap(), vec!["lock"]);

    // session1 completes the room-join hand-off, then disconnects,
    // freeing its seat and unlocking the room.
    matchmaker
        .confirm_room_join(&first.room.room_id, &first.session_id)
        .await
        .unwrap();
    matchmaker
        .leave_room(&first.room.room_id, &first.session_id)
        .await
        .unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["lock", "unlock"]);

    let third = matchmaker.join_or_create("chat", json!({})).await.unwrap();
    assert_eq!(third.room.room_id, first.room.room_id);
}

#[tokio::test]
async fn remote_call_honors_its_timeout_budget() {
    let presence = LocalPresence::new();
    let local_rooms: roomfleet::remote_call::RoomArena = std::sync::Mutex::new(ahash::HashMap::default());
    let started = std::time::Instant::now();
    let result = roomfleet::remote_call::remote_room_call(
        &presence,
        "proc-B",
        &local_rooms,
        "ghost-room",
        "roomId",
        None,
        Duration::from_millis(50),
    )
    .await;
    assert!(matches!(result, Err(MatchmakeError::RemoteCallTimeout(_))));
    assert!(started.elapsed() < Duration::from_millis(500));
}
