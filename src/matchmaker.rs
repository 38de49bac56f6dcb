//! The Matchmaker Core: `joinOrCreate`/`create`/`join`/
//! `joinById`/`query`, the admission gate, retry policy, seat
//! reservation, stale-room cleanup and graceful shutdown.

use crate::config::{Settings, DEFAULT_RESERVATION_TTL, RESERVATION_SWEEP_INTERVAL};
use crate::errors::MatchmakeError;
use crate::handler::{RegisteredHandler, RoomDefinition};
use crate::presence::Presence;
use crate::registry::{FindConditions, Listing, RegistryDriver};
use crate::remote_call::{remote_room_call, subscribe_room_channel, RoomArena};
use crate::room::{RoomHandle, RoomLifecycle};
use crate::utils::generate_id;
use ahash::HashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Exposed methods set. Any other method name reaching
/// the transport is rejected with `ERR_MATCHMAKE_UNHANDLED`.
pub const EXPOSED_METHODS: &[&str] = &["joinOrCreate", "create", "join", "joinById"];

const JOIN_OR_CREATE_MAX_ATTEMPTS: u32 = 5;
const JOIN_MAX_ATTEMPTS: u32 = 5;

/// The public shape handed back to the transport on a successful
/// matchmake: `{room: {roomId, ...}, sessionId}`.
#[derive(Serialize)]
pub struct JoinResult {
    pub room: Listing,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Owns everything process-local: registered handlers and the arena of
/// locally-hosted rooms.
pub struct Matchmaker {
    process_id: String,
    presence: Arc<dyn Presence>,
    driver: Arc<dyn RegistryDriver>,
    handlers: Mutex<HashMap<String, Arc<RegisteredHandler>>>,
    local_rooms: Arc<RoomArena>,
    room_subscriptions: Mutex<HashMap<String, crate::presence::Subscription>>,
    shutting_down: AtomicBool,
    settings: Settings,
}

impl Matchmaker {
    pub fn new(process_id: impl Into<String>, presence: Arc<dyn Presence>, driver: Arc<dyn RegistryDriver>) -> Arc<Self> {
        Arc::new(Self {
            process_id: process_id.into(),
            presence,
            driver,
            handlers: Mutex::new(ahash::HashMap::default()),
            local_rooms: Arc::new(Mutex::new(ahash::HashMap::default())),
            room_subscriptions: Mutex::new(ahash::HashMap::default()),
            shutting_down: AtomicBool::new(false),
            settings: Settings::from_env(),
        })
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Register (or replace) a room type. Re-registration triggers
    /// stale-room cleanup for that name.
    pub async fn define(&self, definition: RoomDefinition) {
        let handler = Arc::new(definition.build());
        let name = handler.name.clone();
        self.handlers.lock().unwrap().insert(name.clone(), handler);
        self.cleanup_stale_rooms(&name).await;
    }

    fn get_handler(&self, name: &str) -> Result<Arc<RegisteredHandler>, MatchmakeError> {
        self.handlers
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| MatchmakeError::HandlerMissing(format!("no handler registered for '{name}'")))
    }

    /// Spawn the periodic reservation sweeper.
    /// Takes `Arc<Self>` by value since the sweeper must outlive any one
    /// borrow of the matchmaker; call it on a clone.
    pub fn spawn_reservation_sweeper(self: Arc<Self>) {
        let matchmaker = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RESERVATION_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                matchmaker.sweep_reservations().await;
            }
        });
    }

    async fn sweep_reservations(&self) {
        let rooms: Vec<Arc<AsyncMutex<RoomHandle>>> =
            self.local_rooms.lock().unwrap().values().cloned().collect();
        let now = std::time::Instant::now();
        for room in rooms {
            let mut guard = room.lock().await;
            guard.sweep_expired_reservations(now);
        }
    }

    // ---- admission gate ----------------------------------

    /// Serializes near-simultaneous queries for the same room-type so
    /// they converge on one room: `wait = min(concurrency * 100ms, 2000ms)`.
    /// `incr` is not idempotent, so a Presence failure here must surface
    /// rather than silently default to "no contention".
    async fn await_room_available_for(&self, name: &str) -> Result<AdmissionGuard, MatchmakeError> {
        let key = format!("{name}:c");
        let concurrency = self
            .presence
            .incr(&key)
            .await
            .map_err(|e| MatchmakeError::Unhandled(e.0))?
            - 1;
        let guard = AdmissionGuard::new(self.presence.clone(), key);
        let wait_ms = (concurrency.max(0) as u64 * 100).min(2000);
        if wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
        Ok(guard)
    }

    // ---- room selection ----------------------

    async fn query_room(&self, name: &str, options: &Value) -> Result<Option<Listing>, MatchmakeError> {
        let handler = self.get_handler(name)?;
        let _admission = self.await_room_available_for(name).await?;
        let conditions = FindConditions {
            name: Some(name.to_string()),
            locked: Some(false),
            metadata: handler.filter_fields(options),
            ..Default::default()
        };
        Ok(self
            .driver
            .find_one(&conditions, handler.sort_options.as_ref())
            .await)
    }

    /// `query(name?, conditions)`: public, forces `private=false` but
    /// does not force `locked=false` — locked public rooms are retained
    /// in the result set.
    pub async fn query(&self, name: Option<&str>, metadata: Value) -> Vec<Listing> {
        let conditions = FindConditions {
            name: name.map(|n| n.to_string()),
            private: Some(false),
            metadata,
            ..Default::default()
        };
        self.driver.find(&conditions).await
    }

    // ---- room creation -------------------

    async fn create_room(&self, name: &str, options: Value) -> Result<(Arc<AsyncMutex<RoomHandle>>, Listing), MatchmakeError> {
        let handler = self.get_handler(name)?;
        let room_id = generate_id(9);
        let mut logic = handler.instantiate();
        let merged = merge_options(&options, &handler.default_options);
        logic
            .on_create(merged)
            .await
            .map_err(MatchmakeError::UnhandledUserError)?;

        let mut room = RoomHandle::new(
            room_id.clone(),
            name.to_string(),
            self.process_id.clone(),
            handler.max_clients,
            handler.private,
            logic,
        );
        room.advance(RoomLifecycle::Created);
        let room = Arc::new(AsyncMutex::new(room));

        self.create_room_references(name, &room_id, room.clone(), true)
            .await?;

        let listing = self.driver.create_instance(Listing {
            room_id: room_id.clone(),
            name: name.to_string(),
            process_id: self.process_id.clone(),
            locked: false,
            private: handler.private,
            max_clients: handler.max_clients,
            clients: 0,
            metadata: handler.filter_fields(&options),
        });
        self.driver
            .save(&listing)
            .await
            .map_err(|e| MatchmakeError::Unhandled(e.0))?;

        if let Some(sink) = &handler.events.on_create {
            sink(&room_id);
        }

        Ok((room, listing))
    }

    /// Stores the local handle, adds `roomId` to its type's set, and (on
    /// `init`) subscribes the remote-call channel. `sadd` is not
    /// idempotent, so a Presence failure here must surface rather than be
    /// discarded — an unreachable set membership means the room silently
    /// never turns up in matchmaking queries.
    async fn create_room_references(
        &self,
        name: &str,
        room_id: &str,
        room: Arc<AsyncMutex<RoomHandle>>,
        init: bool,
    ) -> Result<(), MatchmakeError> {
        self.local_rooms
            .lock()
            .unwrap()
            .insert(room_id.to_string(), room);
        self.presence
            .sadd(name, room_id)
            .await
            .map_err(|e| MatchmakeError::Unhandled(e.0))?;
        if init {
            let subscription = subscribe_room_channel(
                self.presence.clone(),
                self.process_id.clone(),
                room_id.to_string(),
                self.local_rooms.clone(),
            )
            .await;
            self.room_subscriptions
                .lock()
                .unwrap()
                .insert(room_id.to_string(), subscription);
        }
        Ok(())
    }

    // ---- seat reservation ---------------

    async fn reserve_seat_for(&self, listing: &Listing, options: &Value) -> Result<(Listing, String), MatchmakeError> {
        let session_id = generate_id(16);
        let (_owner, value) = remote_room_call(
            self.presence.as_ref(),
            &self.process_id,
            &self.local_rooms,
            &listing.room_id,
            "_reserveSeat",
            Some(json!([session_id, DEFAULT_RESERVATION_TTL.as_millis() as u64, options])),
            self.settings.remote_call_timeout,
        )
        .await?;

        let reserved = value.get("reserved").and_then(|v| v.as_bool()).unwrap_or(false);
        if !reserved {
            return Err(MatchmakeError::SeatReservationFailed(format!(
                "room {} rejected seat reservation",
                listing.room_id
            )));
        }

        let mut updated = listing.clone();
        updated.clients = value.get("clients").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        updated.locked = value.get("locked").and_then(|v| v.as_bool()).unwrap_or(false);
        self.driver
            .save(&updated)
            .await
            .map_err(|e| MatchmakeError::Unhandled(e.0))?;

        // The reservation may have just filled the room: the owning room
        // locks itself as a side effect of `reserve_seat`. Republish that
        // transition here (remote set membership, lock sink) since the
        // owner already applied it to its local `RoomHandle` inside the
        // remote call dispatch.
        if !listing.locked && updated.locked {
            self.on_room_locked(&updated.name, &updated.room_id).await;
        }

        Ok((updated, session_id))
    }

    async fn on_room_locked(&self, name: &str, room_id: &str) {
        let _ = self.presence.srem(name, room_id).await;
        if let Some(handler) = self.handlers.lock().unwrap().get(name) {
            if let Some(sink) = &handler.events.on_lock {
                sink(room_id);
            }
        }
    }

    /// `sadd` is not idempotent, so a failure here must surface rather
    /// than be silently discarded — same reasoning as `create_room_references`.
    async fn on_room_unlocked(&self, name: &str, room_id: &str) -> Result<(), MatchmakeError> {
        self.presence
            .sadd(name, room_id)
            .await
            .map_err(|e| MatchmakeError::Unhandled(e.0))?;
        if let Some(handler) = self.handlers.lock().unwrap().get(name) {
            if let Some(sink) = &handler.events.on_unlock {
                sink(room_id);
            }
        }
        Ok(())
    }

    // ---- public operations -------------------------------

    /// `joinOrCreate(name, options)`: retries up to 5 times, retrying
    /// only on `SeatReservationError`.
    pub async fn join_or_create(&self, name: &str, options: Value) -> Result<JoinResult, MatchmakeError> {
        self.ensure_not_shutting_down()?;
        let mut last_err = None;
        for _ in 0..JOIN_OR_CREATE_MAX_ATTEMPTS {
            let listing = match self.query_room(name, &options).await? {
                Some(listing) => listing,
                None => self.create_room(name, options.clone()).await?.1,
            };
            match self.reserve_seat_for(&listing, &options).await {
                Ok((listing, session_id)) => {
                    return Ok(JoinResult { room: listing, session_id })
                }
                Err(err) if err.is_retriable() => {
                    last_err = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            MatchmakeError::SeatReservationFailed("exhausted joinOrCreate retries".into())
        }))
    }

    /// `create(name, options)`: requires a registered handler,
    /// unconditionally creates a new room.
    pub async fn create(&self, name: &str, options: Value) -> Result<JoinResult, MatchmakeError> {
        self.ensure_not_shutting_down()?;
        self.get_handler(name)?;
        let (_room, listing) = self.create_room(name, options.clone()).await?;
        let (listing, session_id) = self.reserve_seat_for(&listing, &options).await?;
        Ok(JoinResult { room: listing, session_id })
    }

    /// `join(name, options)`: retries on seat-reservation failure; fails
    /// `CriteriaUnsatisfied` if no room matches.
    pub async fn join(&self, name: &str, options: Value) -> Result<JoinResult, MatchmakeError> {
        self.ensure_not_shutting_down()?;
        let mut last_err = None;
        for _ in 0..JOIN_MAX_ATTEMPTS {
            let listing = self.query_room(name, &options).await?.ok_or_else(|| {
                MatchmakeError::CriteriaUnsatisfied(format!("no room of type '{name}' matches"))
            })?;
            match self.reserve_seat_for(&listing, &options).await {
                Ok((listing, session_id)) => {
                    return Ok(JoinResult { room: listing, session_id })
                }
                Err(err) if err.is_retriable() => {
                    last_err = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            MatchmakeError::SeatReservationFailed("exhausted join retries".into())
        }))
    }

    /// `joinById(roomId, options)`: rejoin-by-session, fresh seat, or
    /// fail on a locked/unknown room.
    pub async fn join_by_id(&self, room_id: &str, options: Value) -> Result<JoinResult, MatchmakeError> {
        self.ensure_not_shutting_down()?;
        let listing = self
            .driver
            .find_one(&FindConditions::by_room_id(room_id), None)
            .await
            .ok_or_else(|| MatchmakeError::RoomIdUnknownOrLocked(format!("no room with id '{room_id}'")))?;

        if let Some(session_id) = options.get("sessionId").and_then(|v| v.as_str()) {
            let (_owner, value) = remote_room_call(
                self.presence.as_ref(),
                &self.process_id,
                &self.local_rooms,
                room_id,
                "hasReservedSeat",
                Some(json!([session_id])),
                self.settings.remote_call_timeout,
            )
            .await?;
            return if value.as_bool().unwrap_or(false) {
                Ok(JoinResult {
                    room: listing,
                    session_id: session_id.to_string(),
                })
            } else {
                Err(MatchmakeError::SessionExpired(format!(
                    "session {session_id} has no reserved seat in room {room_id}"
                )))
            };
        }

        if listing.locked {
            return Err(MatchmakeError::RoomIdUnknownOrLocked(format!(
                "room '{room_id}' is locked"
            )));
        }

        let (listing, session_id) = self.reserve_seat_for(&listing, &options).await?;
        Ok(JoinResult { room: listing, session_id })
    }

    /// Dispatches by wire method name; rejects anything
    /// outside `EXPOSED_METHODS` with `ERR_MATCHMAKE_UNHANDLED`.
    pub async fn handle_matchmake(&self, method: &str, name: &str, options: Value) -> Result<JoinResult, MatchmakeError> {
        match method {
            "joinOrCreate" => self.join_or_create(name, options).await,
            "create" => self.create(name, options).await,
            "join" => self.join(name, options).await,
            "joinById" => self.join_by_id(name, options).await,
            other => Err(MatchmakeError::Unhandled(format!(
                "'{other}' is not a matchmake method"
            ))),
        }
    }

    // ---- lock/unlock, dispose ----------------------------

    /// Invoked by the room-join transport path once a client connects.
    /// Confirms the reservation and notifies the handler.
    pub async fn confirm_room_join(&self, room_id: &str, session_id: &str) -> Result<(), MatchmakeError> {
        let room = {
            self.local_rooms
                .lock()
                .unwrap()
                .get(room_id)
                .cloned()
                .ok_or_else(|| MatchmakeError::RoomIdUnknownOrLocked(format!("room '{room_id}' is not hosted here")))?
        };
        let room_name = {
            let mut guard = room.lock().await;
            if !guard.confirm_join(session_id) {
                return Err(MatchmakeError::SessionExpired(format!(
                    "session {session_id} had no reservation in room {room_id}"
                )));
            }
            guard
                .logic
                .on_join(session_id, json!({}))
                .await
                .map_err(MatchmakeError::UnhandledUserError)?;
            guard.room_name.clone()
        };
        if let Some(handler) = self.handlers.lock().unwrap().get(&room_name) {
            if let Some(sink) = &handler.events.on_join {
                sink(session_id);
            }
        }
        Ok(())
    }

    /// The local handle for a room this process hosts, if any. Used by the
    /// transport's room-join path to dispatch WebSocket traffic directly
    /// without a Presence round trip.
    pub fn local_room(&self, room_id: &str) -> Option<Arc<AsyncMutex<RoomHandle>>> {
        self.local_rooms.lock().unwrap().get(room_id).cloned()
    }

    /// Notifies the room logic and frees the client's seat when a session
    /// disconnects. A room that was locked purely by having filled to
    /// capacity unlocks itself once this departure frees a seat.
    pub async fn leave_room(&self, room_id: &str, session_id: &str) -> Result<(), MatchmakeError> {
        let Some(room) = self.local_room(room_id) else {
            return Ok(());
        };
        let (room_name, just_unlocked) = {
            let mut guard = room.lock().await;
            guard.remove_client(session_id);
            guard.logic.on_leave(session_id).await;
            let was_locked = guard.locked;
            if was_locked && guard.has_capacity() {
                guard.unlock();
            }
            (guard.room_name.clone(), was_locked && !guard.locked)
        };

        if let Some(handler) = self.handlers.lock().unwrap().get(&room_name) {
            if let Some(sink) = &handler.events.on_leave {
                sink(session_id);
            }
        }

        if just_unlocked {
            if let Some(mut listing) = self
                .driver
                .find_one(&FindConditions::by_room_id(room_id), None)
                .await
            {
                listing.locked = false;
                let _ = self.driver.save(&listing).await;
            }
            self.on_room_unlocked(&room_name, room_id).await?;
        }
        Ok(())
    }

    pub async fn dispose_room(&self, room_id: &str) {
        let room = self.local_rooms.lock().unwrap().remove(room_id);
        let Some(room) = room else { return };
        let name = {
            let mut guard = room.lock().await;
            guard.advance(RoomLifecycle::Disconnecting);
            guard.logic.on_dispose().await;
            guard.advance(RoomLifecycle::Disposed);
            guard.room_name.clone()
        };
        let _ = self.driver.remove(room_id).await;
        let _ = self.presence.srem(&name, room_id).await;
        let _ = self.presence.del(&format!("{name}:c")).await;
        if let Some(subscription) = self.room_subscriptions.lock().unwrap().remove(room_id) {
            self.presence.unsubscribe(&subscription).await;
        }
        if let Some(handler) = self.handlers.lock().unwrap().get(&name) {
            if let Some(sink) = &handler.events.on_dispose {
                sink(room_id);
            }
        }
    }

    // ---- stale room cleanup ------------------------------

    /// For each listing of `name`, probe `roomId` with the short timeout;
    /// a timeout means the owner is assumed dead, so the listing and set
    /// membership are removed. Re-running on a clean registry is a no-op.
    pub async fn cleanup_stale_rooms(&self, name: &str) {
        let listings = self
            .driver
            .find(&FindConditions {
                name: Some(name.to_string()),
                ..Default::default()
            })
            .await;
        for listing in listings {
            let probe = remote_room_call(
                self.presence.as_ref(),
                &self.process_id,
                &self.local_rooms,
                &listing.room_id,
                "roomId",
                None,
                self.settings.remote_call_timeout,
            )
            .await;
            if matches!(probe, Err(MatchmakeError::RemoteCallTimeout(_))) {
                let _ = self.driver.remove(&listing.room_id).await;
                let _ = self.presence.srem(name, &listing.room_id).await;
            }
        }
        let _ = self.presence.del(&format!("{name}:c")).await;
    }

    // ---- graceful shutdown ---------------------------

    pub fn is_gracefully_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn ensure_not_shutting_down(&self) -> Result<(), MatchmakeError> {
        if self.is_gracefully_shutting_down() {
            Err(MatchmakeError::Unhandled(
                "matchmaker is shutting down".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Disconnects all locally-hosted rooms in parallel; resolves once
    /// every room has finished its DISCONNECTING -> DISPOSED transition.
    /// Idempotent: a second call while already shutting down is rejected.
    pub async fn graceful_shutdown(&self) -> Result<(), MatchmakeError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Err(MatchmakeError::Unhandled(
                "graceful shutdown already in progress".to_string(),
            ));
        }
        let room_ids: Vec<String> = self.local_rooms.lock().unwrap().keys().cloned().collect();
        let disposals = room_ids.iter().map(|id| self.dispose_room(id));
        futures::future::join_all(disposals).await;
        Ok(())
    }
}

fn merge_options(client_options: &Value, defaults: &Value) -> Value {
    let mut merged = defaults.clone();
    if let (Some(merged_obj), Some(client_obj)) = (merged.as_object_mut(), client_options.as_object()) {
        for (key, value) in client_obj {
            merged_obj.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Decrements the admission counter on drop, via a detached task, so the
/// decrement still happens if the holding future is cancelled before it
/// would otherwise run.
struct AdmissionGuard {
    presence: Option<Arc<dyn Presence>>,
    key: String,
}

impl AdmissionGuard {
    fn new(presence: Arc<dyn Presence>, key: String) -> Self {
        Self { presence: Some(presence), key }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if let Some(presence) = self.presence.take() {
            let key = std::mem::take(&mut self.key);
            tokio::spawn(async move {
                let _ = presence.decr(&key).await;
            });
        }
    }
}
