//! The Room Handle: the per-process live room object —
//! identity, capacity, lock state, lifecycle, seat reservations, and
//! the user's room logic.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Monotone lifecycle states: `CREATING -> CREATED ->
/// DISCONNECTING -> DISPOSED`, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomLifecycle {
    Creating,
    Created,
    Disconnecting,
    Disposed,
}

impl RoomLifecycle {
    fn rank(self) -> u8 {
        match self {
            RoomLifecycle::Creating => 0,
            RoomLifecycle::Created => 1,
            RoomLifecycle::Disconnecting => 2,
            RoomLifecycle::Disposed => 3,
        }
    }
}

/// User-authored room behavior. The matchmaker owns lifecycle, capacity
/// and seat bookkeeping (`RoomHandle`); this trait is the seam where
/// game-specific logic plugs in, object-safe so a `RegisteredHandler`
/// can construct one by room-type name at runtime.
#[async_trait]
pub trait RoomLogic: Send + Sync {
    /// Called once, right after the listing is staged. A returned `Err`
    /// aborts room creation and is wrapped as `UnhandledUserError`.
    async fn on_create(&mut self, options: Value) -> Result<(), String>;

    /// Called when the transport performs the final room-join hand-off.
    async fn on_join(&mut self, _session_id: &str, _options: Value) -> Result<(), String> {
        Ok(())
    }

    async fn on_leave(&mut self, _session_id: &str) {}

    async fn on_dispose(&mut self) {}

    /// Arbitrary user methods reachable through `remote_room_call` beyond
    /// the fixed built-ins. The default rejects every name.
    async fn call(&mut self, method: &str, _args: Option<Value>) -> Result<Value, String> {
        Err(format!("no such method: {method}"))
    }
}

/// The local, per-process live room object. `Listing` fields
/// that are part of the matchmaking contract are mirrored here so the
/// owning process can answer remote calls (`maxClients`, `roomId`, …)
/// without a registry round trip.
pub struct RoomHandle {
    pub room_id: String,
    pub room_name: String,
    pub process_id: String,
    pub max_clients: u32,
    pub locked: bool,
    pub private: bool,
    state: RoomLifecycle,
    /// sessionId -> reservation expiry.
    reservations: HashMap<String, Instant>,
    clients: std::collections::HashSet<String>,
    pub logic: Box<dyn RoomLogic>,
}

impl RoomHandle {
    pub fn new(
        room_id: String,
        room_name: String,
        process_id: String,
        max_clients: u32,
        private: bool,
        logic: Box<dyn RoomLogic>,
    ) -> Self {
        Self {
            room_id,
            room_name,
            process_id,
            max_clients,
            locked: false,
            private,
            state: RoomLifecycle::Creating,
            reservations: HashMap::new(),
            clients: std::collections::HashSet::new(),
            logic,
        }
    }

    pub fn state(&self) -> RoomLifecycle {
        self.state
    }

    /// Advance the lifecycle state. Panics on a backward transition — a
    /// programming error in the matchmaker, never a user-reachable path.
    pub fn advance(&mut self, next: RoomLifecycle) {
        assert!(
            next.rank() >= self.state.rank(),
            "room lifecycle must not move backward: {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    pub fn seat_count(&self) -> usize {
        self.clients.len() + self.reservations.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.seat_count() < self.max_clients as usize
    }

    /// Reserve a seat for `session_id` with the given TTL. Idempotent per
    /// session id. Returns `false` when the room is locked or full — the
    /// caller raises `SeatReservationFailed` in that case. Locks the room
    /// as a side effect once the reservation fills it to capacity.
    pub fn reserve_seat(&mut self, session_id: &str, ttl: Duration) -> bool {
        if self.clients.contains(session_id) || self.reservations.contains_key(session_id) {
            return true;
        }
        if self.locked || !self.has_capacity() {
            return false;
        }
        self.reservations
            .insert(session_id.to_string(), Instant::now() + ttl);
        if !self.has_capacity() {
            self.lock();
        }
        true
    }

    /// True if `session_id` holds a live (unexpired) reservation, or has
    /// already completed the room-join hand-off.
    pub fn has_reserved_seat(&self, session_id: &str) -> bool {
        if self.clients.contains(session_id) {
            return true;
        }
        matches!(self.reservations.get(session_id), Some(expiry) if *expiry > Instant::now())
    }

    /// Confirm the room-join hand-off: moves a reservation into a
    /// connected client. Returns `false` if no live reservation exists.
    pub fn confirm_join(&mut self, session_id: &str) -> bool {
        if self.clients.contains(session_id) {
            return true;
        }
        match self.reservations.remove(session_id) {
            Some(expiry) if expiry > Instant::now() => {
                self.clients.insert(session_id.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn remove_client(&mut self, session_id: &str) {
        self.clients.remove(session_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Free expired, unclaimed reservations. Returns how many were freed.
    pub fn sweep_expired_reservations(&mut self, now: Instant) -> usize {
        let before = self.reservations.len();
        self.reservations.retain(|_, expiry| *expiry > now);
        before - self.reservations.len()
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopLogic;

    #[async_trait]
    impl RoomLogic for NoopLogic {
        async fn on_create(&mut self, _options: Value) -> Result<(), String> {
            Ok(())
        }
    }

    fn handle(max_clients: u32) -> RoomHandle {
        RoomHandle::new(
            "room1".into(),
            "chat".into(),
            "proc1".into(),
            max_clients,
            false,
            Box::new(NoopLogic),
        )
    }

    #[test]
    fn reservation_is_idempotent_per_session() {
        let mut room = handle(2);
        assert!(room.reserve_seat("s1", Duration::from_secs(5)));
        assert!(room.reserve_seat("s1", Duration::from_secs(5)));
        assert_eq!(room.seat_count(), 1);
    }

    #[test]
    fn reservation_fails_when_locked_or_full() {
        let mut room = handle(1);
        assert!(room.reserve_seat("s1", Duration::from_secs(5)));
        assert!(!room.reserve_seat("s2", Duration::from_secs(5)));

        let mut locked_room = handle(2);
        locked_room.lock();
        assert!(!locked_room.reserve_seat("s1", Duration::from_secs(5)));
    }

    #[test]
    fn room_locks_itself_once_filled_to_capacity() {
        let mut room = handle(2);
        assert!(!room.locked);
        room.reserve_seat("s1", Duration::from_secs(5));
        assert!(!room.locked);
        room.reserve_seat("s2", Duration::from_secs(5));
        assert!(room.locked);
    }

    #[test]
    fn expired_reservation_is_freed_by_sweep_but_not_has_reserved_seat_before_sweep() {
        let mut room = handle(2);
        room.reserve_seat("s1", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!room.has_reserved_seat("s1"));
        let freed = room.sweep_expired_reservations(Instant::now());
        assert_eq!(freed, 1);
        assert_eq!(room.seat_count(), 0);
    }

    #[test]
    fn confirm_join_moves_reservation_to_connected_client() {
        let mut room = handle(2);
        room.reserve_seat("s1", Duration::from_secs(5));
        assert!(room.confirm_join("s1"));
        assert_eq!(room.client_count(), 1);
        assert!(room.has_reserved_seat("s1"));
    }

    #[test]
    #[should_panic]
    fn lifecycle_cannot_move_backward() {
        let mut room = handle(2);
        room.advance(RoomLifecycle::Created);
        room.advance(RoomLifecycle::Creating);
    }
}
