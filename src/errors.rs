use serde::Serialize;
use std::fmt;

/// Wire-stable error codes. These integers are part of the
/// client contract and must never be renumbered.
pub const ERR_MATCHMAKE_NO_HANDLER: i32 = 4210;
pub const ERR_MATCHMAKE_INVALID_CRITERIA: i32 = 4211;
pub const ERR_MATCHMAKE_INVALID_ROOM_ID: i32 = 4212;
pub const ERR_MATCHMAKE_UNHANDLED: i32 = 4213;
pub const ERR_MATCHMAKE_EXPIRED: i32 = 4214;

/// Sent as a framed `{code, error}` message on the room-join path when the
/// reservation is confirmed but the room's `_onJoin` hand-off itself fails.
pub const JOIN_ERROR: i32 = 4215;

/// WebSocket close code paired with `JOIN_ERROR`: a private-range code
/// (RFC 6455 4000-4999) distinct from a plain protocol-level close, so a
/// client can tell "the join was rejected" apart from "malformed frame".
pub const WS_CLOSE_WITH_ERROR: u16 = 4002;

/// IPC reply codes used on the `<roomId>:<requestId>` reply channel.
pub const IPC_SUCCESS: i32 = 0;
pub const IPC_ERROR: i32 = 1;

/// Error kinds raised by the matchmaker core. `SeatReservationFailed`
/// is the sole retriable kind in `joinOrCreate`/`join`.
#[derive(Debug, Clone)]
pub enum MatchmakeError {
    HandlerMissing(String),
    CriteriaUnsatisfied(String),
    RoomIdUnknownOrLocked(String),
    SessionExpired(String),
    SeatReservationFailed(String),
    RemoteCallTimeout(String),
    RemoteCallError(String),
    UnhandledUserError(String),
    Unhandled(String),
}

impl MatchmakeError {
    /// `true` for the sole error kind that `joinOrCreate`/`join` retry on.
    pub fn is_retriable(&self) -> bool {
        matches!(self, MatchmakeError::SeatReservationFailed(_))
    }

    pub fn code(&self) -> i32 {
        match self {
            MatchmakeError::HandlerMissing(_) => ERR_MATCHMAKE_NO_HANDLER,
            MatchmakeError::CriteriaUnsatisfied(_) => ERR_MATCHMAKE_INVALID_CRITERIA,
            MatchmakeError::RoomIdUnknownOrLocked(_) => ERR_MATCHMAKE_INVALID_ROOM_ID,
            MatchmakeError::SessionExpired(_) => ERR_MATCHMAKE_EXPIRED,
            MatchmakeError::Unhandled(_) => ERR_MATCHMAKE_UNHANDLED,
            // Seat-reservation, remote-call and user errors all surface to the
            // transport as an unhandled matchmake failure; only the four
            // criteria above have their own dedicated wire code.
            MatchmakeError::SeatReservationFailed(_)
            | MatchmakeError::RemoteCallTimeout(_)
            | MatchmakeError::RemoteCallError(_)
            | MatchmakeError::UnhandledUserError(_) => ERR_MATCHMAKE_UNHANDLED,
        }
    }

    fn message(&self) -> &str {
        match self {
            MatchmakeError::HandlerMissing(m)
            | MatchmakeError::CriteriaUnsatisfied(m)
            | MatchmakeError::RoomIdUnknownOrLocked(m)
            | MatchmakeError::SessionExpired(m)
            | MatchmakeError::SeatReservationFailed(m)
            | MatchmakeError::RemoteCallTimeout(m)
            | MatchmakeError::RemoteCallError(m)
            | MatchmakeError::UnhandledUserError(m)
            | MatchmakeError::Unhandled(m) => m,
        }
    }
}

impl fmt::Display for MatchmakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for MatchmakeError {}

/// The JSON shape a matchmake failure takes when it crosses the transport
/// boundary: `{code, error}`.
#[derive(Serialize)]
pub struct WireError {
    pub code: i32,
    pub error: String,
}

impl From<&MatchmakeError> for WireError {
    fn from(err: &MatchmakeError) -> Self {
        Self {
            code: err.code(),
            error: err.message().to_string(),
        }
    }
}
