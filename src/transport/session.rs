//! The room-join WebSocket actor: confirms the
//! reservation on connect, proxies text frames to the local room's method
//! table, and frees the seat on disconnect.

use crate::errors::{MatchmakeError, JOIN_ERROR, WS_CLOSE_WITH_ERROR};
use crate::matchmaker::Matchmaker;
use crate::remote_call::dispatch_local;
use actix::prelude::*;
use actix_web_actors::ws::{self, ProtocolError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often a ping is sent to the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1500);
/// Disconnect a client that has missed two consecutive heartbeats.
const CLIENT_TIMEOUT: Duration = Duration::from_millis(1500 * 2);

pub struct RoomSession {
    matchmaker: Arc<Matchmaker>,
    room_id: String,
    session_id: String,
    hb: Instant,
}

impl RoomSession {
    pub fn new(matchmaker: Arc<Matchmaker>, room_id: String, session_id: String) -> Self {
        Self {
            matchmaker,
            room_id,
            session_id,
            hb: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for RoomSession {
    type Context = ws::WebsocketContext<Self>;

    /// Confirms the seat reservation before accepting traffic. A room the
    /// matchmaker doesn't host locally is a protocol-level failure (the
    /// client asked to join something that was never found) and closes with
    /// no application-level frame; a reservation that fails to convert into
    /// a client (expired, or the room's `on_join` hand-off itself throwing)
    /// is a `JOIN_ERROR` framed message followed by a `WS_CLOSE_WITH_ERROR`
    /// close, per the room-join path's two distinct failure modes.
    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        let matchmaker = self.matchmaker.clone();
        let room_id = self.room_id.clone();
        let session_id = self.session_id.clone();
        actix::fut::wrap_future::<_, Self>(async move {
            matchmaker.confirm_room_join(&room_id, &session_id).await
        })
        .map(|result, _act, ctx| {
            if let Err(err) = result {
                match err {
                    MatchmakeError::RoomIdUnknownOrLocked(_) => {
                        ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Protocol)));
                    }
                    other => {
                        let frame = json!({ "code": JOIN_ERROR, "error": other.to_string() });
                        if let Ok(text) = serde_json::to_string(&frame) {
                            ctx.text(text);
                        }
                        ctx.close(Some(ws::CloseReason {
                            code: ws::CloseCode::Other(WS_CLOSE_WITH_ERROR),
                            description: None,
                        }));
                    }
                }
                ctx.stop();
            }
        })
        .wait(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let matchmaker = self.matchmaker.clone();
        let room_id = self.room_id.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            if let Err(err) = matchmaker.leave_room(&room_id, &session_id).await {
                log::error!("leave_room failed for room {room_id}: {err}");
            }
        });
    }
}

impl StreamHandler<Result<ws::Message, ProtocolError>> for RoomSession {
    fn handle(&mut self, item: Result<ws::Message, ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                    return;
                };
                let Some(method) = parsed.get(0).and_then(|v| v.as_str()).map(str::to_string) else {
                    return;
                };
                let args = parsed.get(1).cloned();
                let Some(room) = self.matchmaker.local_room(&self.room_id) else {
                    ctx.stop();
                    return;
                };
                actix::fut::wrap_future::<_, Self>(async move {
                    let mut guard = room.lock().await;
                    dispatch_local(&mut guard, &method, args).await
                })
                .map(|result, _act, ctx| {
                    let reply = match result {
                        Ok(value) => json!({ "ok": value }),
                        Err(error) => json!({ "error": error }),
                    };
                    if let Ok(text) = serde_json::to_string(&reply) {
                        ctx.text(text);
                    }
                })
                .wait(ctx);
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                log::error!("room session protocol error: {err}");
                ctx.stop();
            }
        }
    }
}
