//! Remote Room Call: request/response over Presence, keyed by
//! room id, routing locally when the room is owned by this process.

use crate::errors::{MatchmakeError, IPC_ERROR, IPC_SUCCESS};
use crate::presence::{BoxFuture, Presence};
use crate::room::RoomHandle;
use crate::utils::generate_id;
use ahash::HashMap;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

pub type RoomArena = Mutex<HashMap<String, Arc<AsyncMutex<RoomHandle>>>>;

fn room_channel(room_id: &str) -> String {
    format!("${room_id}")
}

fn reply_channel(room_id: &str, request_id: &str) -> String {
    format!("{room_id}:{request_id}")
}

/// Fixed built-in remote-callable surface on every room, falling through
/// to the room-type's own method table for anything else.
pub async fn dispatch_local(
    room: &mut RoomHandle,
    method: &str,
    args: Option<Value>,
) -> Result<Value, String> {
    match method {
        "roomId" if args.is_none() => Ok(json!(room.room_id)),
        "maxClients" if args.is_none() => Ok(json!(room.max_clients)),
        "locked" if args.is_none() => Ok(json!(room.locked)),
        "hasReservedSeat" => {
            let session_id = args
                .as_ref()
                .and_then(|v| v.get(0))
                .and_then(|v| v.as_str())
                .ok_or_else(|| "hasReservedSeat requires a sessionId argument".to_string())?;
            Ok(json!(room.has_reserved_seat(session_id)))
        }
        "_reserveSeat" => {
            let arr = args
                .as_ref()
                .and_then(|v| v.as_array())
                .ok_or_else(|| "_reserveSeat requires [sessionId, ttlMs]".to_string())?;
            let session_id = arr
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| "_reserveSeat requires a sessionId".to_string())?;
            let ttl_ms = arr.get(1).and_then(|v| v.as_u64()).unwrap_or(8000);
            let reserved = room.reserve_seat(session_id, Duration::from_millis(ttl_ms));
            Ok(json!({
                "reserved": reserved,
                "clients": room.seat_count(),
                "locked": room.locked,
            }))
        }
        _ => room.logic.call(method, args).await,
    }
}

/// Invoke a method on `room_id`, routing locally if owned by this process
/// or over Presence otherwise. Returns `(owning_process_id, value)` per
/// the wire reply shape `[processId, value]`.
pub async fn remote_room_call(
    presence: &dyn Presence,
    process_id: &str,
    local_rooms: &RoomArena,
    room_id: &str,
    method: &str,
    args: Option<Value>,
    timeout: Duration,
) -> Result<(String, Value), MatchmakeError> {
    let local = { local_rooms.lock().unwrap().get(room_id).cloned() };
    if let Some(room) = local {
        let mut guard = room.lock().await;
        return dispatch_local(&mut guard, method, args)
            .await
            .map(|value| (process_id.to_string(), value))
            .map_err(MatchmakeError::UnhandledUserError);
    }

    let request_id = generate_id(12);
    let reply = reply_channel(room_id, &request_id);
    let (tx, rx) = oneshot::channel::<Value>();
    let tx = Mutex::new(Some(tx));

    let subscription = presence
        .subscribe(
            &reply,
            Arc::new(move |message: Value| -> BoxFuture<'static, ()> {
                if let Some(sender) = tx.lock().unwrap().take() {
                    let _ = sender.send(message);
                }
                Box::pin(async {})
            }),
        )
        .await;

    presence
        .publish(&room_channel(room_id), json!([method, request_id, args]))
        .await
        .map_err(|e| MatchmakeError::RemoteCallError(e.0))?;

    let outcome = tokio::time::timeout(timeout, rx).await;
    presence.unsubscribe(&subscription).await;

    match outcome {
        Err(_) => Err(MatchmakeError::RemoteCallTimeout(format!(
            "remote call {method} on room {room_id} timed out after {timeout:?}"
        ))),
        Ok(Err(_)) => Err(MatchmakeError::RemoteCallError(
            "reply channel dropped before a reply arrived".to_string(),
        )),
        Ok(Ok(reply)) => {
            let code = reply.get(0).and_then(|v| v.as_i64()).unwrap_or(IPC_ERROR as i64);
            let payload = reply.get(1).cloned().unwrap_or(Value::Null);
            if code == IPC_SUCCESS as i64 {
                let process_id = payload
                    .get(0)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let value = payload.get(1).cloned().unwrap_or(Value::Null);
                Ok((process_id, value))
            } else {
                let message = payload
                    .as_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| payload.to_string());
                Err(MatchmakeError::RemoteCallError(message))
            }
        }
    }
}

/// Subscribe the owning process to `$<roomId>`, answering every inbound
/// `[method, requestId, args]` message on the reply channel.
pub async fn subscribe_room_channel(
    presence: Arc<dyn Presence>,
    process_id: String,
    room_id: String,
    local_rooms: Arc<RoomArena>,
) -> crate::presence::Subscription {
    let channel = room_channel(&room_id);
    presence
        .subscribe(
            &channel,
            Arc::new(move |message: Value| -> BoxFuture<'static, ()> {
                let presence = presence.clone();
                let process_id = process_id.clone();
                let room_id = room_id.clone();
                let local_rooms = local_rooms.clone();
                Box::pin(async move {
                    let Some(arr) = message.as_array() else {
                        return;
                    };
                    let (Some(method), Some(request_id)) = (
                        arr.first().and_then(|v| v.as_str()),
                        arr.get(1).and_then(|v| v.as_str()),
                    ) else {
                        return;
                    };
                    let args = arr.get(2).cloned().filter(|v| !v.is_null());

                    let room = { local_rooms.lock().unwrap().get(&room_id).cloned() };
                    let Some(room) = room else { return };

                    let reply = {
                        let mut guard = room.lock().await;
                        dispatch_local(&mut guard, method, args).await
                    };
                    let reply_msg = match reply {
                        Ok(value) => json!([IPC_SUCCESS, [process_id, value]]),
                        Err(err) => json!([IPC_ERROR, err]),
                    };
                    let _ = presence
                        .publish(&reply_channel(&room_id, request_id), reply_msg)
                        .await;
                })
            }),
        )
        .await
}
