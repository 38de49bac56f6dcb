//! Transport Adapter: an actix-web server exposing the HTTP
//! matchmake endpoint and the room-join WebSocket endpoint.

use crate::matchmaker::Matchmaker;
use crate::transport::matchmake_session::MatchmakeSession;
use crate::transport::session::RoomSession;
use actix_web::web::{get, Data, Path, Payload, Query};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Deserialize)]
struct JoinQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// `GET /matchmake/:method/:name`: a WebSocket that answers exactly one
/// request — the first message is the client's join options, the reply
/// is `{room, sessionId}` or `{code, error}`, then the socket closes.
async fn matchmake(
    req: HttpRequest,
    payload: Payload,
    path: Path<(String, String)>,
    matchmaker: Data<Arc<Matchmaker>>,
) -> actix_web::Result<HttpResponse> {
    let (method, name) = path.into_inner();
    let session = MatchmakeSession::new(matchmaker.get_ref().clone(), method, name);
    actix_web_actors::ws::start(session, &req, payload)
}

/// `GET /:name/:roomId?sessionId=...`: the room-join WebSocket.
/// One socket per session; compression is left disabled (actix-web-actors'
/// `ws::start` negotiates no extensions by default).
async fn join_room(
    req: HttpRequest,
    payload: Payload,
    path: Path<(String, String)>,
    query: Query<JoinQuery>,
    matchmaker: Data<Arc<Matchmaker>>,
) -> actix_web::Result<HttpResponse> {
    let (_name, room_id) = path.into_inner();
    let session = RoomSession::new(
        matchmaker.get_ref().clone(),
        room_id,
        query.session_id.clone(),
    );
    actix_web_actors::ws::start(session, &req, payload)
}

async fn query_rooms(
    path: Path<String>,
    matchmaker: Data<Arc<Matchmaker>>,
) -> HttpResponse {
    let listings = matchmaker.query(Some(&path.into_inner()), json!({})).await;
    HttpResponse::Ok().json(listings)
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HashMap::from([("status", "ok")]))
}

pub async fn start(matchmaker: Arc<Matchmaker>, bind_addr: &str) -> std::io::Result<()> {
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(matchmaker.clone()))
            .route("/health", get().to(health))
            .route("/matchmake/{method}/{name}", get().to(matchmake))
            .route("/query/{name}", get().to(query_rooms))
            .route("/{name}/{roomId}", get().to(join_room))
    })
    .bind(bind_addr)?
    .run()
    .await
}
