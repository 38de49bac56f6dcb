//! The matchmake WebSocket path: one request per socket. The first
//! text/binary message is the decoded JSON join-options body; the reply
//! is `{room, sessionId}` or `{code, error}`, after which the socket is
//! closed.

use crate::errors::WireError;
use crate::matchmaker::{Matchmaker, EXPOSED_METHODS};
use actix::prelude::*;
use actix_web_actors::ws::{self, ProtocolError};
use serde_json::Value;
use std::sync::Arc;

pub struct MatchmakeSession {
    matchmaker: Arc<Matchmaker>,
    method: String,
    name: String,
    /// Guards against a second message being processed on a socket that
    /// already answered its one request.
    answered: bool,
}

impl MatchmakeSession {
    pub fn new(matchmaker: Arc<Matchmaker>, method: String, name: String) -> Self {
        Self {
            matchmaker,
            method,
            name,
            answered: false,
        }
    }

    fn handle_body(&mut self, body: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        if self.answered {
            return;
        }
        self.answered = true;

        if !EXPOSED_METHODS.contains(&self.method.as_str()) {
            let err = crate::errors::MatchmakeError::Unhandled(format!(
                "'{}' is not a matchmake method",
                self.method
            ));
            self.reply_error(&err, ctx);
            ctx.close(None);
            return;
        }

        let options: Value = if body.is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_slice(body) {
                Ok(value) => value,
                Err(_) => serde_json::json!({}),
            }
        };

        let matchmaker = self.matchmaker.clone();
        let method = self.method.clone();
        let name = self.name.clone();
        actix::fut::wrap_future::<_, Self>(async move {
            matchmaker.handle_matchmake(&method, &name, options).await
        })
        .map(|result, _act, ctx| {
            match result {
                Ok(join_result) => {
                    if let Ok(text) = serde_json::to_string(&join_result) {
                        ctx.text(text);
                    }
                }
                Err(err) => {
                    let wire = WireError::from(&err);
                    if let Ok(text) = serde_json::to_string(&wire) {
                        ctx.text(text);
                    }
                }
            }
            ctx.close(None);
        })
        .wait(ctx);
    }

    fn reply_error(&self, err: &crate::errors::MatchmakeError, ctx: &mut ws::WebsocketContext<Self>) {
        let wire = WireError::from(err);
        if let Ok(text) = serde_json::to_string(&wire) {
            ctx.text(text);
        }
    }
}

impl Actor for MatchmakeSession {
    type Context = ws::WebsocketContext<Self>;
}

impl StreamHandler<Result<ws::Message, ProtocolError>> for MatchmakeSession {
    fn handle(&mut self, item: Result<ws::Message, ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Text(text)) => self.handle_body(text.as_bytes(), ctx),
            Ok(ws::Message::Binary(bytes)) => self.handle_body(&bytes, ctx),
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                log::error!("matchmake session protocol error: {err}");
                ctx.stop();
            }
        }
    }
}
