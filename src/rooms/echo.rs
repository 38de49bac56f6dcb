//! A minimal lobby room: keeps a running log of joins, leaves and chat
//! lines. Exists so the crate has one concrete, runnable room type.

use crate::room::RoomLogic;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct EchoRoom {
    history: Vec<String>,
}

impl EchoRoom {
    pub fn new() -> Self {
        Self { history: Vec::new() }
    }
}

impl Default for EchoRoom {
    fn default() -> Self {
        Self::new()
    }
}

pub fn factory() -> Box<dyn RoomLogic> {
    Box::new(EchoRoom::new())
}

#[async_trait]
impl RoomLogic for EchoRoom {
    async fn on_create(&mut self, options: Value) -> Result<(), String> {
        log::info!("echo room created with options {options}");
        Ok(())
    }

    async fn on_join(&mut self, session_id: &str, _options: Value) -> Result<(), String> {
        self.history.push(format!("{session_id} joined"));
        Ok(())
    }

    async fn on_leave(&mut self, session_id: &str) {
        self.history.push(format!("{session_id} left"));
    }

    async fn call(&mut self, method: &str, args: Option<Value>) -> Result<Value, String> {
        match method {
            "say" => {
                let message = args
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "say requires a string argument".to_string())?;
                self.history.push(message.to_string());
                Ok(json!(self.history))
            }
            "history" => Ok(json!(self.history)),
            other => Err(format!("no such method: {other}")),
        }
    }
}
