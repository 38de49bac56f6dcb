//! The Presence contract: pub/sub channels, atomic counters,
//! set membership and key deletion, provided by an external driver that
//! may be in-process or span a fleet of processes. All operations may
//! fail with transient errors; callers treat failure as "no effect" for
//! idempotent paths (`del`, `srem`) and surface failure otherwise.

mod local;

pub use local::LocalPresence;

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Invoked with the decoded payload of every message published on a
/// subscribed channel. Returns a future so handlers may perform their own
/// suspension (locking a room, awaiting user code) without Presence
/// having to know about it.
pub type MessageHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone)]
pub struct Subscription {
    pub channel: String,
    pub id: SubscriptionId,
}

#[derive(Debug, Clone)]
pub struct PresenceError(pub String);

impl std::fmt::Display for PresenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "presence error: {}", self.0)
    }
}

impl std::error::Error for PresenceError {}

#[async_trait]
pub trait Presence: Send + Sync {
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Subscription;
    async fn unsubscribe(&self, subscription: &Subscription);
    async fn publish(&self, channel: &str, message: Value) -> Result<(), PresenceError>;
    async fn sadd(&self, set: &str, member: &str) -> Result<(), PresenceError>;
    async fn srem(&self, set: &str, member: &str) -> Result<(), PresenceError>;
    async fn smembers(&self, set: &str) -> Result<Vec<String>, PresenceError>;
    async fn incr(&self, key: &str) -> Result<i64, PresenceError>;
    async fn decr(&self, key: &str) -> Result<i64, PresenceError>;
    async fn del(&self, key: &str) -> Result<(), PresenceError>;
}

pub(crate) fn next_subscription_id() -> SubscriptionId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    SubscriptionId(COUNTER.fetch_add(1, Ordering::Relaxed))
}
