use super::{next_subscription_id, MessageHandler, Presence, PresenceError, Subscription};
use crate::utils::new_fast_hashmap;
use ahash::HashMap;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;

/// In-process Presence implementation. Stands in for the network-spanning
/// driver used when the whole fleet is a single process (tests, demos,
/// single-node deployments). A real deployment swaps this for a
/// Redis-backed (or similar) `Presence` impl without touching the
/// matchmaker.
#[derive(Default)]
pub struct LocalPresence {
    channels: Mutex<HashMap<String, Vec<(super::SubscriptionId, MessageHandler)>>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    counters: Mutex<HashMap<String, i64>>,
}

impl LocalPresence {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(new_fast_hashmap(64)),
            sets: Mutex::new(new_fast_hashmap(64)),
            counters: Mutex::new(new_fast_hashmap(64)),
        }
    }
}

#[async_trait]
impl Presence for LocalPresence {
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Subscription {
        let id = next_subscription_id();
        self.channels
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        Subscription {
            channel: channel.to_string(),
            id,
        }
    }

    async fn unsubscribe(&self, subscription: &Subscription) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(handlers) = channels.get_mut(&subscription.channel) {
            handlers.retain(|(id, _)| *id != subscription.id);
            if handlers.is_empty() {
                channels.remove(&subscription.channel);
            }
        }
    }

    async fn publish(&self, channel: &str, message: Value) -> Result<(), PresenceError> {
        let handlers: Vec<MessageHandler> = {
            let channels = self.channels.lock().unwrap();
            channels
                .get(channel)
                .map(|v| v.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(message.clone()).await;
        }
        Ok(())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), PresenceError> {
        self.sets
            .lock()
            .unwrap()
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<(), PresenceError> {
        if let Some(members) = self.sets.lock().unwrap().get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, PresenceError> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn incr(&self, key: &str) -> Result<i64, PresenceError> {
        let mut counters = self.counters.lock().unwrap();
        let value = counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn decr(&self, key: &str) -> Result<i64, PresenceError> {
        let mut counters = self.counters.lock().unwrap();
        let value = counters.entry(key.to_string()).or_insert(0);
        *value -= 1;
        Ok(*value)
    }

    async fn del(&self, key: &str) -> Result<(), PresenceError> {
        self.counters.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn publish_reaches_subscribers_and_unsubscribe_stops_delivery() {
        let presence = LocalPresence::new();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let sub = presence
            .subscribe(
                "$room1",
                Arc::new(move |_msg| {
                    let received = received_clone.clone();
                    Box::pin(async move {
                        received.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await;

        presence.publish("$room1", Value::Null).await.unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);

        presence.unsubscribe(&sub).await;
        presence.publish("$room1", Value::Null).await.unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn incr_decr_round_trip_and_admission_counter_semantics() {
        let presence = LocalPresence::new();
        assert_eq!(presence.incr("chat:c").await.unwrap(), 1);
        assert_eq!(presence.incr("chat:c").await.unwrap(), 2);
        assert_eq!(presence.decr("chat:c").await.unwrap(), 1);
        presence.del("chat:c").await.unwrap();
        assert_eq!(presence.incr("chat:c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_membership_tracks_room_ids_per_type() {
        let presence = LocalPresence::new();
        presence.sadd("chat", "room1").await.unwrap();
        presence.sadd("chat", "room2").await.unwrap();
        presence.srem("chat", "room1").await.unwrap();
        let members = presence.smembers("chat").await.unwrap();
        assert_eq!(members, vec!["room2".to_string()]);
    }
}
