//! The Registered Handler: the per-room-type registration
//! carrying a constructor, default options, the query projection used by
//! matchmaking, and lifecycle event sinks.

use crate::registry::SortSpec;
use crate::room::RoomLogic;
use serde_json::Value;

pub type RoomFactory = Box<dyn Fn() -> Box<dyn RoomLogic> + Send + Sync>;
pub type FilterOptionsFn = Box<dyn Fn(&Value) -> Value + Send + Sync>;
pub type LifecycleSink = Box<dyn Fn(&str) + Send + Sync>;

/// Fixed set of lifecycle callback slots.
#[derive(Default)]
pub struct HandlerEvents {
    pub on_create: Option<LifecycleSink>,
    pub on_join: Option<LifecycleSink>,
    pub on_leave: Option<LifecycleSink>,
    pub on_lock: Option<LifecycleSink>,
    pub on_unlock: Option<LifecycleSink>,
    pub on_dispose: Option<LifecycleSink>,
}

const DEFAULT_MAX_CLIENTS: u32 = 4;

/// A registered room type. At most one exists per name; calling
/// `Matchmaker::define` again for the same name replaces it and triggers
/// stale-room cleanup for that name.
pub struct RegisteredHandler {
    pub name: String,
    factory: RoomFactory,
    pub default_options: Value,
    pub max_clients: u32,
    pub private: bool,
    filter_options: Option<FilterOptionsFn>,
    pub sort_options: Option<SortSpec>,
    pub events: HandlerEvents,
}

impl RegisteredHandler {
    pub fn instantiate(&self) -> Box<dyn RoomLogic> {
        (self.factory)()
    }

    /// Project client join options into the filter fields a query uses
    /// to pick a matching room.
    pub fn filter_fields(&self, client_options: &Value) -> Value {
        match &self.filter_options {
            Some(f) => f(client_options),
            None => Value::Object(Default::default()),
        }
    }
}

/// Fluent builder for a `RegisteredHandler`, the Rust analogue of
/// Colyseus's `gameServer.define(name, RoomClass, defaults)` chain.
pub struct RoomDefinition {
    name: String,
    factory: RoomFactory,
    default_options: Value,
    max_clients: u32,
    private: bool,
    filter_options: Option<FilterOptionsFn>,
    sort_options: Option<SortSpec>,
    events: HandlerEvents,
}

impl RoomDefinition {
    pub fn new(name: impl Into<String>, factory: RoomFactory) -> Self {
        Self {
            name: name.into(),
            factory,
            default_options: Value::Object(Default::default()),
            max_clients: DEFAULT_MAX_CLIENTS,
            private: false,
            filter_options: None,
            sort_options: None,
            events: HandlerEvents::default(),
        }
    }

    pub fn default_options(mut self, options: Value) -> Self {
        self.default_options = options;
        self
    }

    pub fn max_clients(mut self, max_clients: u32) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn filter_by(mut self, filter: FilterOptionsFn) -> Self {
        self.filter_options = Some(filter);
        self
    }

    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.sort_options = Some(sort);
        self
    }

    pub fn on_create(mut self, sink: LifecycleSink) -> Self {
        self.events.on_create = Some(sink);
        self
    }

    pub fn on_join(mut self, sink: LifecycleSink) -> Self {
        self.events.on_join = Some(sink);
        self
    }

    pub fn on_leave(mut self, sink: LifecycleSink) -> Self {
        self.events.on_leave = Some(sink);
        self
    }

    pub fn on_lock(mut self, sink: LifecycleSink) -> Self {
        self.events.on_lock = Some(sink);
        self
    }

    pub fn on_unlock(mut self, sink: LifecycleSink) -> Self {
        self.events.on_unlock = Some(sink);
        self
    }

    pub fn on_dispose(mut self, sink: LifecycleSink) -> Self {
        self.events.on_dispose = Some(sink);
        self
    }

    pub fn build(self) -> RegisteredHandler {
        RegisteredHandler {
            name: self.name,
            factory: self.factory,
            default_options: self.default_options,
            max_clients: self.max_clients,
            private: self.private,
            filter_options: self.filter_options,
            sort_options: self.sort_options,
            events: self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomLogic;
    use async_trait::async_trait;

    struct NoopLogic;

    #[async_trait]
    impl RoomLogic for NoopLogic {
        async fn on_create(&mut self, _options: Value) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn default_max_clients_applies_when_unset() {
        let handler = RoomDefinition::new("chat", Box::new(|| Box::new(NoopLogic) as _)).build();
        assert_eq!(handler.max_clients, DEFAULT_MAX_CLIENTS);
    }

    #[test]
    fn filter_fields_falls_back_to_empty_object_without_projection() {
        let handler = RoomDefinition::new("chat", Box::new(|| Box::new(NoopLogic) as _)).build();
        assert_eq!(handler.filter_fields(&Value::Null), serde_json::json!({}));
    }

    #[test]
    fn filter_fields_uses_registered_projection() {
        let handler = RoomDefinition::new("chat", Box::new(|| Box::new(NoopLogic) as _))
            .filter_by(Box::new(|opts| {
                serde_json::json!({ "mode": opts.get("mode").cloned().unwrap_or(Value::Null) })
            }))
            .build();
        let fields = handler.filter_fields(&serde_json::json!({ "mode": "ranked" }));
        assert_eq!(fields, serde_json::json!({ "mode": "ranked" }));
    }
}
