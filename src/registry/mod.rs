//! The Registry Driver contract: a persisted index of room
//! listings, one row per live room, queryable by any process but
//! mutated in practice only by the listing's owning process.

mod local;

pub use local::LocalRegistryDriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A room listing. Exactly one exists per live room; `process_id`
/// is immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub room_id: String,
    pub name: String,
    pub process_id: String,
    pub locked: bool,
    pub private: bool,
    pub max_clients: u32,
    pub clients: u32,
    /// Open set of user-defined filter fields projected from client join
    /// options by the room-type's `filter_options` projection.
    pub metadata: Value,
}

/// Query conditions for `find`/`find_one`. `metadata` is matched as a
/// submap: every key present there must equal the same key in the
/// listing's metadata object.
#[derive(Debug, Clone, Default)]
pub struct FindConditions {
    pub room_id: Option<String>,
    pub name: Option<String>,
    pub locked: Option<bool>,
    pub private: Option<bool>,
    pub metadata: Value,
}

impl FindConditions {
    pub fn by_room_id(room_id: impl Into<String>) -> Self {
        Self {
            room_id: Some(room_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        if let Some(room_id) = &self.room_id {
            if &listing.room_id != room_id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &listing.name != name {
                return false;
            }
        }
        if let Some(locked) = self.locked {
            if listing.locked != locked {
                return false;
            }
        }
        if let Some(private) = self.private {
            if listing.private != private {
                return false;
            }
        }
        if let Some(obj) = self.metadata.as_object() {
            let listing_obj = listing.metadata.as_object();
            for (key, value) in obj {
                match listing_obj.and_then(|o| o.get(key)) {
                    Some(found) if found == value => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

/// Sort a `find_one` query by a listing field, descending or ascending.
/// Unknown fields fall back to the listing's metadata object.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    fn key(&self, listing: &Listing) -> f64 {
        match self.field.as_str() {
            "clients" => listing.clients as f64,
            "maxClients" => listing.max_clients as f64,
            other => listing
                .metadata
                .get(other)
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
        }
    }

    pub fn pick_best<'a>(&self, listings: &'a [Listing]) -> Option<&'a Listing> {
        listings.iter().max_by(|a, b| {
            let ord = self.key(a).partial_cmp(&self.key(b)).unwrap();
            if self.descending {
                ord
            } else {
                ord.reverse()
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct RegistryError(pub String);

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "registry error: {}", self.0)
    }
}

impl std::error::Error for RegistryError {}

#[async_trait]
pub trait RegistryDriver: Send + Sync {
    /// All listings matching `conditions`; cross-listing queries may
    /// observe slightly stale data relative to a same-instant `save`.
    async fn find(&self, conditions: &FindConditions) -> Vec<Listing>;

    /// A single matching listing, optionally picking the best match by
    /// `sort` (the source's `.findOne(conditions).sort(spec)` chained
    /// before awaiting).
    async fn find_one(&self, conditions: &FindConditions, sort: Option<&SortSpec>) -> Option<Listing>;

    /// Build a new listing's data. Buffered: invisible to `find`/`find_one`
    /// until `save` is called with it.
    fn create_instance(&self, initial: Listing) -> Listing {
        initial
    }

    async fn save(&self, listing: &Listing) -> Result<(), RegistryError>;

    async fn remove(&self, room_id: &str) -> Result<(), RegistryError>;
}
