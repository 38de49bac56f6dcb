use super::{FindConditions, Listing, RegistryDriver, RegistryError, SortSpec};
use crate::utils::new_fast_hashmap;
use ahash::HashMap;
use async_trait::async_trait;
use std::sync::Mutex;

/// In-memory `RegistryDriver`. A production fleet would back this with a
/// shared store (e.g. the presence driver's own network, or a database);
/// this implementation is linearizable per-listing because all mutation
/// goes through a single `Mutex`.
#[derive(Default)]
pub struct LocalRegistryDriver {
    listings: Mutex<HashMap<String, Listing>>,
}

impl LocalRegistryDriver {
    pub fn new() -> Self {
        Self {
            listings: Mutex::new(new_fast_hashmap(256)),
        }
    }
}

#[async_trait]
impl RegistryDriver for LocalRegistryDriver {
    async fn find(&self, conditions: &FindConditions) -> Vec<Listing> {
        self.listings
            .lock()
            .unwrap()
            .values()
            .filter(|listing| conditions.matches(listing))
            .cloned()
            .collect()
    }

    async fn find_one(&self, conditions: &FindConditions, sort: Option<&SortSpec>) -> Option<Listing> {
        let matches: Vec<Listing> = self
            .listings
            .lock()
            .unwrap()
            .values()
            .filter(|listing| conditions.matches(listing))
            .cloned()
            .collect();
        match sort {
            Some(spec) => spec.pick_best(&matches).cloned(),
            None => matches.into_iter().next(),
        }
    }

    async fn save(&self, listing: &Listing) -> Result<(), RegistryError> {
        self.listings
            .lock()
            .unwrap()
            .insert(listing.room_id.clone(), listing.clone());
        Ok(())
    }

    async fn remove(&self, room_id: &str) -> Result<(), RegistryError> {
        self.listings.lock().unwrap().remove(room_id);
        Ok(())
    }
}
