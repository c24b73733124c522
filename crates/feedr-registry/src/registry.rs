//! Process-wide feeder registry.
//!
//! Plain keyed storage: the registry owns no lifecycle logic. It is
//! constructed explicitly at startup and handed to whoever needs to
//! look feeders up; the supervisor drives start/stop.

use dashmap::DashMap;
use feedr_venues::Feeder;
use std::sync::Arc;
use tracing::debug;

/// Feeders keyed by lowercase venue id.
#[derive(Default)]
pub struct FeedRegistry {
    feeders: DashMap<String, Arc<dyn Feeder>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self {
            feeders: DashMap::new(),
        }
    }

    /// Register a feeder under its id. Replaces any previous entry
    /// and returns it.
    pub fn register(&self, feeder: Arc<dyn Feeder>) -> Option<Arc<dyn Feeder>> {
        let id = feeder.id().to_lowercase();
        debug!(venue = %id, "Feeder registered");
        self.feeders.insert(id, feeder)
    }

    /// Remove and return a feeder.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Feeder>> {
        self.feeders.remove(&id.to_lowercase()).map(|(_, f)| f)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Feeder>> {
        self.feeders.get(&id.to_lowercase()).map(|e| e.value().clone())
    }

    /// All registered feeders with their venue ids.
    pub fn list(&self) -> Vec<(String, Arc<dyn Feeder>)> {
        self.feeders
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.feeders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeders.is_empty()
    }
}
