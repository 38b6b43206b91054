//! Persistence of per-instance encounter data.
//!
//! Query execution against a real database lives elsewhere; the map
//! subsystem only needs this narrow interface.

use dashmap::DashMap;
use tracing::trace;
use world_core::MapKey;

pub trait InstanceDataStore: Send + Sync {
    /// Stores the serialized encounter log of an instance, replacing any
    /// previous value.
    fn save_encounters(&self, key: MapKey, data: &str);

    fn load_encounters(&self, key: MapKey) -> Option<String>;

    /// Forgets everything stored for `instance_id`.
    fn delete_instance(&self, instance_id: u32);

    /// Highest instance id with stored data, 0 when empty.
    fn max_instance_id(&self) -> u32;
}

/// Process-local store, used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    encounters: DashMap<MapKey, String>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.encounters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encounters.is_empty()
    }
}

impl InstanceDataStore for MemoryInstanceStore {
    fn save_encounters(&self, key: MapKey, data: &str) {
        trace!("💾 Saving encounters of {}: '{}'", key, data);
        self.encounters.insert(key, data.to_string());
    }

    fn load_encounters(&self, key: MapKey) -> Option<String> {
        self.encounters.get(&key).map(|data| data.clone())
    }

    fn delete_instance(&self, instance_id: u32) {
        self.encounters.retain(|key, _| key.instance_id != instance_id);
    }

    fn max_instance_id(&self) -> u32 {
        self.encounters
            .iter()
            .map(|entry| entry.key().instance_id)
            .max()
            .unwrap_or(0)
    }
}
