//! Registry statistics for health logging.

use crate::bindings::BindingStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Live maps of every kind.
    pub live_maps: usize,
    /// Live dungeon and battleground maps.
    pub instances: usize,
    pub players_in_instances: usize,
    pub loaded_grids: usize,
    pub passes: u64,
    pub last_pass_ms: f64,
    pub simulated_time_ms: u64,
    pub bindings: BindingStats,
}

impl RegistryStats {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field_names() {
        let stats = RegistryStats { live_maps: 3, instances: 2, ..RegistryStats::default() };
        let json = stats.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["live_maps"], 3);
        assert_eq!(value["instances"], 2);
        assert_eq!(value["bindings"]["states"], 0);
    }
}
