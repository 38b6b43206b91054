//! Map subsystem configuration and defaults.
//!
//! Every timer in here is measured in milliseconds of simulated time, as
//! handed to [`MapRegistry::update`](crate::MapRegistry::update) by the tick
//! driver.

use crate::error::MapError;
use serde::{Deserialize, Serialize};
use tracing::warn;
use world_core::grid::MIN_GRID_DELAY_MS;
use world_core::spatial::DEFAULT_REBALANCE_PERIOD_MS;

/// Lower bound on an instance's unload delay.
pub const MIN_UNLOAD_DELAY_MS: u32 = 1;

/// Configuration consumed by the registry, the scheduler and every map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Minimum simulated time between two scheduler passes.
    pub map_update_interval_ms: u32,

    /// Interval at which terrain cells advance their idle countdowns.
    pub grid_cleanup_interval_ms: u32,

    /// Idle time before an unviewed terrain cell unloads (floored at one minute).
    pub grid_unload_delay_ms: u32,

    /// Time an empty instance stays loaded before the sweep destroys it.
    pub instance_unload_delay_ms: u32,

    /// Worker threads ticking maps in parallel. 0 ticks inline.
    pub worker_threads: usize,

    pub max_visible_distance_continents: f32,

    pub max_visible_distance_instances: f32,

    /// Simulated time between dynamic-tree rebalance checks.
    pub rebalance_period_ms: u32,

    /// A single map tick taking longer than this (wall clock) is logged.
    pub tick_budget_ms: u64,

    /// Highest instance id already handed out in a previous run.
    pub max_persisted_instance_id: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            map_update_interval_ms: 100,
            grid_cleanup_interval_ms: 60_000,
            grid_unload_delay_ms: 300_000,
            instance_unload_delay_ms: 1_800_000,
            worker_threads: 0,
            max_visible_distance_continents: 90.0,
            max_visible_distance_instances: 170.0,
            rebalance_period_ms: DEFAULT_REBALANCE_PERIOD_MS,
            tick_budget_ms: 1_000,
            max_persisted_instance_id: 0,
        }
    }
}

impl MapConfig {
    /// Instance unload delay with the minimum applied.
    pub fn instance_unload_delay(&self) -> u32 {
        self.instance_unload_delay_ms.max(MIN_UNLOAD_DELAY_MS)
    }

    /// Terrain-cell idle delay with the minimum applied.
    pub fn grid_unload_delay(&self) -> u32 {
        self.grid_unload_delay_ms.max(MIN_GRID_DELAY_MS)
    }

    pub fn validate(&self) -> Result<(), MapError> {
        if self.map_update_interval_ms == 0 {
            return Err(MapError::Config("map_update_interval_ms must be greater than 0".to_string()));
        }
        if self.grid_cleanup_interval_ms == 0 {
            return Err(MapError::Config("grid_cleanup_interval_ms must be greater than 0".to_string()));
        }
        if self.rebalance_period_ms == 0 {
            return Err(MapError::Config("rebalance_period_ms must be greater than 0".to_string()));
        }
        for (name, distance) in [
            ("max_visible_distance_continents", self.max_visible_distance_continents),
            ("max_visible_distance_instances", self.max_visible_distance_instances),
        ] {
            if !(distance > 0.0 && distance.is_finite()) {
                return Err(MapError::Config(format!("{name} must be a positive distance")));
            }
        }

        let cpus = num_cpus::get();
        if self.worker_threads > cpus {
            warn!(
                "⚠️ {} map worker threads configured on a machine with {} CPUs",
                self.worker_threads, cpus
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rebalance_period_ms, 200);
        assert_eq!(config.worker_threads, 0);
    }

    #[test]
    fn test_delays_are_floored() {
        let config = MapConfig {
            instance_unload_delay_ms: 0,
            grid_unload_delay_ms: 5,
            ..MapConfig::default()
        };
        assert_eq!(config.instance_unload_delay(), MIN_UNLOAD_DELAY_MS);
        assert_eq!(config.grid_unload_delay(), MIN_GRID_DELAY_MS);
    }

    #[test]
    fn test_zero_update_interval_rejected() {
        let config = MapConfig { map_update_interval_ms: 0, ..MapConfig::default() };
        assert!(matches!(config.validate(), Err(MapError::Config(_))));
    }
}
