//! Configuration management for the world daemon.
//!
//! Loads the TOML file, validates it and converts the `[world]` section into
//! the [`MapConfig`] consumed by the map registry.

use map_server::{MapConfig, MapKind, MapTemplate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

/// Default tick interval for serde deserialization
fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_preload_continents() -> Vec<u32> {
    vec![0, 1]
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tick cadence and map lifecycle settings
    pub world: WorldSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Map templates known to this server
    #[serde(default)]
    pub maps: Vec<MapTemplate>,
}

/// Tick cadence plus every timer and limit of the map subsystem.
///
/// Fields missing from the file fall back to [`MapConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSettings {
    /// Wall-clock period of the tick driver
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "defaults::map_update_interval")]
    pub map_update_interval_ms: u32,
    #[serde(default = "defaults::grid_cleanup_interval")]
    pub grid_cleanup_interval_ms: u32,
    #[serde(default = "defaults::grid_unload_delay")]
    pub grid_unload_delay_ms: u32,
    #[serde(default = "defaults::instance_unload_delay")]
    pub instance_unload_delay_ms: u32,
    /// 0 updates every map on the tick thread
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "defaults::visible_distance_continents")]
    pub max_visible_distance_continents: f32,
    #[serde(default = "defaults::visible_distance_instances")]
    pub max_visible_distance_instances: f32,
    #[serde(default = "defaults::rebalance_period")]
    pub rebalance_period_ms: u32,
    #[serde(default = "defaults::tick_budget")]
    pub tick_budget_ms: u64,
    #[serde(default)]
    pub max_persisted_instance_id: u32,
    /// Continents created at startup
    #[serde(default = "default_preload_continents")]
    pub preload_continents: Vec<u32>,
}

mod defaults {
    use map_server::MapConfig;

    pub fn map_update_interval() -> u32 {
        MapConfig::default().map_update_interval_ms
    }

    pub fn grid_cleanup_interval() -> u32 {
        MapConfig::default().grid_cleanup_interval_ms
    }

    pub fn grid_unload_delay() -> u32 {
        MapConfig::default().grid_unload_delay_ms
    }

    pub fn instance_unload_delay() -> u32 {
        MapConfig::default().instance_unload_delay_ms
    }

    pub fn visible_distance_continents() -> f32 {
        MapConfig::default().max_visible_distance_continents
    }

    pub fn visible_distance_instances() -> f32 {
        MapConfig::default().max_visible_distance_instances
    }

    pub fn rebalance_period() -> u32 {
        MapConfig::default().rebalance_period_ms
    }

    pub fn tick_budget() -> u64 {
        MapConfig::default().tick_budget_ms
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn or error
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for WorldSettings {
    fn default() -> Self {
        let map = MapConfig::default();
        Self {
            tick_interval_ms: default_tick_interval(),
            map_update_interval_ms: map.map_update_interval_ms,
            grid_cleanup_interval_ms: map.grid_cleanup_interval_ms,
            grid_unload_delay_ms: map.grid_unload_delay_ms,
            instance_unload_delay_ms: map.instance_unload_delay_ms,
            worker_threads: map.worker_threads,
            max_visible_distance_continents: map.max_visible_distance_continents,
            max_visible_distance_instances: map.max_visible_distance_instances,
            rebalance_period_ms: map.rebalance_period_ms,
            tick_budget_ms: map.tick_budget_ms,
            max_persisted_instance_id: map.max_persisted_instance_id,
            preload_continents: default_preload_continents(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            world: WorldSettings::default(),
            logging: LoggingSettings::default(),
            maps: vec![
                MapTemplate::new(0, "Eastern Kingdoms", MapKind::Continent),
                MapTemplate::new(1, "Kalimdor", MapKind::Continent),
                MapTemplate::new(33, "Shadowfang Keep", MapKind::Dungeon)
                    .with_encounters(8)
                    .with_reset_delay(7_200_000)
                    .with_max_players(5),
                MapTemplate::new(409, "Molten Core", MapKind::Raid)
                    .with_encounters(10)
                    .with_reset_delay(604_800_000)
                    .with_max_players(40),
                MapTemplate::new(489, "Warsong Gulch", MapKind::Battleground)
                    .with_max_players(20),
            ],
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// The `[world]` section as the registry's configuration.
    pub fn to_map_config(&self) -> MapConfig {
        let world = &self.world;
        MapConfig {
            map_update_interval_ms: world.map_update_interval_ms,
            grid_cleanup_interval_ms: world.grid_cleanup_interval_ms,
            grid_unload_delay_ms: world.grid_unload_delay_ms,
            instance_unload_delay_ms: world.instance_unload_delay_ms,
            worker_threads: world.worker_threads,
            max_visible_distance_continents: world.max_visible_distance_continents,
            max_visible_distance_instances: world.max_visible_distance_instances,
            rebalance_period_ms: world.rebalance_period_ms,
            tick_budget_ms: world.tick_budget_ms,
            max_persisted_instance_id: world.max_persisted_instance_id,
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.world.tick_interval_ms == 0 {
            return Err("world.tick_interval_ms must be greater than 0".to_string());
        }

        self.to_map_config().validate().map_err(|e| e.to_string())?;

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        let mut seen = HashSet::new();
        for template in &self.maps {
            if !seen.insert(template.id) {
                return Err(format!("Map template {} is defined more than once", template.id));
            }
            if template.kind == MapKind::Continent && template.encounters > 0 {
                return Err(format!("Continent {} can not track encounters", template.id));
            }
        }

        for id in &self.world.preload_continents {
            match self.maps.iter().find(|template| template.id == *id) {
                None => return Err(format!("Preloaded continent {id} has no map template")),
                Some(template) if template.kind != MapKind::Continent => {
                    return Err(format!("Preloaded map {id} is not a continent"));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.world.tick_interval_ms, 50);
        assert_eq!(config.world.map_update_interval_ms, 100);
        assert_eq!(config.world.grid_unload_delay_ms, 300_000);
        assert_eq!(config.world.instance_unload_delay_ms, 1_800_000);
        assert_eq!(config.world.rebalance_period_ms, 200);
        assert_eq!(config.world.worker_threads, 0);
        assert_eq!(config.world.preload_continents, vec![0, 1]);

        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);

        assert_eq!(config.maps.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_map_config_matches_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.to_map_config(), MapConfig::default());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.world.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.world.map_update_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.maps.push(MapTemplate::new(33, "Duplicate", MapKind::Dungeon));
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.world.preload_continents = vec![33];
        let err = config.validate().unwrap_err();
        assert!(err.contains("not a continent"));

        let mut config = AppConfig::default();
        config.world.preload_continents = vec![530];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_world_section_uses_defaults() {
        let content = r#"
            [world]
            worker_threads = 4
            instance_unload_delay_ms = 5000

            [logging]
            level = "debug"

            [[maps]]
            id = 0
            name = "Eastern Kingdoms"
            kind = "continent"

            [[maps]]
            id = 36
            name = "Deadmines"
            kind = "dungeon"
            encounters = 6
        "#;
        let config: AppConfig = toml::from_str(content).unwrap();

        assert_eq!(config.world.worker_threads, 4);
        assert_eq!(config.world.instance_unload_delay_ms, 5000);
        assert_eq!(config.world.tick_interval_ms, 50);
        assert_eq!(config.world.map_update_interval_ms, 100);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.maps[1].kind, MapKind::Dungeon);
        assert_eq!(config.maps[1].encounters, 6);
        assert_eq!(config.maps[1].max_players, 0);
        // Continent 1 is preloaded by default but not defined here
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worldd.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.world.tick_interval_ms, 50);
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.maps, config.maps);
        assert_eq!(reloaded.to_map_config(), config.to_map_config());
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let content = r#"
            [world]
            tick_interval_ms = 20
            preload_continents = []

            [logging]
            level = "warn"
            json_format = true
        "#;
        fs::write(temp_file.path(), content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf()).await.unwrap();
        assert_eq!(config.world.tick_interval_ms, 20);
        assert!(config.world.preload_continents.is_empty());
        assert!(config.logging.json_format);
        assert!(config.maps.is_empty());
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_invalid_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[world\ntick_interval_ms = ").await.unwrap();

        let result = AppConfig::load_from_file(&temp_file.path().to_path_buf()).await;
        assert!(result.is_err());
    }
}
