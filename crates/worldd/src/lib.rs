//! # World Daemon - Main Entry Point
//!
//! Hosts the map registry of a persistent world: loads the configured map
//! templates, preloads continents and ticks every live map until shutdown.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! worldd
//!
//! # Specify custom configuration
//! worldd --config realm.toml
//!
//! # Tick maps on four worker threads with verbose logs
//! worldd --workers 4 --log-level debug
//!
//! # JSON logging for production
//! worldd --json-logs
//! ```
//!
//! ## Configuration
//!
//! The daemon loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! SIGINT (Ctrl+C) and SIGTERM stop the tick driver, after which every map
//! is unloaded. A second signal exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Parses the command line, sets up logging and runs the application until
/// shutdown.
///
/// Exits the process with code 1 when startup or the run fails.
///
/// Note: This function is called from an async context (main with #[tokio::main]),
/// so it should NOT have #[tokio::main] itself.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    let mut logging = config.logging;
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{LoggingSettings, WorldSettings};

#[cfg(test)]
mod tests {
    use super::*;
    use map_server::{MapRegistry, MemoryInstanceStore, PlayerContext, ShutdownState, TemplateStore, WorldServer};
    use std::path::PathBuf;
    use std::sync::Arc;
    use world_core::{FlatTerrain, WorldPosition};

    fn registry_from(config: &AppConfig) -> Arc<MapRegistry> {
        Arc::new(
            MapRegistry::new(
                config.to_map_config(),
                TemplateStore::new(config.maps.iter().cloned()),
                Arc::new(FlatTerrain::new(0.0)),
                Arc::new(MemoryInstanceStore::new()),
            )
            .expect("default config should build a registry"),
        )
    }

    #[test]
    fn test_default_config_builds_registry() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let registry = registry_from(&config);
        let loaded = registry.load_continents(&config.world.preload_continents).unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_parallel());
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs {
            config_path: PathBuf::from("test.toml"),
            log_level: Some("debug".to_string()),
            json_logs: true,
            workers: Some(2),
        };

        assert_eq!(args.config_path, PathBuf::from("test.toml"));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
        assert_eq!(args.workers, Some(2));
    }

    #[tokio::test]
    async fn test_application_creation_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("worldd.toml"),
            log_level: Some("debug".to_string()),
            json_logs: false,
            workers: Some(2),
        };

        let app = Application::new(args.clone()).await.unwrap();
        assert!(args.config_path.exists());
        drop(app);

        let bad = CliArgs {
            log_level: Some("chatty".to_string()),
            ..args
        };
        assert!(Application::new(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_configured_server_unloads_on_shutdown() {
        let mut config = AppConfig::default();
        config.world.tick_interval_ms = 5;
        config.world.map_update_interval_ms = 10;
        let registry = registry_from(&config);
        registry.load_continents(&config.world.preload_continents).unwrap();

        let player = PlayerContext::new("Aria", WorldPosition::new(-230.0, 2100.0, 80.0, 0.0));
        let map = registry.create_or_get(33, Some(&player)).unwrap();
        assert!(map.write().add_player(player));

        let server = WorldServer::new(Arc::clone(&registry), config.world.tick_interval_ms);
        let shutdown_state = ShutdownState::new();
        let handle = {
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move { server.run(shutdown_state).await })
        };

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        assert!(registry.stats().passes > 0);

        shutdown_state.initiate_shutdown();
        handle.await.unwrap().unwrap();

        assert!(shutdown_state.is_shutdown_complete());
        assert!(registry.is_empty());
    }
}
