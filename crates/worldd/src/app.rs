//! Main application logic and lifecycle management.
//!
//! [`Application`] builds the map registry from the loaded configuration,
//! runs the tick driver until a shutdown signal arrives, then waits for
//! every map to unload.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals};
use map_server::{MapRegistry, MemoryInstanceStore, RegistryStats, ShutdownState, TemplateStore, WorldServer};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use world_core::FlatTerrain;

/// Seconds between two health reports.
const HEALTH_INTERVAL_SECS: u64 = 60;

/// Owns the registry and the tick driver for the lifetime of the process.
pub struct Application {
    config: AppConfig,
    registry: Arc<MapRegistry>,
    server: WorldServer,
}

impl Application {
    /// Loads configuration, applies CLI overrides, validates the result and
    /// builds the registry.
    ///
    /// Terrain is served flat at height 0 and saved instance data lives in
    /// memory only.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Some(workers) = args.workers {
            config.world.worker_threads = workers;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();

        let registry = Arc::new(MapRegistry::new(
            config.to_map_config(),
            TemplateStore::new(config.maps.iter().cloned()),
            Arc::new(FlatTerrain::new(0.0)),
            Arc::new(MemoryInstanceStore::new()),
        )?);
        let server = WorldServer::new(Arc::clone(&registry), config.world.tick_interval_ms);

        Ok(Self { config, registry, server })
    }

    /// Preloads continents, runs the tick driver and blocks until a signal
    /// has been received and every map is unloaded.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting world daemon");
        self.log_configuration_summary();

        let preloaded = self.registry.load_continents(&self.config.world.preload_continents)?;
        info!("🌍 {} continents loaded", preloaded);

        let shutdown_state = ShutdownState::new();

        let server_handle = {
            let server = self.server;
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move {
                match server.run(shutdown_state).await {
                    Ok(()) => info!("✅ Tick driver stopped"),
                    Err(e) => {
                        error!("❌ Tick driver error: {}", e);
                        std::process::exit(1);
                    }
                }
            })
        };

        let monitoring_handle = {
            let registry = Arc::clone(&self.registry);

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(HEALTH_INTERVAL_SECS));
                let mut last_passes = 0u64;

                loop {
                    interval.tick().await;

                    // Nothing delivers notices to clients in this process
                    for notice in registry.drain_notices() {
                        debug!("📨 Undelivered notice: {:?}", notice);
                    }

                    let stats = registry.stats();
                    let passes_this_period = stats.passes - last_passes;
                    last_passes = stats.passes;

                    info!(
                        "📊 World Health - {} maps | {} instances | {} players in instances | {} grids | {} passes/min",
                        stats.live_maps, stats.instances, stats.players_in_instances, stats.loaded_grids, passes_this_period
                    );

                    if stats.last_pass_ms > 0.0 && passes_this_period == 0 {
                        warn!("🐌 No map pass completed this period (last pass took {:.1}ms)", stats.last_pass_ms);
                    }
                }
            })
        };

        info!("✅ World daemon is now running!");
        info!("🔍 Health monitoring active - stats every {} seconds", HEALTH_INTERVAL_SECS);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        signals::shutdown_on_signal(&shutdown_state).await?;

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = signals::wait_for_signal().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        monitoring_handle.abort();

        info!("⏳ Waiting for the tick driver to unload every map...");
        if let Err(e) = server_handle.await {
            error!("❌ Tick driver task failed: {}", e);
        }

        if !shutdown_state.is_shutdown_complete() {
            warn!("⚠️ Tick driver exited before every map was unloaded");
        }

        log_final_statistics(&self.registry.stats());

        info!("✅ World daemon shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        let world = &self.config.world;
        info!("📋 Configuration Summary:");
        info!("  🗺️ Map templates: {}", self.config.maps.len());
        info!(
            "  ⏱️ Tick every {}ms, map passes every {}ms",
            world.tick_interval_ms, world.map_update_interval_ms
        );
        if self.registry.is_parallel() {
            info!("  🧵 Map workers: {}", world.worker_threads);
        } else {
            info!("  🧵 Map workers: none, maps update on the tick thread");
        }
        info!(
            "  💤 Instance unload delay: {}ms | grid unload delay: {}ms",
            world.instance_unload_delay_ms, world.grid_unload_delay_ms
        );
    }
}

fn log_final_statistics(stats: &RegistryStats) {
    info!("📊 Final Statistics:");
    info!("  - Map passes: {}", stats.passes);
    info!("  - Simulated time: {}ms", stats.simulated_time_ms);
    info!("  - Saved instance states: {}", stats.bindings.states);
}
