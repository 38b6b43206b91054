//! Fixed-cadence tick driver.
//!
//! [`WorldServer`] measures wall time between ticks of a tokio interval and
//! hands it to [`MapRegistry::update`] as simulated elapsed time. Each pass
//! runs on the blocking pool so CPU-bound map updates never stall the
//! runtime.

use crate::error::MapError;
use crate::registry::MapRegistry;
use crate::shutdown::ShutdownState;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, trace};

pub struct WorldServer {
    registry: Arc<MapRegistry>,
    tick_interval: Duration,
}

impl WorldServer {
    pub fn new(registry: Arc<MapRegistry>, tick_interval_ms: u64) -> Self {
        Self {
            registry,
            tick_interval: Duration::from_millis(tick_interval_ms.max(1)),
        }
    }

    pub fn registry(&self) -> &Arc<MapRegistry> {
        &self.registry
    }

    /// Ticks the registry until shutdown is initiated, then unloads every
    /// map and marks shutdown complete.
    ///
    /// A panic inside a pass is a consistency violation and is resumed on
    /// the calling task.
    pub async fn run(&self, shutdown_state: ShutdownState) -> Result<(), MapError> {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();
        let mut tick_count: u64 = 0;

        info!("🕒 Map tick started with interval: {:?}", self.tick_interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_state.initiated() => {
                    info!("🕒 Map tick stopping - shutdown initiated");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let elapsed = u32::try_from((now - last_tick).as_millis()).unwrap_or(u32::MAX);
            last_tick = now;
            tick_count += 1;

            let registry = Arc::clone(&self.registry);
            match tokio::task::spawn_blocking(move || registry.update(elapsed)).await {
                Ok(ran) => trace!("🕒 Tick {} ({}ms elapsed, pass ran: {})", tick_count, elapsed, ran),
                Err(e) if e.is_panic() => {
                    error!("❌ Map update pass panicked on tick {}", tick_count);
                    std::panic::resume_unwind(e.into_panic());
                }
                Err(e) => {
                    error!("❌ Map update pass was cancelled: {}", e);
                    return Err(MapError::ThreadPool(e.to_string()));
                }
            }
        }

        shutdown_state.begin_unload(self.registry.len());
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || registry.unload_all())
            .await
            .map_err(|e| MapError::ThreadPool(e.to_string()))?;
        shutdown_state.complete_shutdown();
        Ok(())
    }
}
