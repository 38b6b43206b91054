//! Fan-out of per-map updates.
//!
//! With no worker pool every map is updated inline, in the order given.
//! With a pool each map becomes one task of a [`rayon::Scope`]; the scope
//! only returns once every task has finished, which is the barrier the
//! registry relies on before it touches maps again.

use crate::error::MapError;
use crate::map::MapRef;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassReport {
    pub maps_updated: usize,
    /// Maps whose own update exceeded the tick budget.
    pub slow_maps: usize,
    pub duration: Duration,
}

pub struct UpdateScheduler {
    pool: RwLock<Option<rayon::ThreadPool>>,
    workers: usize,
    tick_budget: Duration,
}

impl UpdateScheduler {
    /// `workers == 0` runs every update inline on the calling thread.
    pub fn new(workers: usize, tick_budget_ms: u64) -> Result<Self, MapError> {
        let pool = if workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|index| format!("map-worker-{index}"))
                .build()
                .map_err(|e| MapError::ThreadPool(e.to_string()))?;
            info!("🧵 Map update pool started with {} workers", workers);
            Some(pool)
        } else {
            debug!("🧵 Map updates run inline");
            None
        };

        Ok(Self {
            pool: RwLock::new(pool),
            workers,
            tick_budget: Duration::from_millis(tick_budget_ms),
        })
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.read().is_some()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Updates every map exactly once and returns when all are done.
    ///
    /// A panicking map update is re-raised here after the other tasks have
    /// completed.
    pub fn run(&self, maps: &[MapRef], elapsed_ms: u32) -> PassReport {
        let started = Instant::now();
        let slow = AtomicUsize::new(0);
        let budget = self.tick_budget;

        let pool = self.pool.read();
        match pool.as_ref() {
            Some(pool) => pool.scope(|scope| {
                for map in maps {
                    let slow = &slow;
                    scope.spawn(move |_| {
                        if !update_within_budget(map, elapsed_ms, budget) {
                            slow.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                }
            }),
            None => {
                for map in maps {
                    if !update_within_budget(map, elapsed_ms, budget) {
                        slow.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        drop(pool);

        PassReport {
            maps_updated: maps.len(),
            slow_maps: slow.into_inner(),
            duration: started.elapsed(),
        }
    }

    /// Drops the worker pool. Later passes run inline.
    pub fn shutdown(&self) {
        if self.pool.write().take().is_some() {
            info!("🧵 Map update pool stopped");
        }
    }
}

/// Updates one map, warning with its key when the update alone overran
/// `budget`. False when it did.
fn update_within_budget(map: &MapRef, elapsed_ms: u32, budget: Duration) -> bool {
    let mut map = map.write();
    let started = Instant::now();
    map.update(elapsed_ms);
    let took = started.elapsed();
    if took > budget {
        warn!("🐌 Map {} took {:?} to update (budget {:?})", map.key(), took, budget);
        return false;
    }
    true
}
