//! Shutdown coordination between the signal handler and the tick driver.
//!
//! Shutdown moves through [`ShutdownPhase`]s in order. The tick driver
//! waits on [`ShutdownState::initiated`] alongside its interval so it stops
//! between passes, never during one.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ShutdownPhase {
    Running = 0,
    /// No further scheduler passes start.
    Stopping = 1,
    /// Maps are being torn down.
    Unloading = 2,
    Complete = 3,
}

impl ShutdownPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::Stopping,
            2 => ShutdownPhase::Unloading,
            _ => ShutdownPhase::Complete,
        }
    }
}

/// Shared, cloneable shutdown progress.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    phase: Arc<AtomicU8>,
    changed: Arc<Notify>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(ShutdownPhase::Running as u8)),
            changed: Arc::new(Notify::new()),
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.phase() >= ShutdownPhase::Stopping
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.phase() == ShutdownPhase::Complete
    }

    /// Stops further map passes. Only the first call has an effect.
    pub fn initiate_shutdown(&self) {
        if self.advance_to(ShutdownPhase::Stopping) {
            info!("🛑 Shutdown initiated - no further map updates will run");
        }
    }

    /// Records that `maps` live maps are about to be unloaded.
    pub fn begin_unload(&self, maps: usize) {
        if self.advance_to(ShutdownPhase::Unloading) {
            info!("🧹 Unloading {} maps", maps);
        }
    }

    pub fn complete_shutdown(&self) {
        if self.advance_to(ShutdownPhase::Complete) {
            info!("✅ All maps unloaded - ready for final cleanup");
        }
    }

    /// Resolves once shutdown has been initiated.
    pub async fn initiated(&self) {
        self.reached(ShutdownPhase::Stopping).await
    }

    /// Resolves once every map has been unloaded.
    pub async fn completed(&self) {
        self.reached(ShutdownPhase::Complete).await
    }

    async fn reached(&self, phase: ShutdownPhase) {
        loop {
            // Registered before the check so a concurrent advance is not missed
            let notified = self.changed.notified();
            if self.phase() >= phase {
                return;
            }
            notified.await;
        }
    }

    /// Moves forward to `phase`. Phases never move backwards; false when
    /// `phase` (or a later one) was already reached.
    fn advance_to(&self, phase: ShutdownPhase) -> bool {
        let previous = self.phase.fetch_max(phase as u8, Ordering::AcqRel);
        if previous >= phase as u8 {
            return false;
        }
        self.changed.notify_waiters();
        true
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_phases_only_move_forward() {
        let state = ShutdownState::new();
        assert_eq!(state.phase(), ShutdownPhase::Running);
        assert!(!state.is_shutdown_initiated());

        state.begin_unload(3);
        assert_eq!(state.phase(), ShutdownPhase::Unloading);
        assert!(state.is_shutdown_initiated());

        state.initiate_shutdown();
        assert_eq!(state.phase(), ShutdownPhase::Unloading);

        state.complete_shutdown();
        assert!(state.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_waiters_wake_on_phase_change() {
        let state = ShutdownState::new();
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.completed().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        state.initiate_shutdown();
        state.complete_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();

        // Already reached: resolves immediately
        tokio::time::timeout(Duration::from_millis(50), state.initiated())
            .await
            .unwrap();
    }
}
