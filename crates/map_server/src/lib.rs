//! # Map Server - World and Instance Lifecycle
//!
//! Owns every live map of a persistent-world server: continents that exist
//! once, dungeon instances created on demand and bound to the players who
//! enter them, and battlegrounds created by their queue. The registry ticks
//! all maps on a worker pool, waits for them, then runs the global
//! maintenance that must not overlap a map update.
//!
//! ## Architecture Overview
//!
//! * **Registry** ([`MapRegistry`]) - key → map table behind one mutex,
//!   instance id allocation, maintenance sweep and reset application
//! * **Maps** ([`Map`]) - occupants, terrain cells, dynamic obstacles and
//!   queries; dungeon behaviour lives in [`map::InstanceResetMethod`] and
//!   friends
//! * **Update scheduler** ([`UpdateScheduler`]) - one task per map on a
//!   rayon pool with a barrier at the end of each pass
//! * **Bindings** ([`PersistentStateManager`]) - saved instance states and
//!   the player/group binds that point at them
//! * **Resets** ([`ResetScheduler`]) - empty-dungeon resets and raid reset
//!   cycles with warnings
//! * **Tick driver** ([`WorldServer`]) - tokio interval feeding simulated
//!   elapsed time to the registry until shutdown
//!
//! ## Pass Order
//!
//! 1. Every live map is updated once (inline or on the pool)
//! 2. Post-tick hooks run (cross-map movers such as transports)
//! 3. Deferred obstacle removals are flushed
//! 4. Due resets are applied
//! 5. Maps whose unload countdown elapsed are removed, then unloaded
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use map_server::{MapConfig, MapKind, MapRegistry, MapTemplate, MemoryInstanceStore, PlayerContext, TemplateStore};
//! use world_core::{FlatTerrain, WorldPosition};
//!
//! let templates = TemplateStore::new([
//!     MapTemplate::new(0, "Eastern Kingdoms", MapKind::Continent),
//!     MapTemplate::new(33, "Shadowfang Keep", MapKind::Dungeon).with_encounters(5),
//! ]);
//! let registry = MapRegistry::new(
//!     MapConfig::default(),
//!     templates,
//!     Arc::new(FlatTerrain::new(0.0)),
//!     Arc::new(MemoryInstanceStore::new()),
//! )
//! .unwrap();
//!
//! let player = PlayerContext::new("Aria", WorldPosition::new(-230.0, 2100.0, 80.0, 0.0));
//! let map = registry.create_or_get(33, Some(&player)).unwrap();
//! assert!(map.write().add_player(player));
//! assert_eq!(registry.stats().players_in_instances, 1);
//! ```
//!
//! ## Error Handling
//!
//! Recoverable failures ([`MapError`]) are returned. Consistency violations
//! such as entering an instance other than the bound one, or registering
//! the same map key twice, log an `error!` line and panic.

pub use bindings::{BindingStats, DungeonPersistentState, InstanceBind, PersistentStateManager};
pub use config::{MapConfig, MIN_UNLOAD_DELAY_MS};
pub use error::MapError;
pub use map::{DungeonState, InstanceResetMethod, Map, MapContext, MapRef, MapVariant};
pub use player::{GroupContext, MapNotice, PlayerContext};
pub use registry::{MapRegistry, PostTickHook};
pub use reset::{ResetAction, ResetEvent, ResetEventKind, ResetScheduler};
pub use scheduler::{PassReport, UpdateScheduler};
pub use server::WorldServer;
pub use shutdown::{ShutdownPhase, ShutdownState};
pub use stats::RegistryStats;
pub use store::{InstanceDataStore, MemoryInstanceStore};
pub use templates::{MapKind, MapTemplate, TemplateStore};

pub mod bindings;
pub mod config;
pub mod error;
pub mod map;
pub mod player;
pub mod registry;
pub mod reset;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod stats;
pub mod store;
pub mod templates;

mod tests;
