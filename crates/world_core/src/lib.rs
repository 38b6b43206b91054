//! # World Core
//!
//! Leaf data structures of the map subsystem: everything a single map needs
//! to bucket its objects, answer collision queries and decide which terrain
//! cells stay resident. Nothing here knows about the registry or the
//! scheduler.
//!
//! ## Components
//!
//! - **Spatial grid** ([`spatial::SpatialGridIndex`]): 64×64 uniform grid
//!   over the world extent with a DDA ray walk across cells
//! - **Volume index** ([`spatial::DynamicVolumeIndex`]): per-cell bounding
//!   interval hierarchy, rebuilt on a fixed period of simulated time
//! - **Dynamic map tree** ([`spatial::DynamicMapTree`]): line-of-sight,
//!   hit position and height queries against collidable obstacles
//! - **Grid cells** ([`grid::GridCell`]): Invalid/Active/Idle/Removal
//!   lifecycle of terrain cells driven by viewers and idle countdowns
//! - **Encounters** ([`encounter::EncounterLog`]): per-instance progress and
//!   its whitespace-separated persisted form
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use world_core::spatial::{DynamicMapTree, ObstacleModel};
//! use world_core::Vec3;
//!
//! let mut tree = DynamicMapTree::default();
//! let door = Arc::new(ObstacleModel::boxed("door", Vec3::new(10.0, 0.0, 0.0), Vec3::new(1.0, 3.0, 3.0)));
//! tree.insert(door.clone());
//!
//! assert!(!tree.is_in_line_of_sight(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0)));
//! door.set_collision_enabled(false);
//! assert!(tree.is_in_line_of_sight(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0)));
//! ```

pub mod countdown;
pub mod encounter;
pub mod error;
pub mod grid;
pub mod spatial;
pub mod terrain;
pub mod types;

pub use countdown::{Countdown, CountdownStatus, IntervalTimer};
pub use encounter::{EncounterLog, EncounterState};
pub use error::{EncounterError, TerrainError};
pub use grid::{GridCell, GridCellTable, GridCoord, GridState, GridTransition, MIN_GRID_DELAY_MS};
pub use terrain::{FlatTerrain, TerrainProvider, TerrainTable, TerrainTile};
pub use types::*;
