//! # Spatial Indexing
//!
//! Two-level index for dynamic world objects:
//!
//! - [`SpatialGridIndex`] buckets objects into a fixed 64×64 grid of cells
//!   and walks cells along a ray with a 2D DDA.
//! - [`DynamicVolumeIndex`] is the per-cell bounding interval hierarchy that
//!   answers exact ray and point queries, rebuilt on a fixed period instead
//!   of on every mutation.
//!
//! [`DynamicMapTree`] layers line-of-sight and height helpers over the grid
//! for collidable [`ObstacleModel`]s.

pub mod bih;
pub mod cell;
pub mod dynamic_tree;
pub mod grid;
pub mod model;
pub mod volume;

pub use bih::BoundingIntervalHierarchy;
pub use cell::{Cell, CELL_COUNT, CELL_SIZE, GRID_EXTENT};
pub use dynamic_tree::DynamicMapTree;
pub use grid::SpatialGridIndex;
pub use model::{ObstacleModel, VolumeModel};
pub use volume::{DynamicVolumeIndex, DEFAULT_REBALANCE_PERIOD_MS};
