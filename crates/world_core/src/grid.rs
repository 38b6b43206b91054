//! Terrain-cell lifecycle.
//!
//! A map is divided into [`MAX_NUMBER_OF_GRIDS`]² terrain cells. Each cell
//! that has ever been touched owns a [`GridCell`] driving it through
//!
//! ```text
//! Invalid ──load──▶ Active ───── no viewers ─────▶ Idle ──countdown──▶ Removal ──▶ Invalid
//!                     ▲                              │                   │
//!                     └───────viewer re-enters───────┘         (unload lock: back to Idle)
//! ```
//!
//! Timed transitions only advance on [`GridCell::cleanup_tick`], which the
//! owning map calls from its grid-cleanup interval rather than every tick.

use crate::countdown::{Countdown, CountdownStatus};
use crate::terrain::TerrainTile;
use crate::types::{ObjectHandle, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub const MAX_NUMBER_OF_GRIDS: u32 = 64;
pub const SIZE_OF_GRIDS: f64 = 533.333_33;
const CENTER_GRID_ID: f64 = (MAX_NUMBER_OF_GRIDS / 2) as f64;
const CENTER_GRID_OFFSET: f64 = SIZE_OF_GRIDS / 2.0;

/// Lower bound on the idle time before a terrain cell may unload.
pub const MIN_GRID_DELAY_MS: u32 = 60_000;

/// Address of one terrain cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
}

impl GridCoord {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Terrain cell containing world-space `(x, y)`, or `None` outside the map.
    pub fn compute(x: f32, y: f32) -> Option<Self> {
        let gx = ((x as f64 - CENTER_GRID_OFFSET) / SIZE_OF_GRIDS + CENTER_GRID_ID + 0.5).floor();
        let gy = ((y as f64 - CENTER_GRID_OFFSET) / SIZE_OF_GRIDS + CENTER_GRID_ID + 0.5).floor();
        let limit = MAX_NUMBER_OF_GRIDS as f64;
        if !(gx >= 0.0 && gx < limit && gy >= 0.0 && gy < limit) {
            return None;
        }
        Some(Self::new(gx as u32, gy as u32))
    }

    pub(crate) fn index(&self) -> usize {
        (self.x * MAX_NUMBER_OF_GRIDS + self.y) as usize
    }
}

impl std::fmt::Display for GridCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grid({},{})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridState {
    /// Never loaded, or released.
    Invalid,
    /// Terrain resident, objects ticking.
    Active,
    /// No viewers; counting down towards removal.
    Idle,
    /// Flagged for unload on the next cleanup pass.
    Removal,
}

/// What a call on [`GridCell`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridTransition {
    None,
    Activated,
    Idled,
    Reactivated,
    MarkedForRemoval,
    /// Unload lock held: the cell went back to idle instead of unloading.
    Relocked,
    /// Terrain dropped. Carries the resident objects the map must release.
    Unloaded(Vec<ObjectHandle>),
}

/// One terrain cell's lifecycle.
#[derive(Debug)]
pub struct GridCell {
    coord: GridCoord,
    state: GridState,
    viewers: HashSet<PlayerId>,
    residents: HashSet<ObjectHandle>,
    idle: Countdown,
    idle_delay: u32,
    unload_lock: bool,
    terrain: Option<Arc<TerrainTile>>,
}

impl GridCell {
    /// `idle_delay_ms` is floored at [`MIN_GRID_DELAY_MS`].
    pub fn new(coord: GridCoord, idle_delay_ms: u32) -> Self {
        Self {
            coord,
            state: GridState::Invalid,
            viewers: HashSet::new(),
            residents: HashSet::new(),
            idle: Countdown::disabled(),
            idle_delay: idle_delay_ms.max(MIN_GRID_DELAY_MS),
            unload_lock: false,
            terrain: None,
        }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.terrain.is_some()
    }

    pub fn terrain(&self) -> Option<&Arc<TerrainTile>> {
        self.terrain.as_ref()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn has_viewers(&self) -> bool {
        !self.viewers.is_empty()
    }

    pub fn idle_delay(&self) -> u32 {
        self.idle_delay
    }

    pub fn idle_remaining(&self) -> Option<u32> {
        self.idle.remaining()
    }

    pub fn unload_lock(&self) -> bool {
        self.unload_lock
    }

    pub fn set_unload_lock(&mut self, locked: bool) {
        self.unload_lock = locked;
    }

    pub fn add_resident(&mut self, handle: ObjectHandle) {
        self.residents.insert(handle);
    }

    pub fn remove_resident(&mut self, handle: ObjectHandle) -> bool {
        self.residents.remove(&handle)
    }

    pub fn resident_count(&self) -> usize {
        self.residents.len()
    }

    /// Invalid → Active with freshly loaded terrain.
    pub fn activate(&mut self, terrain: Arc<TerrainTile>) -> GridTransition {
        if self.state != GridState::Invalid {
            return GridTransition::None;
        }
        self.terrain = Some(terrain);
        self.state = GridState::Active;
        GridTransition::Activated
    }

    /// Registers a viewer. An idle or removal-flagged cell becomes active
    /// again; an invalid cell stays invalid until the map loads it.
    pub fn add_viewer(&mut self, viewer: PlayerId) -> GridTransition {
        if !self.viewers.insert(viewer) {
            return GridTransition::None;
        }
        match self.state {
            GridState::Idle | GridState::Removal => {
                self.idle.cancel();
                self.state = GridState::Active;
                GridTransition::Reactivated
            }
            _ => GridTransition::None,
        }
    }

    /// Drops a viewer. When the last one leaves an active cell, the idle
    /// countdown starts.
    pub fn remove_viewer(&mut self, viewer: PlayerId) -> GridTransition {
        if !self.viewers.remove(&viewer) {
            return GridTransition::None;
        }
        if self.viewers.is_empty() && self.state == GridState::Active {
            self.state = GridState::Idle;
            self.idle.arm(self.idle_delay);
            return GridTransition::Idled;
        }
        GridTransition::None
    }

    /// Advances the timed transitions by `elapsed_ms`. An active cell
    /// without viewers (one that was only force-loaded) starts idling here.
    pub fn cleanup_tick(&mut self, elapsed_ms: u32) -> GridTransition {
        match self.state {
            GridState::Invalid => GridTransition::None,
            GridState::Active => {
                if self.viewers.is_empty() {
                    self.state = GridState::Idle;
                    self.idle.arm(self.idle_delay);
                    GridTransition::Idled
                } else {
                    GridTransition::None
                }
            }
            GridState::Idle => match self.idle.tick(elapsed_ms) {
                CountdownStatus::Elapsed => {
                    self.state = GridState::Removal;
                    GridTransition::MarkedForRemoval
                }
                _ => GridTransition::None,
            },
            GridState::Removal => {
                if self.unload_lock {
                    self.state = GridState::Idle;
                    self.idle.arm(self.idle_delay);
                    GridTransition::Relocked
                } else {
                    self.release()
                }
            }
        }
    }

    /// Forces the cell back to `Invalid`, releasing terrain and residents.
    pub fn release(&mut self) -> GridTransition {
        self.state = GridState::Invalid;
        self.terrain = None;
        self.idle.cancel();
        GridTransition::Unloaded(self.residents.drain().collect())
    }
}

/// Lazily populated table of the [`GridCell`]s of one map.
#[derive(Debug)]
pub struct GridCellTable {
    cells: Vec<Option<GridCell>>,
    idle_delay: u32,
}

impl GridCellTable {
    pub fn new(idle_delay_ms: u32) -> Self {
        let slots = (MAX_NUMBER_OF_GRIDS * MAX_NUMBER_OF_GRIDS) as usize;
        Self {
            cells: (0..slots).map(|_| None).collect(),
            idle_delay: idle_delay_ms,
        }
    }

    pub fn get(&self, coord: GridCoord) -> Option<&GridCell> {
        self.cells[coord.index()].as_ref()
    }

    pub fn get_mut(&mut self, coord: GridCoord) -> Option<&mut GridCell> {
        self.cells[coord.index()].as_mut()
    }

    pub fn get_or_create(&mut self, coord: GridCoord) -> &mut GridCell {
        let idle_delay = self.idle_delay;
        self.cells[coord.index()].get_or_insert_with(|| GridCell::new(coord, idle_delay))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GridCell> + '_ {
        self.cells.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut GridCell> + '_ {
        self.cells.iter_mut().flatten()
    }

    pub fn loaded_count(&self) -> usize {
        self.iter().filter(|cell| cell.is_loaded()).count()
    }
}
