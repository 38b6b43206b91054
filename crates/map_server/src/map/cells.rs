//! Terrain cells, dynamic obstacles and position queries of a [`Map`].

use super::Map;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use world_core::grid::{GridCoord, GridState, GridTransition};
use world_core::spatial::{DynamicMapTree, ObstacleModel, VolumeModel};
use world_core::{ObjectHandle, PlayerId, Vec3, WorldPosition};

/// How far below the query point obstacle heights are searched when the
/// terrain below is unknown.
pub const DEFAULT_HEIGHT_SEARCH: f32 = 50.0;

impl Map {
    /// Registers `player` as a viewer of the cell under `(x, y)`, loading
    /// terrain if needed. `None` when the position is outside the grid.
    pub(super) fn enter_grid(&mut self, player: PlayerId, x: f32, y: f32) -> Option<GridCoord> {
        let Some(coord) = GridCoord::compute(x, y) else {
            warn!("⚠️ Player {} entered map {} outside the grid at ({}, {})", player, self.key, x, y);
            return None;
        };
        if let GridTransition::Reactivated = self.grids.get_or_create(coord).add_viewer(player) {
            trace!("🔄 {} of map {} reactivated", coord, self.key);
        }
        self.ensure_grid_loaded(coord);
        Some(coord)
    }

    pub(super) fn leave_grid(&mut self, player: PlayerId, coord: GridCoord) {
        if let Some(cell) = self.grids.get_mut(coord) {
            if let GridTransition::Idled = cell.remove_viewer(player) {
                trace!("💤 {} of map {} is idle", coord, self.key);
            }
        }
    }

    /// Loads terrain for an invalid cell. A failed load leaves the cell
    /// invalid; it is retried on the next cleanup pass while viewers remain.
    fn ensure_grid_loaded(&mut self, coord: GridCoord) -> bool {
        let template_id = self.key.template_id;
        let cell = self.grids.get_or_create(coord);
        if cell.state() != GridState::Invalid {
            return true;
        }
        match self.context.terrain.load(template_id, coord) {
            Ok(tile) => {
                cell.activate(tile);
                debug!("🗺️ Loaded {} of map {}", coord, self.key);
                true
            }
            Err(e) => {
                warn!("⚠️ {}", e);
                false
            }
        }
    }

    /// Moves a player, switching cells when they cross a border.
    pub fn relocate_player(&mut self, player: PlayerId, position: WorldPosition) -> bool {
        let Some(occupant) = self.players.get_mut(&player) else {
            return false;
        };
        occupant.context.position = position;
        let old = occupant.grid;
        let new = GridCoord::compute(position.x, position.y);
        if old == new {
            return true;
        }

        if let Some(coord) = old {
            self.leave_grid(player, coord);
        }
        let entered = self.enter_grid(player, position.x, position.y);
        if let Some(occupant) = self.players.get_mut(&player) {
            occupant.grid = entered;
        }
        true
    }

    /// Loads the cell under `(x, y)` and pins it against unloading.
    pub fn force_load_grid(&mut self, x: f32, y: f32) -> bool {
        let Some(coord) = GridCoord::compute(x, y) else {
            return false;
        };
        self.grids.get_or_create(coord).set_unload_lock(true);
        self.ensure_grid_loaded(coord)
    }

    /// Drops the pin set by [`force_load_grid`](Self::force_load_grid).
    pub fn release_grid_lock(&mut self, x: f32, y: f32) {
        if let Some(cell) = GridCoord::compute(x, y).and_then(|coord| self.grids.get_mut(coord)) {
            cell.set_unload_lock(false);
        }
    }

    pub(super) fn cleanup_grids(&mut self, elapsed_ms: u32) {
        let mut retry = Vec::new();
        for cell in self.grids.iter_mut() {
            match cell.cleanup_tick(elapsed_ms) {
                GridTransition::Unloaded(residents) => {
                    debug!("🧹 Unloaded {} of map {}", cell.coord(), self.key);
                    for handle in residents {
                        if self.obstacles.contains(handle) {
                            self.obstacles.remove(handle);
                        }
                        self.obstacle_grids.remove(&handle);
                    }
                }
                GridTransition::Idled => trace!("💤 {} of map {} is idle", cell.coord(), self.key),
                GridTransition::Relocked => trace!("🔒 {} of map {} is locked in memory", cell.coord(), self.key),
                _ => {}
            }
            if cell.state() == GridState::Invalid && cell.has_viewers() {
                retry.push(cell.coord());
            }
        }
        for coord in retry {
            self.ensure_grid_loaded(coord);
        }
    }

    pub(super) fn release_all_grids(&mut self) {
        for cell in self.grids.iter_mut() {
            if cell.state() == GridState::Invalid {
                continue;
            }
            if let GridTransition::Unloaded(residents) = cell.release() {
                for handle in residents {
                    if self.obstacles.contains(handle) {
                        self.obstacles.remove(handle);
                    }
                }
            }
        }
    }

    pub fn grid_state(&self, x: f32, y: f32) -> Option<GridState> {
        GridCoord::compute(x, y)
            .and_then(|coord| self.grids.get(coord))
            .map(|cell| cell.state())
    }

    pub fn is_loaded(&self, x: f32, y: f32) -> bool {
        GridCoord::compute(x, y)
            .and_then(|coord| self.grids.get(coord))
            .is_some_and(|cell| cell.is_loaded())
    }

    /// True when no live cell covers `(x, y)`: never loaded, or flagged for
    /// removal.
    pub fn is_removal_grid(&self, x: f32, y: f32) -> bool {
        !matches!(
            self.grid_state(x, y),
            Some(GridState::Active) | Some(GridState::Idle)
        )
    }

    pub fn loaded_grid_count(&self) -> usize {
        self.grids.loaded_count()
    }

    fn terrain_height(&self, x: f32, y: f32) -> Option<f32> {
        let coord = GridCoord::compute(x, y)?;
        let tile = self.grids.get(coord)?.terrain()?;
        Some(tile.height_at(x, y))
    }

    /// Highest ground under `(x, y, z)`: terrain or the top of a dynamic
    /// obstacle, whichever is higher.
    pub fn get_height(&self, x: f32, y: f32, z: f32) -> Option<f32> {
        let terrain = self.terrain_height(x, y);
        let search_from = 2.0 + terrain.map_or(z, |h| z.max(h));
        let search_dist = terrain.map_or(DEFAULT_HEIGHT_SEARCH, |h| search_from - h);
        let dynamic = self.obstacles.get_height(x, y, search_from, search_dist);
        match (terrain, dynamic) {
            (Some(t), Some(d)) => Some(t.max(d)),
            (t, d) => t.or(d),
        }
    }

    pub fn is_in_line_of_sight(&self, from: Vec3, to: Vec3) -> bool {
        self.obstacles.is_in_line_of_sight(from, to)
    }

    /// First obstacle hit between `from` and `to`, pulled back towards
    /// `from` by `modify_dist`. Returns `to` when nothing is hit.
    pub fn get_object_hit_pos(&self, from: Vec3, to: Vec3, modify_dist: f32) -> (bool, Vec3) {
        self.obstacles.get_object_hit_pos(from, to, modify_dist)
    }

    pub fn obstacles(&self) -> &DynamicMapTree {
        &self.obstacles
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.size()
    }

    /// Inserts a dynamic obstacle and records it as resident of its cell,
    /// so it goes away when the cell unloads.
    ///
    /// # Panics
    ///
    /// Inserting the same obstacle twice, or one outside the world grid.
    pub fn add_obstacle(&mut self, model: Arc<ObstacleModel>) {
        let handle = model.handle();
        let position = model.position();
        self.obstacles.insert(model);
        if let Some(coord) = GridCoord::compute(position.x, position.y) {
            self.grids.get_or_create(coord).add_resident(handle);
            self.obstacle_grids.insert(handle, coord);
        }
    }

    /// Defers removal of an obstacle to the end of the current tick.
    pub fn queue_obstacle_removal(&mut self, handle: ObjectHandle) -> bool {
        if !self.obstacles.contains(handle) || self.remove_list.contains(&handle) {
            return false;
        }
        self.remove_list.push(handle);
        true
    }

    /// Applies queued removals. Returns how many obstacles went away.
    pub fn remove_all_objects_in_remove_list(&mut self) -> usize {
        let mut removed = 0;
        for handle in std::mem::take(&mut self.remove_list) {
            if !self.obstacles.contains(handle) {
                continue;
            }
            self.obstacles.remove(handle);
            if let Some(coord) = self.obstacle_grids.remove(&handle) {
                if let Some(cell) = self.grids.get_mut(coord) {
                    cell.remove_resident(handle);
                }
            }
            removed += 1;
        }
        removed
    }
}
