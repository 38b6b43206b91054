//! # Maps
//!
//! A [`Map`] is one live world or instance: its occupants, its terrain cells
//! and the dynamic obstacles used for collision queries. Maps are owned by
//! the [`MapRegistry`](crate::MapRegistry) and shared as [`MapRef`]s; during
//! a scheduler pass the worker ticking a map holds its write lock and is its
//! only mutator.
//!
//! The behaviour that differs between continents, dungeons and battlegrounds
//! is selected by [`MapVariant`]. Grid handling and queries live in
//! `cells`, dungeon bindings, resets and encounters in `instance`.

mod cells;
mod instance;

pub use instance::{DungeonState, InstanceResetMethod};

use crate::bindings::PersistentStateManager;
use crate::config::{MapConfig, MIN_UNLOAD_DELAY_MS};
use crate::player::{MapNotice, PlayerContext};
use crate::reset::ResetScheduler;
use crate::store::InstanceDataStore;
use crate::templates::{MapKind, MapTemplate};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use world_core::grid::{GridCellTable, GridCoord};
use world_core::spatial::DynamicMapTree;
use world_core::{Countdown, CountdownStatus, IntervalTimer, MapKey, ObjectHandle, PlayerId, TerrainProvider};

/// Shared handle to a live map.
pub type MapRef = Arc<RwLock<Map>>;

/// Services every map uses, owned by the registry.
pub struct MapContext {
    pub config: MapConfig,
    pub terrain: Arc<dyn TerrainProvider>,
    pub bindings: Arc<PersistentStateManager>,
    pub resets: Arc<Mutex<ResetScheduler>>,
    pub store: Arc<dyn InstanceDataStore>,
}

impl MapContext {
    pub fn new(config: MapConfig, terrain: Arc<dyn TerrainProvider>, store: Arc<dyn InstanceDataStore>) -> Self {
        Self {
            config,
            terrain,
            bindings: Arc::new(PersistentStateManager::new()),
            resets: Arc::new(Mutex::new(ResetScheduler::new())),
            store,
        }
    }
}

pub enum MapVariant {
    World,
    Dungeon(DungeonState),
    Battleground,
}

struct Occupant {
    context: PlayerContext,
    grid: Option<GridCoord>,
}

pub struct Map {
    key: MapKey,
    template: Arc<MapTemplate>,
    context: Arc<MapContext>,
    variant: MapVariant,
    players: BTreeMap<PlayerId, Occupant>,
    grids: GridCellTable,
    obstacles: DynamicMapTree,
    obstacle_grids: HashMap<ObjectHandle, GridCoord>,
    remove_list: Vec<ObjectHandle>,
    unload_timer: Countdown,
    grid_cleanup: IntervalTimer,
    visible_distance: f32,
    notices: Vec<MapNotice>,
    pending_work: u32,
    update_count: u64,
}

impl Map {
    fn with_variant(key: MapKey, template: Arc<MapTemplate>, context: Arc<MapContext>, variant: MapVariant) -> Self {
        let config = &context.config;
        let visible_distance = if template.kind.is_instanceable() {
            config.max_visible_distance_instances
        } else {
            config.max_visible_distance_continents
        };
        // Instances start counting down right away so one nobody enters
        // still goes away.
        let unload_timer = if template.kind.is_instanceable() {
            Countdown::armed(config.instance_unload_delay())
        } else {
            Countdown::disabled()
        };

        Self {
            key,
            grids: GridCellTable::new(config.grid_unload_delay()),
            obstacles: DynamicMapTree::new(config.rebalance_period_ms),
            obstacle_grids: HashMap::new(),
            remove_list: Vec::new(),
            unload_timer,
            grid_cleanup: IntervalTimer::new(config.grid_cleanup_interval_ms),
            visible_distance,
            notices: Vec::new(),
            pending_work: 0,
            update_count: 0,
            players: BTreeMap::new(),
            template,
            context,
            variant,
        }
    }

    /// A continent: one per template, never unloaded by the sweep.
    pub fn world(template: Arc<MapTemplate>, context: Arc<MapContext>) -> Self {
        let key = MapKey::continent(template.id);
        debug!("🌍 Creating world map {} ({})", key, template.name);
        Self::with_variant(key, template, context, MapVariant::World)
    }

    pub fn battleground(template: Arc<MapTemplate>, instance_id: u32, context: Arc<MapContext>) -> Self {
        let key = MapKey::new(template.id, instance_id);
        debug!("⚔️ Creating battleground map {} ({})", key, template.name);
        Self::with_variant(key, template, context, MapVariant::Battleground)
    }

    pub fn key(&self) -> MapKey {
        self.key
    }

    pub fn template(&self) -> &Arc<MapTemplate> {
        &self.template
    }

    pub fn kind(&self) -> MapKind {
        self.template.kind
    }

    pub fn variant(&self) -> &MapVariant {
        &self.variant
    }

    pub fn is_dungeon(&self) -> bool {
        matches!(self.variant, MapVariant::Dungeon(_))
    }

    pub fn visible_distance(&self) -> f32 {
        self.visible_distance
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn has_players(&self) -> bool {
        !self.players.is_empty()
    }

    pub fn contains_player(&self, player: PlayerId) -> bool {
        self.players.contains_key(&player)
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// Number of completed [`update`](Self::update) calls.
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn unload_timer_remaining(&self) -> Option<u32> {
        self.unload_timer.remaining()
    }

    /// Marks the start of asynchronous work (a save in flight, for example)
    /// that must finish before the map may unload.
    pub fn begin_async_work(&mut self) {
        self.pending_work += 1;
    }

    pub fn end_async_work(&mut self) {
        self.pending_work = self.pending_work.saturating_sub(1);
    }

    pub fn pending_work(&self) -> u32 {
        self.pending_work
    }

    /// Takes every notice recorded since the last call.
    pub fn drain_notices(&mut self) -> Vec<MapNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn pending_notices(&self) -> &[MapNotice] {
        &self.notices
    }

    fn can_enter(&self, player: &PlayerContext) -> bool {
        let max_players = self.template.max_players as usize;
        if self.template.kind.is_instanceable() && max_players > 0 && self.players.len() >= max_players {
            warn!(
                "⚠️ Player {} can not enter {}: instance is full ({} players)",
                player.name, self.key, max_players
            );
            return false;
        }
        true
    }

    /// Adds `player` to the map. Returns false when the player is already
    /// inside or the map is full.
    ///
    /// # Panics
    ///
    /// Entering a dungeon instance other than the one the player or their
    /// group is bound to.
    pub fn add_player(&mut self, player: PlayerContext) -> bool {
        if self.players.contains_key(&player.id) {
            warn!("⚠️ Player {} is already in map {}", player.name, self.key);
            return false;
        }
        if !self.can_enter(&player) {
            return false;
        }

        if self.template.kind.is_instanceable() {
            if self.is_dungeon() {
                self.bind_on_enter(&player);
                self.set_reset_schedule(false);
            }
            self.unload_timer.cancel();
            if let MapVariant::Dungeon(state) = &mut self.variant {
                state.clear_unload_flags();
            }
        }

        info!("🚪 Player '{}' is entering map {} ({})", player.name, self.key, self.template.name);
        let id = player.id;
        let position = player.position;
        self.players.insert(id, Occupant { context: player, grid: None });
        let grid = self.enter_grid(id, position.x, position.y);
        if let Some(occupant) = self.players.get_mut(&id) {
            occupant.grid = grid;
        }
        true
    }

    /// Removes a player. When the last player leaves an instance the unload
    /// countdown starts.
    pub fn remove_player(&mut self, player: PlayerId) -> Option<PlayerContext> {
        if !self.players.contains_key(&player) {
            return None;
        }

        if self.template.kind.is_instanceable() && !self.unload_timer.is_armed() && self.players.len() == 1 {
            let delay = match &self.variant {
                MapVariant::Dungeon(state) if state.unload_when_empty() => MIN_UNLOAD_DELAY_MS,
                _ => self.context.config.instance_unload_delay(),
            };
            self.unload_timer.arm(delay);
        }

        let occupant = self.players.remove(&player)?;
        if let Some(coord) = occupant.grid {
            self.leave_grid(player, coord);
        }
        debug!("🚶 Player '{}' left map {}", occupant.context.name, self.key);

        if self.is_dungeon() {
            self.set_reset_schedule(true);
        }
        Some(occupant.context)
    }

    /// One tick of this map.
    pub fn update(&mut self, elapsed_ms: u32) {
        self.update_count += 1;
        self.obstacles.update(elapsed_ms);
        if let Some(accumulated) = self.grid_cleanup.advance(elapsed_ms) {
            self.cleanup_grids(accumulated);
        }
    }

    /// Advances the unload countdown. True once an empty map with no
    /// outstanding work has waited out its delay.
    pub fn can_unload(&mut self, elapsed_ms: u32) -> bool {
        if !self.players.is_empty() || self.pending_work > 0 {
            return false;
        }
        self.unload_timer.tick(elapsed_ms) == CountdownStatus::Elapsed
    }

    /// Tears the map down: occupants are sent home, terrain cells and
    /// obstacles released.
    pub fn unload_all(&mut self) {
        if self.template.kind.is_instanceable() {
            self.teleport_all_to_homebind();
        } else {
            let ids: Vec<PlayerId> = self.players.keys().copied().collect();
            for id in ids {
                self.remove_player(id);
            }
        }

        if let MapVariant::Dungeon(state) = &self.variant {
            if state.reset_after_unload() {
                self.discard_saved_state();
            }
        }

        self.release_all_grids();
        for handle in self.obstacles.handles() {
            self.obstacles.remove(handle);
        }
        self.obstacle_grids.clear();
        self.remove_list.clear();
        info!("🗑️ Map {} ({}) unloaded", self.key, self.template.name);
    }

    /// Sends every occupant to their homebind.
    pub fn teleport_all_to_homebind(&mut self) {
        for id in self.player_ids() {
            self.notices.push(MapNotice::TeleportToHomebind { player: id, key: self.key });
            self.remove_player(id);
        }
    }
}
