//! The map registry: every live map, keyed by template and instance id.
//!
//! The key → map table sits behind one mutex. Lookups, creation and removal
//! happen inside it; ticking, unloading and terrain loading happen on a
//! cloned [`MapRef`] after the table lock has been released. A map is
//! always removed from the table before it is torn down, so nothing can
//! look up a half-unloaded map.

use crate::config::MapConfig;
use crate::error::MapError;
use crate::map::{InstanceResetMethod, Map, MapContext, MapRef};
use crate::player::{MapNotice, PlayerContext};
use crate::reset::ResetAction;
use crate::scheduler::UpdateScheduler;
use crate::stats::RegistryStats;
use crate::store::InstanceDataStore;
use crate::templates::{MapKind, MapTemplate, TemplateStore};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use world_core::{IntervalTimer, MapKey, TerrainProvider};

/// Global work run once per pass, after every map update has finished.
pub type PostTickHook = Box<dyn FnMut(u32) + Send>;

pub struct MapRegistry {
    templates: TemplateStore,
    context: Arc<MapContext>,
    maps: Mutex<HashMap<MapKey, MapRef>>,
    next_instance_id: AtomicU32,
    update_timer: Mutex<IntervalTimer>,
    clock_ms: AtomicU64,
    scheduler: UpdateScheduler,
    post_tick_hooks: Mutex<Vec<PostTickHook>>,
    notices: Mutex<Vec<MapNotice>>,
    passes: AtomicU64,
    last_pass: Mutex<Duration>,
}

impl MapRegistry {
    /// Builds the registry and its worker pool. The instance id allocator
    /// starts after the highest id known to the store or the configuration.
    pub fn new(
        config: MapConfig,
        templates: TemplateStore,
        terrain: Arc<dyn TerrainProvider>,
        store: Arc<dyn InstanceDataStore>,
    ) -> Result<Self, MapError> {
        config.validate()?;
        let scheduler = UpdateScheduler::new(config.worker_threads, config.tick_budget_ms)?;
        let max_instance_id = config.max_persisted_instance_id.max(store.max_instance_id());
        let update_timer = IntervalTimer::new(config.map_update_interval_ms);
        let context = Arc::new(MapContext::new(config, terrain, store));

        {
            let mut resets = context.resets.lock();
            for raid in templates.raids_with_reset() {
                resets.schedule_global_reset(raid.id, raid.reset_delay_ms, 0);
            }
        }

        info!(
            "🗺️ Map registry ready: {} templates, instance ids start after {}",
            templates.len(),
            max_instance_id
        );

        Ok(Self {
            templates,
            context,
            maps: Mutex::new(HashMap::new()),
            next_instance_id: AtomicU32::new(max_instance_id),
            update_timer: Mutex::new(update_timer),
            clock_ms: AtomicU64::new(0),
            scheduler,
            post_tick_hooks: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            passes: AtomicU64::new(0),
            last_pass: Mutex::new(Duration::ZERO),
        })
    }

    pub fn config(&self) -> &MapConfig {
        &self.context.config
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn context(&self) -> &Arc<MapContext> {
        &self.context
    }

    /// Simulated time advanced by completed passes.
    pub fn clock_ms(&self) -> u64 {
        self.clock_ms.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.maps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.lock().is_empty()
    }

    pub fn is_parallel(&self) -> bool {
        self.scheduler.is_parallel()
    }

    /// Next free instance id.
    ///
    /// # Panics
    ///
    /// When the id space is exhausted.
    pub fn generate_instance_id(&self) -> u32 {
        match self
            .next_instance_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| id.checked_add(1))
        {
            Ok(previous) => previous + 1,
            Err(_) => {
                error!("❌ Instance id space exhausted");
                panic!("instance id space exhausted");
            }
        }
    }

    pub fn find(&self, template_id: u32, instance_id: u32) -> Option<MapRef> {
        self.maps.lock().get(&MapKey::new(template_id, instance_id)).cloned()
    }

    /// Live maps of one template, ascending by instance id.
    pub fn maps_of(&self, template_id: u32) -> Vec<MapRef> {
        let maps = self.maps.lock();
        let mut found: Vec<(MapKey, MapRef)> = maps
            .iter()
            .filter(|(key, _)| key.template_id == template_id)
            .map(|(key, map)| (*key, Arc::clone(map)))
            .collect();
        found.sort_by_key(|(key, _)| *key);
        found.into_iter().map(|(_, map)| map).collect()
    }

    /// Every live map, ascending by key.
    pub fn snapshot(&self) -> Vec<MapRef> {
        let maps = self.maps.lock();
        let mut all: Vec<(MapKey, MapRef)> = maps.iter().map(|(key, map)| (*key, Arc::clone(map))).collect();
        all.sort_by_key(|(key, _)| *key);
        all.into_iter().map(|(_, map)| map).collect()
    }

    /// Returns the map `requester` should be placed in for `template_id`,
    /// creating it if needed.
    ///
    /// Continents exist once and ignore the requester. Instanceable
    /// templates resolve the instance from the requester's binds, or
    /// allocate a new one.
    ///
    /// # Panics
    ///
    /// An instanceable template requested without a requester, or a
    /// battleground requested by a player not queued into an existing one.
    pub fn create_or_get(&self, template_id: u32, requester: Option<&PlayerContext>) -> Result<MapRef, MapError> {
        let template = self
            .templates
            .get(template_id)
            .cloned()
            .ok_or(MapError::InvalidTemplate(template_id))?;

        if !template.kind.is_instanceable() {
            let key = MapKey::continent(template_id);
            let mut maps = self.maps.lock();
            if let Some(map) = maps.get(&key) {
                return Ok(Arc::clone(map));
            }
            let map = Arc::new(RwLock::new(Map::world(template, Arc::clone(&self.context))));
            maps.insert(key, Arc::clone(&map));
            info!("🌍 World map {} created", key);
            return Ok(map);
        }

        let Some(requester) = requester else {
            error!("❌ Instanceable map {} requested without a player to resolve the instance", template_id);
            panic!("instanceable map {template_id} requested without a requester");
        };
        Ok(self.create_instance(&template, requester))
    }

    fn create_instance(&self, template: &Arc<MapTemplate>, requester: &PlayerContext) -> MapRef {
        if template.kind == MapKind::Battleground {
            let Some(instance_id) = requester.battleground_instance else {
                error!("❌ Player '{}' requested battleground {} without being queued", requester.name, template.id);
                panic!("player {} requested battleground {} without an instance", requester.id, template.id);
            };
            return match self.find(template.id, instance_id) {
                Some(map) => map,
                None => {
                    error!(
                        "❌ Player '{}' was queued into battleground {}:{} which does not exist",
                        requester.name, template.id, instance_id
                    );
                    panic!("battleground {}:{} does not exist", template.id, instance_id);
                }
            };
        }

        let bound = self.context.bindings.bound_instance_for(requester, template.id);
        let mut maps = self.maps.lock();

        if let Some(instance_id) = bound {
            if let Some(map) = maps.get(&MapKey::new(template.id, instance_id)) {
                return Arc::clone(map);
            }
            debug!("💾 Restoring saved instance {} of map {}", instance_id, template.id);
            let map = Map::dungeon(
                Arc::clone(template),
                instance_id,
                Arc::clone(&self.context),
                true,
                self.reset_time_for_new(template),
            );
            return Self::register(&mut maps, map);
        }

        let instance_id = self.generate_instance_id();
        let map = Map::dungeon(
            Arc::clone(template),
            instance_id,
            Arc::clone(&self.context),
            false,
            self.reset_time_for_new(template),
        );
        info!("🏰 Instance {}:{} created for '{}'", template.id, instance_id, requester.name);
        Self::register(&mut maps, map)
    }

    fn reset_time_for_new(&self, template: &MapTemplate) -> u64 {
        if template.kind.is_raid() {
            return self.context.resets.lock().reset_time_for(template.id).unwrap_or(0);
        }
        if template.reset_delay_ms == 0 {
            return 0;
        }
        self.clock_ms() + template.reset_delay_ms
    }

    fn register(maps: &mut HashMap<MapKey, MapRef>, map: Map) -> MapRef {
        let key = map.key();
        if maps.contains_key(&key) {
            error!("❌ Map {} is already registered", key);
            panic!("map {key} registered twice");
        }
        let map = Arc::new(RwLock::new(map));
        maps.insert(key, Arc::clone(&map));
        map
    }

    /// Creates a battleground map with a fresh instance id.
    pub fn create_battleground(&self, template_id: u32) -> Result<MapRef, MapError> {
        let template = self
            .templates
            .get(template_id)
            .filter(|template| template.kind == MapKind::Battleground)
            .cloned()
            .ok_or(MapError::InvalidTemplate(template_id))?;

        let instance_id = self.generate_instance_id();
        let map = Map::battleground(template, instance_id, Arc::clone(&self.context));
        let mut maps = self.maps.lock();
        let map = Self::register(&mut maps, map);
        info!("⚔️ Battleground {}:{} created", template_id, instance_id);
        Ok(map)
    }

    /// Removes a map from the registry, then unloads it.
    pub fn destroy(&self, template_id: u32, instance_id: u32) -> Result<(), MapError> {
        let map = self
            .maps
            .lock()
            .remove(&MapKey::new(template_id, instance_id))
            .ok_or(MapError::NotFound { template_id, instance_id })?;
        self.unload(&map);
        Ok(())
    }

    fn unload(&self, map: &MapRef) {
        let mut map = map.write();
        map.unload_all();
        self.notices.lock().extend(map.drain_notices());
    }

    /// Creates the given continents up front.
    pub fn load_continents(&self, template_ids: &[u32]) -> Result<usize, MapError> {
        let mut loaded = 0;
        for &template_id in template_ids {
            let kind = self
                .templates
                .get(template_id)
                .map(|template| template.kind)
                .ok_or(MapError::InvalidTemplate(template_id))?;
            if kind.is_instanceable() {
                warn!("⚠️ Map {} is instanceable and can not be preloaded", template_id);
                continue;
            }
            self.create_or_get(template_id, None)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Registers global work to run after the map updates of every pass.
    pub fn add_post_tick_hook(&self, hook: impl FnMut(u32) + Send + 'static) {
        self.post_tick_hooks.lock().push(Box::new(hook));
    }

    /// Moves every raid reset to the short forced warning cycle.
    pub fn reset_all_raids(&self) {
        self.context.resets.lock().reset_all_raids(self.clock_ms());
        info!("♻️ All raid resets forced");
    }

    /// Advances the registry by `elapsed_ms`. Returns false when the update
    /// interval has not been reached yet and nothing ran.
    ///
    /// A pass updates every live map, waits for all of them, then runs the
    /// post-tick hooks, flushes deferred removals, applies due resets and
    /// destroys maps that may unload.
    pub fn update(&self, elapsed_ms: u32) -> bool {
        let Some(elapsed) = self.update_timer.lock().advance(elapsed_ms) else {
            return false;
        };
        let now = self.clock_ms.fetch_add(u64::from(elapsed), Ordering::AcqRel) + u64::from(elapsed);

        let maps = self.snapshot();
        let report = self.scheduler.run(&maps, elapsed);

        for hook in self.post_tick_hooks.lock().iter_mut() {
            hook(elapsed);
        }
        for map in &maps {
            map.write().remove_all_objects_in_remove_list();
        }

        self.apply_resets(now);
        self.sweep(elapsed);

        self.passes.fetch_add(1, Ordering::Relaxed);
        *self.last_pass.lock() = report.duration;
        true
    }

    fn apply_resets(&self, now: u64) {
        let actions = self.context.resets.lock().poll(now);
        for action in actions {
            match action {
                ResetAction::ResetInstance { template_id, instance_id } => match self.find(template_id, instance_id) {
                    Some(map) => {
                        map.write().reset(InstanceResetMethod::RespawnDelay);
                    }
                    None => self.discard_instance(instance_id),
                },
                ResetAction::Warn { template_id, time_left_ms } => {
                    for map in self.maps_of(template_id) {
                        map.write().send_reset_warnings(time_left_ms);
                    }
                }
                ResetAction::ResetAll { template_id } => self.reset_template(template_id),
            }
        }
    }

    /// Global reset of every instance of a template.
    fn reset_template(&self, template_id: u32) {
        let bindings = &self.context.bindings;
        for instance_id in bindings.instances_of(template_id) {
            bindings.unbind_state(instance_id);
        }
        for map in self.maps_of(template_id) {
            map.write().reset(InstanceResetMethod::Global);
        }
        for instance_id in bindings.instances_of(template_id) {
            if self.find(template_id, instance_id).is_none() {
                self.discard_instance(instance_id);
            }
        }
        info!("♻️ Map {} reset globally", template_id);
    }

    fn discard_instance(&self, instance_id: u32) {
        self.context.bindings.remove_state(instance_id);
        self.context.store.delete_instance(instance_id);
        debug!("🗑️ Saved instance {} discarded", instance_id);
    }

    /// Destroys maps whose unload countdown elapsed. Countdowns are advanced
    /// outside the table lock; the lock is only retaken to remove the keys.
    pub(crate) fn sweep(&self, elapsed: u32) {
        let candidates: Vec<(MapKey, MapRef)> = self
            .maps
            .lock()
            .iter()
            .map(|(key, map)| (*key, Arc::clone(map)))
            .collect();
        let expired: Vec<(MapKey, MapRef)> = candidates
            .into_iter()
            .filter(|(_, map)| map.write().can_unload(elapsed))
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut removed = Vec::with_capacity(expired.len());
        {
            let mut maps = self.maps.lock();
            for (key, map) in &expired {
                // Skip keys destroyed and recreated since the snapshot
                if maps.get(key).is_some_and(|live| Arc::ptr_eq(live, map)) {
                    removed.extend(maps.remove(key));
                }
            }
        }

        for map in removed {
            let (key, occupied) = {
                let map = map.read();
                (map.key(), map.has_players())
            };
            // Someone entered between the countdown and the removal
            if occupied {
                let mut maps = self.maps.lock();
                if !maps.contains_key(&key) {
                    maps.insert(key, map);
                    debug!("🧹 Map {} was entered while being swept and stays loaded", key);
                    continue;
                }
            }
            self.unload(&map);
            debug!("🧹 Map {} unloaded by the maintenance sweep", key);
        }
    }

    /// Unloads every map and stops the worker pool.
    pub fn unload_all(&self) {
        let mut maps: Vec<(MapKey, MapRef)> = self.maps.lock().drain().collect();
        maps.sort_by_key(|(key, _)| *key);
        let count = maps.len();
        for (_, map) in maps {
            self.unload(&map);
        }
        self.scheduler.shutdown();
        info!("🗑️ Unloaded {} maps", count);
    }

    /// Takes every notice recorded by live and destroyed maps.
    pub fn drain_notices(&self) -> Vec<MapNotice> {
        let mut notices = std::mem::take(&mut *self.notices.lock());
        for map in self.snapshot() {
            notices.extend(map.write().drain_notices());
        }
        notices
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            passes: self.passes.load(Ordering::Relaxed),
            last_pass_ms: self.last_pass.lock().as_secs_f64() * 1000.0,
            simulated_time_ms: self.clock_ms(),
            bindings: self.context.bindings.statistics(),
            ..RegistryStats::default()
        };
        for map in self.snapshot() {
            let map = map.read();
            stats.live_maps += 1;
            stats.loaded_grids += map.loaded_grid_count();
            if map.kind().is_instanceable() {
                stats.instances += 1;
                stats.players_in_instances += map.player_count();
            }
        }
        stats
    }
}
