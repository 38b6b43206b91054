//! Dungeon instances: binding players on entry, resets and encounter
//! progress.

use super::{Map, MapContext, MapVariant};
use crate::config::MIN_UNLOAD_DELAY_MS;
use crate::player::{MapNotice, PlayerContext};
use crate::reset::ResetEvent;
use crate::templates::MapTemplate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use world_core::{EncounterLog, EncounterState, MapKey, PlayerId};

/// Why an instance is being reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceResetMethod {
    /// A player asked to reset all their instances.
    All,
    /// The template's global reset came due.
    Global,
    /// A normal dungeon stayed empty past its reset delay.
    RespawnDelay,
}

/// Dungeon-only state of a [`Map`].
#[derive(Debug, Clone, Default)]
pub struct DungeonState {
    reset_after_unload: bool,
    unload_when_empty: bool,
    encounters: EncounterLog,
}

impl DungeonState {
    pub fn reset_after_unload(&self) -> bool {
        self.reset_after_unload
    }

    pub fn unload_when_empty(&self) -> bool {
        self.unload_when_empty
    }

    pub fn encounters(&self) -> &EncounterLog {
        &self.encounters
    }

    pub(super) fn clear_unload_flags(&mut self) {
        self.reset_after_unload = false;
        self.unload_when_empty = false;
    }
}

fn load_encounters(context: &MapContext, key: MapKey, slots: usize) -> EncounterLog {
    let Some(data) = context.store.load_encounters(key) else {
        return EncounterLog::new(slots);
    };
    match EncounterLog::load(&data, slots) {
        Ok(log) => {
            debug!("💾 Restored encounters of {}: '{}'", key, data);
            log
        }
        Err(e) => {
            warn!("⚠️ Saved encounters of {} are unusable ({}), starting fresh", key, e);
            EncounterLog::new(slots)
        }
    }
}

impl Map {
    /// A dungeon instance. `load_saved` restores encounter progress from the
    /// store; `reset_time_ms` is recorded on the persistent state when one
    /// has to be created.
    pub fn dungeon(
        template: Arc<MapTemplate>,
        instance_id: u32,
        context: Arc<MapContext>,
        load_saved: bool,
        reset_time_ms: u64,
    ) -> Self {
        let key = MapKey::new(template.id, instance_id);
        let encounters = if load_saved {
            load_encounters(&context, key, template.encounters)
        } else {
            EncounterLog::new(template.encounters)
        };
        context.bindings.add_state(template.id, instance_id, reset_time_ms, true);
        debug!("🏰 Creating dungeon map {} ({})", key, template.name);

        let state = DungeonState { encounters, ..DungeonState::default() };
        let mut map = Self::with_variant(key, template, context, MapVariant::Dungeon(state));
        map.set_reset_schedule(true);
        map
    }

    fn dungeon_state(&self) -> Option<&DungeonState> {
        match &self.variant {
            MapVariant::Dungeon(state) => Some(state),
            _ => None,
        }
    }

    fn dungeon_state_mut(&mut self) -> Option<&mut DungeonState> {
        match &mut self.variant {
            MapVariant::Dungeon(state) => Some(state),
            _ => None,
        }
    }

    pub fn encounters(&self) -> Option<&EncounterLog> {
        self.dungeon_state().map(DungeonState::encounters)
    }

    pub fn reset_after_unload(&self) -> bool {
        self.dungeon_state().is_some_and(DungeonState::reset_after_unload)
    }

    pub fn unload_when_empty(&self) -> bool {
        self.dungeon_state().is_some_and(DungeonState::unload_when_empty)
    }

    /// Checks and records the binds of a player entering this instance.
    pub(super) fn bind_on_enter(&mut self, player: &PlayerContext) {
        let key = self.key;
        let bindings = Arc::clone(&self.context.bindings);
        let player_bind = bindings.player_bind(player.id, key.template_id);

        if let Some(bind) = player_bind.filter(|bind| bind.permanent) {
            if bind.instance_id != key.instance_id {
                error!(
                    "❌ Player '{}' is permanently bound to instance {} of map {} but entered {}",
                    player.name, bind.instance_id, key.template_id, key
                );
                panic!(
                    "player {} is permanently bound to instance {} but entered {}",
                    player.id, bind.instance_id, key
                );
            }
            return;
        }

        let Some(group) = player.group else {
            match player_bind {
                None => bindings.bind_player(player.id, key.template_id, key.instance_id, false),
                Some(bind) if bind.instance_id != key.instance_id => {
                    error!(
                        "❌ Player '{}' is bound to instance {} of map {} but entered {}",
                        player.name, bind.instance_id, key.template_id, key
                    );
                    panic!("player {} is bound to instance {} but entered {}", player.id, bind.instance_id, key);
                }
                Some(_) => {}
            }
            return;
        };

        if let Some(bind) = player_bind {
            warn!(
                "⚠️ Player '{}' is in a group but has a solo bind to instance {} of map {}, dropping it",
                player.name, bind.instance_id, key.template_id
            );
            bindings.unbind_player(player.id, key.template_id);
        }

        match bindings.group_bind(group.id, key.template_id) {
            None => bindings.bind_group(group.id, key.template_id, key.instance_id, false),
            Some(bind) if bind.instance_id != key.instance_id => {
                error!(
                    "❌ Group of player '{}' is bound to instance {} of map {} but entered {}",
                    player.name, bind.instance_id, key.template_id, key
                );
                panic!("group {} is bound to instance {} but entered {}", group.id, bind.instance_id, key);
            }
            Some(bind) => {
                if bind.permanent {
                    self.notices.push(MapNotice::InstanceSaveCreated { player: player.id, key });
                    bindings.bind_player(player.id, key.template_id, key.instance_id, true);
                }
            }
        }
    }

    /// Adds or cancels the reset event of an empty, non-raid instance.
    pub(super) fn set_reset_schedule(&mut self, on: bool) {
        if self.has_players() || self.template.kind.is_raid() || !self.is_dungeon() {
            return;
        }
        let Some(reset_time) = self.context.bindings.reset_time(self.key.instance_id) else {
            return;
        };
        if reset_time == 0 {
            return;
        }
        self.context.resets.lock().schedule(
            on,
            reset_time,
            ResetEvent::normal_dungeon(self.key.template_id, self.key.instance_id),
        );
    }

    /// Asks the instance to reset. Returns true when it was empty, in which
    /// case it unloads and discards its save at the next sweep.
    pub fn reset(&mut self, method: InstanceResetMethod) -> bool {
        let key = self.key;
        if self.has_players() {
            if method == InstanceResetMethod::All {
                for player in self.player_ids() {
                    self.notices.push(MapNotice::ResetFailed { player, template_id: key.template_id });
                }
            } else {
                if method == InstanceResetMethod::Global {
                    for player in self.player_ids() {
                        self.notices.push(MapNotice::InstanceInvalidated { player, key });
                    }
                }
                if let Some(state) = self.dungeon_state_mut() {
                    state.unload_when_empty = true;
                    state.reset_after_unload = true;
                }
            }
        } else {
            self.unload_timer.arm(MIN_UNLOAD_DELAY_MS);
            if let Some(state) = self.dungeon_state_mut() {
                state.reset_after_unload = true;
            }
        }
        info!("♻️ Reset of {} requested ({:?}), occupied: {}", key, method, self.has_players());
        self.players.is_empty()
    }

    /// Permanently binds every occupant, and the group of `leader` if the
    /// leader is inside.
    pub fn perm_bind_all_players(&mut self, leader: PlayerId) {
        let key = self.key;
        let bindings = Arc::clone(&self.context.bindings);
        let group = self.players.get(&leader).and_then(|occupant| occupant.context.group);

        for player in self.player_ids() {
            let bound = bindings.player_bind(player, key.template_id);
            if bound.is_some_and(|bind| bind.permanent) {
                continue;
            }
            bindings.bind_player(player, key.template_id, key.instance_id, true);
            self.notices.push(MapNotice::InstanceSaveCreated { player, key });
        }

        if let Some(group) = group.filter(|group| group.leader == leader) {
            bindings.bind_group(group.id, key.template_id, key.instance_id, true);
        }
    }

    /// Tells every occupant how long until the template resets.
    pub fn send_reset_warnings(&mut self, time_left_ms: u64) {
        let template_id = self.key.template_id;
        for player in self.player_ids() {
            self.notices.push(MapNotice::ResetWarning { player, template_id, time_left_ms });
        }
    }

    /// Records encounter progress. Completing an encounter saves the log.
    pub fn set_encounter(&mut self, slot: usize, state: EncounterState) -> bool {
        let key = self.key;
        let store = Arc::clone(&self.context.store);
        let Some(dungeon) = self.dungeon_state_mut() else {
            return false;
        };
        if slot >= dungeon.encounters.len() {
            warn!("⚠️ Encounter slot {} out of range for {}", slot, key);
            return false;
        }
        if dungeon.encounters.set(slot, state) {
            store.save_encounters(key, &dungeon.encounters.serialize());
        }
        true
    }

    /// Deletes the saved data and persistent state of this instance.
    pub(super) fn discard_saved_state(&mut self) {
        let instance_id = self.key.instance_id;
        self.context.store.delete_instance(instance_id);
        self.context.bindings.remove_state(instance_id);
        debug!("🗑️ Discarded saved state of {}", self.key);
    }
}
