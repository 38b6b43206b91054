//! Persistent instance states and the player/group bindings that point at
//! them.
//!
//! Tables are shared between map ticks running on worker threads and the
//! registry, so each one is a [`DashMap`]. No method holds a reference into
//! one table while writing another.

use crate::player::PlayerContext;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use world_core::{GroupId, PlayerId};

/// Saved state of one dungeon instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DungeonPersistentState {
    pub template_id: u32,
    pub instance_id: u32,
    /// Simulated time at which the instance resets. 0 means never.
    pub reset_time_ms: u64,
    pub can_reset: bool,
    pub bound_players: HashSet<PlayerId>,
    pub bound_groups: HashSet<GroupId>,
}

impl DungeonPersistentState {
    pub fn has_bounds(&self) -> bool {
        !self.bound_players.is_empty() || !self.bound_groups.is_empty()
    }
}

/// A player's or group's tie to one instance of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBind {
    pub instance_id: u32,
    /// Permanent binds survive leaving the instance and forbid entering any
    /// other instance of the template.
    pub permanent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingStats {
    pub states: usize,
    pub bound_players: usize,
    pub bound_groups: usize,
}

#[derive(Debug, Default)]
pub struct PersistentStateManager {
    states: DashMap<u32, DungeonPersistentState>,
    player_binds: DashMap<(PlayerId, u32), InstanceBind>,
    group_binds: DashMap<(GroupId, u32), InstanceBind>,
}

impl PersistentStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the state of a new instance. Returns false when one with
    /// the same id already exists, which is left untouched.
    pub fn add_state(&self, template_id: u32, instance_id: u32, reset_time_ms: u64, can_reset: bool) -> bool {
        if self.states.contains_key(&instance_id) {
            return false;
        }
        self.states.insert(
            instance_id,
            DungeonPersistentState {
                template_id,
                instance_id,
                reset_time_ms,
                can_reset,
                bound_players: HashSet::new(),
                bound_groups: HashSet::new(),
            },
        );
        debug!("💾 Persistent state created for instance {} of map {}", instance_id, template_id);
        true
    }

    pub fn state(&self, instance_id: u32) -> Option<DungeonPersistentState> {
        self.states.get(&instance_id).map(|state| state.clone())
    }

    pub fn has_state(&self, instance_id: u32) -> bool {
        self.states.contains_key(&instance_id)
    }

    pub fn reset_time(&self, instance_id: u32) -> Option<u64> {
        self.states.get(&instance_id).map(|state| state.reset_time_ms)
    }

    /// Instance ids of every saved state of `template_id`, ascending.
    pub fn instances_of(&self, template_id: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .states
            .iter()
            .filter(|entry| entry.template_id == template_id)
            .map(|entry| entry.instance_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn player_bind(&self, player: PlayerId, template_id: u32) -> Option<InstanceBind> {
        self.player_binds.get(&(player, template_id)).map(|bind| *bind)
    }

    pub fn group_bind(&self, group: GroupId, template_id: u32) -> Option<InstanceBind> {
        self.group_binds.get(&(group, template_id)).map(|bind| *bind)
    }

    /// Instance the requester should be sent to for `template_id`: a
    /// permanent player bind first, then the group's bind, then a solo bind.
    pub fn bound_instance_for(&self, requester: &PlayerContext, template_id: u32) -> Option<u32> {
        let player_bind = self.player_bind(requester.id, template_id);
        if let Some(bind) = player_bind.filter(|bind| bind.permanent) {
            return Some(bind.instance_id);
        }
        requester
            .group
            .and_then(|group| self.group_bind(group.id, template_id))
            .or(player_bind)
            .map(|bind| bind.instance_id)
    }

    pub fn bind_player(&self, player: PlayerId, template_id: u32, instance_id: u32, permanent: bool) {
        let previous = self
            .player_binds
            .insert((player, template_id), InstanceBind { instance_id, permanent });
        if let Some(old) = previous.filter(|old| old.instance_id != instance_id) {
            if let Some(mut state) = self.states.get_mut(&old.instance_id) {
                state.bound_players.remove(&player);
            }
        }
        if let Some(mut state) = self.states.get_mut(&instance_id) {
            state.bound_players.insert(player);
        }
        debug!(
            "🔗 Player {} bound to instance {} of map {} (permanent: {})",
            player, instance_id, template_id, permanent
        );
    }

    pub fn unbind_player(&self, player: PlayerId, template_id: u32) -> Option<InstanceBind> {
        let (_, bind) = self.player_binds.remove(&(player, template_id))?;
        if let Some(mut state) = self.states.get_mut(&bind.instance_id) {
            state.bound_players.remove(&player);
        }
        Some(bind)
    }

    pub fn bind_group(&self, group: GroupId, template_id: u32, instance_id: u32, permanent: bool) {
        let previous = self
            .group_binds
            .insert((group, template_id), InstanceBind { instance_id, permanent });
        if let Some(old) = previous.filter(|old| old.instance_id != instance_id) {
            if let Some(mut state) = self.states.get_mut(&old.instance_id) {
                state.bound_groups.remove(&group);
            }
        }
        if let Some(mut state) = self.states.get_mut(&instance_id) {
            state.bound_groups.insert(group);
        }
        debug!(
            "🔗 Group {} bound to instance {} of map {} (permanent: {})",
            group, instance_id, template_id, permanent
        );
    }

    pub fn unbind_group(&self, group: GroupId, template_id: u32) -> Option<InstanceBind> {
        let (_, bind) = self.group_binds.remove(&(group, template_id))?;
        if let Some(mut state) = self.states.get_mut(&bind.instance_id) {
            state.bound_groups.remove(&group);
        }
        Some(bind)
    }

    /// Drops every bind that points at `instance_id`.
    pub fn unbind_state(&self, instance_id: u32) {
        let Some((template_id, players, groups)) = self.states.get_mut(&instance_id).map(|mut state| {
            (
                state.template_id,
                std::mem::take(&mut state.bound_players),
                std::mem::take(&mut state.bound_groups),
            )
        }) else {
            return;
        };

        for player in players {
            self.player_binds
                .remove_if(&(player, template_id), |_, bind| bind.instance_id == instance_id);
        }
        for group in groups {
            self.group_binds
                .remove_if(&(group, template_id), |_, bind| bind.instance_id == instance_id);
        }
    }

    /// Unbinds and forgets the state of `instance_id`.
    pub fn remove_state(&self, instance_id: u32) -> Option<DungeonPersistentState> {
        self.unbind_state(instance_id);
        let removed = self.states.remove(&instance_id).map(|(_, state)| state);
        if let Some(state) = &removed {
            debug!("🗑️ Persistent state of instance {} (map {}) removed", instance_id, state.template_id);
        }
        removed
    }

    pub fn statistics(&self) -> BindingStats {
        BindingStats {
            states: self.states.len(),
            bound_players: self.player_binds.len(),
            bound_groups: self.group_binds.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::GroupContext;
    use world_core::WorldPosition;

    #[test]
    fn test_permanent_player_bind_wins_over_group() {
        let manager = PersistentStateManager::new();
        manager.add_state(33, 7, 0, true);
        manager.add_state(33, 8, 0, true);

        let leader = PlayerId::new();
        let group = GroupContext { id: GroupId::new(), leader };
        let player = PlayerContext::new("Aria", WorldPosition::default()).in_group(group);

        manager.bind_group(group.id, 33, 8, false);
        assert_eq!(manager.bound_instance_for(&player, 33), Some(8));

        manager.bind_player(player.id, 33, 7, false);
        assert_eq!(manager.bound_instance_for(&player, 33), Some(8));

        manager.bind_player(player.id, 33, 7, true);
        assert_eq!(manager.bound_instance_for(&player, 33), Some(7));
    }

    #[test]
    fn test_rebinding_moves_player_between_states() {
        let manager = PersistentStateManager::new();
        manager.add_state(33, 1, 0, true);
        manager.add_state(33, 2, 0, true);
        let player = PlayerId::new();

        manager.bind_player(player, 33, 1, false);
        manager.bind_player(player, 33, 2, false);
        assert!(manager.state(1).is_some_and(|s| !s.has_bounds()));
        assert!(manager.state(2).is_some_and(|s| s.bound_players.contains(&player)));
    }

    #[test]
    fn test_remove_state_unbinds_everyone() {
        let manager = PersistentStateManager::new();
        manager.add_state(33, 7, 0, true);
        let player = PlayerId::new();
        let group = GroupId::new();
        manager.bind_player(player, 33, 7, true);
        manager.bind_group(group, 33, 7, false);
        assert_eq!(manager.statistics().bound_players, 1);

        assert!(manager.remove_state(7).is_some());
        assert_eq!(manager.player_bind(player, 33), None);
        assert_eq!(manager.group_bind(group, 33), None);
        assert_eq!(manager.statistics(), BindingStats::default());
    }
}
