//! What the map subsystem needs to know about an occupant, and the side
//! effects it reports back.

use serde::{Deserialize, Serialize};
use world_core::{GroupId, MapKey, PlayerId, WorldPosition};

/// A player's group as seen at map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContext {
    pub id: GroupId,
    pub leader: PlayerId,
}

/// A player entering or requesting a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerContext {
    pub id: PlayerId,
    pub name: String,
    pub position: WorldPosition,
    pub group: Option<GroupContext>,
    /// Instance id of the battleground the player was queued into.
    pub battleground_instance: Option<u32>,
}

impl PlayerContext {
    pub fn new(name: impl Into<String>, position: WorldPosition) -> Self {
        Self {
            id: PlayerId::new(),
            name: name.into(),
            position,
            group: None,
            battleground_instance: None,
        }
    }

    pub fn in_group(mut self, group: GroupContext) -> Self {
        self.group = Some(group);
        self
    }

    pub fn in_battleground(mut self, instance_id: u32) -> Self {
        self.battleground_instance = Some(instance_id);
        self
    }

    pub fn is_group_leader(&self) -> bool {
        self.group.is_some_and(|group| group.leader == self.id)
    }
}

/// A side effect on a player that the network layer has to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapNotice {
    /// A reset was refused because the player is still inside.
    ResetFailed { player: PlayerId, template_id: u32 },
    /// The instance resets in `time_left_ms`.
    ResetWarning { player: PlayerId, template_id: u32, time_left_ms: u64 },
    /// The instance the player is in was invalidated by a global reset.
    InstanceInvalidated { player: PlayerId, key: MapKey },
    /// The player gained a new instance save.
    InstanceSaveCreated { player: PlayerId, key: MapKey },
    /// The player was removed from an unloading map and must be sent home.
    TeleportToHomebind { player: PlayerId, key: MapKey },
}

impl MapNotice {
    pub fn player(&self) -> PlayerId {
        match self {
            MapNotice::ResetFailed { player, .. }
            | MapNotice::ResetWarning { player, .. }
            | MapNotice::InstanceInvalidated { player, .. }
            | MapNotice::InstanceSaveCreated { player, .. }
            | MapNotice::TeleportToHomebind { player, .. } => *player,
        }
    }
}
