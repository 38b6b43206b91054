//! Static map templates: what kind of map a template id denotes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    /// One shared map for everyone (instance id 0).
    Continent,
    Dungeon,
    Raid,
    Battleground,
}

impl MapKind {
    pub fn is_instanceable(self) -> bool {
        self != MapKind::Continent
    }

    /// Dungeons and raids: instances with bindings and saved progress.
    pub fn is_dungeon(self) -> bool {
        matches!(self, MapKind::Dungeon | MapKind::Raid)
    }

    pub fn is_raid(self) -> bool {
        self == MapKind::Raid
    }
}

/// Description of one map template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapTemplate {
    pub id: u32,
    pub name: String,
    pub kind: MapKind,
    /// Encounter slots tracked per instance.
    #[serde(default)]
    pub encounters: usize,
    /// Dungeons: lifetime of an empty instance's saved state. Raids: the
    /// global reset period. 0 disables resets.
    #[serde(default)]
    pub reset_delay_ms: u64,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_players: u32,
}

impl MapTemplate {
    pub fn new(id: u32, name: impl Into<String>, kind: MapKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            encounters: 0,
            reset_delay_ms: 0,
            max_players: 0,
        }
    }

    pub fn with_encounters(mut self, encounters: usize) -> Self {
        self.encounters = encounters;
        self
    }

    pub fn with_reset_delay(mut self, reset_delay_ms: u64) -> Self {
        self.reset_delay_ms = reset_delay_ms;
        self
    }

    pub fn with_max_players(mut self, max_players: u32) -> Self {
        self.max_players = max_players;
        self
    }
}

/// Lookup table of all known templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: BTreeMap<u32, Arc<MapTemplate>>,
}

impl TemplateStore {
    pub fn new(templates: impl IntoIterator<Item = MapTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|template| (template.id, Arc::new(template)))
                .collect(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&Arc<MapTemplate>> {
        self.templates.get(&id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MapTemplate>> + '_ {
        self.templates.values()
    }

    /// Raid templates with a global reset period.
    pub fn raids_with_reset(&self) -> impl Iterator<Item = &Arc<MapTemplate>> + '_ {
        self.iter().filter(|t| t.kind.is_raid() && t.reset_delay_ms > 0)
    }
}
