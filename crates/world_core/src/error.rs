//! Error types for the world core.

use crate::grid::GridCoord;
use thiserror::Error;

/// Terrain data for a cell could not be produced.
///
/// Recoverable per cell: the cell stays unloaded and queries against it find
/// no terrain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TerrainError {
    #[error("Terrain for map {template_id} {coord} is unavailable: {reason}")]
    ResourceUnavailable {
        template_id: u32,
        coord: GridCoord,
        reason: String,
    },
}

/// Persisted encounter data could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncounterError {
    #[error("Encounter data is empty")]
    Empty,

    #[error("Invalid encounter value '{token}' at slot {slot}")]
    InvalidValue { slot: usize, token: String },

    #[error("Encounter data has {found} slots, expected {expected}")]
    Truncated { expected: usize, found: usize },
}
