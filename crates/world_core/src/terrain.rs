//! Terrain data as seen by the map: an opaque per-cell resource.
//!
//! Loading height maps from disk is out of scope here. Maps only need a
//! [`TerrainProvider`] that either hands back a tile or reports the cell as
//! unavailable.

use crate::error::TerrainError;
use crate::grid::GridCoord;
use std::collections::HashMap;
use std::sync::Arc;

/// Resident terrain for one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainTile {
    coord: GridCoord,
    base_height: f32,
}

impl TerrainTile {
    pub fn flat(coord: GridCoord, base_height: f32) -> Self {
        Self { coord, base_height }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    /// Ground height at `(x, y)`. Tiles are flat for now.
    pub fn height_at(&self, _x: f32, _y: f32) -> f32 {
        self.base_height
    }
}

/// Source of terrain tiles, shared by every map.
pub trait TerrainProvider: Send + Sync {
    fn load(&self, template_id: u32, coord: GridCoord) -> Result<Arc<TerrainTile>, TerrainError>;
}

/// Every cell of every map is flat ground at one height.
#[derive(Debug, Clone, Default)]
pub struct FlatTerrain {
    height: f32,
}

impl FlatTerrain {
    pub fn new(height: f32) -> Self {
        Self { height }
    }
}

impl TerrainProvider for FlatTerrain {
    fn load(&self, _template_id: u32, coord: GridCoord) -> Result<Arc<TerrainTile>, TerrainError> {
        Ok(Arc::new(TerrainTile::flat(coord, self.height)))
    }
}

/// A fixed table of tiles. Cells not in the table fall back to the default
/// height, or are unavailable when no default is set.
#[derive(Debug, Clone, Default)]
pub struct TerrainTable {
    tiles: HashMap<(u32, GridCoord), f32>,
    default_height: Option<f32>,
}

impl TerrainTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile(mut self, template_id: u32, coord: GridCoord, height: f32) -> Self {
        self.tiles.insert((template_id, coord), height);
        self
    }

    pub fn with_default_height(mut self, height: f32) -> Self {
        self.default_height = Some(height);
        self
    }
}

impl TerrainProvider for TerrainTable {
    fn load(&self, template_id: u32, coord: GridCoord) -> Result<Arc<TerrainTile>, TerrainError> {
        self.tiles
            .get(&(template_id, coord))
            .copied()
            .or(self.default_height)
            .map(|height| Arc::new(TerrainTile::flat(coord, height)))
            .ok_or_else(|| TerrainError::ResourceUnavailable {
                template_id,
                coord,
                reason: "no tile data".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_falls_back_to_default() {
        let coord = GridCoord::new(10, 10);
        let table = TerrainTable::new().with_tile(1, coord, 42.0);
        assert_eq!(table.load(1, coord).map(|t| t.height_at(0.0, 0.0)), Ok(42.0));
        assert!(matches!(
            table.load(1, GridCoord::new(11, 10)),
            Err(TerrainError::ResourceUnavailable { template_id: 1, .. })
        ));

        let table = table.with_default_height(-5.0);
        assert_eq!(table.load(2, GridCoord::new(0, 0)).map(|t| t.height_at(1.0, 1.0)), Ok(-5.0));
    }
}
