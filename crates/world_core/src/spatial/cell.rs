//! Uniform cell addressing for the spatial grid.

/// Cells per side of the grid.
pub const CELL_COUNT: i32 = 64;

/// Side length of the full world extent covered by the grid.
pub const GRID_EXTENT: f32 = 533.333_33 * CELL_COUNT as f32;

/// Side length of one cell.
pub const CELL_SIZE: f32 = GRID_EXTENT / CELL_COUNT as f32;

const HALF_GRID: i32 = CELL_COUNT / 2;

/// Integer address of one grid cell.
///
/// World coordinate `0.0` sits on the border between cells 31 and 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Cell containing world-space `(fx, fy)`. Invalid for points outside
    /// the grid extent and for non-finite coordinates.
    pub fn compute(fx: f32, fy: f32) -> Self {
        if !(fx.is_finite() && fy.is_finite()) {
            return Self::new(-1, -1);
        }
        Self {
            x: (fx / CELL_SIZE).floor() as i32 + HALF_GRID,
            y: (fy / CELL_SIZE).floor() as i32 + HALF_GRID,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.x >= 0 && self.x < CELL_COUNT && self.y >= 0 && self.y < CELL_COUNT
    }

    /// Row-major slot in a `CELL_COUNT * CELL_COUNT` array. Only meaningful
    /// for valid cells.
    pub(crate) fn index(&self) -> usize {
        (self.x * CELL_COUNT + self.y) as usize
    }

    /// World-space coordinate of the low edge of column `x`.
    pub fn low_border_x(&self) -> f32 {
        (self.x - HALF_GRID) as f32 * CELL_SIZE
    }

    /// World-space coordinate of the low edge of row `y`.
    pub fn low_border_y(&self) -> f32 {
        (self.y - HALF_GRID) as f32 * CELL_SIZE
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.x, self.y)
    }
}
