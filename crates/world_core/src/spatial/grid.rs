//! Uniform 2D grid routing objects and queries to per-cell volume indices.

use super::cell::{Cell, CELL_COUNT, CELL_SIZE};
use super::model::VolumeModel;
use super::volume::{DynamicVolumeIndex, DEFAULT_REBALANCE_PERIOD_MS};
use crate::types::{ObjectHandle, Ray, Vec3};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Upper bound on cells a single ray can cross, used as a loop guard.
const MAX_WALK: usize = (CELL_COUNT as usize) * 2 + 2;

/// Buckets objects by the cell containing their position.
///
/// Each cell owns a [`DynamicVolumeIndex`], created on first insert. A
/// reverse table records the owning cell of every member so removal does
/// not need the object's (possibly changed) position.
pub struct SpatialGridIndex<T: VolumeModel> {
    cells: Vec<Option<Box<DynamicVolumeIndex<T>>>>,
    members: HashMap<ObjectHandle, Cell>,
    rebalance_period: u32,
}

impl<T: VolumeModel> Default for SpatialGridIndex<T> {
    fn default() -> Self {
        Self::new(DEFAULT_REBALANCE_PERIOD_MS)
    }
}

impl<T: VolumeModel> SpatialGridIndex<T> {
    pub fn new(rebalance_period_ms: u32) -> Self {
        let slots = (CELL_COUNT * CELL_COUNT) as usize;
        Self {
            cells: (0..slots).map(|_| None).collect(),
            members: HashMap::new(),
            rebalance_period: rebalance_period_ms,
        }
    }

    /// Inserts `object` into the cell containing its position.
    ///
    /// # Panics
    ///
    /// If the object is already a member, or its position lies outside the
    /// grid. Both indicate a bookkeeping bug in the caller.
    pub fn insert(&mut self, object: Arc<T>) {
        let handle = object.handle();
        let position = object.position();
        let cell = Cell::compute(position.x, position.y);

        if let Some(owner) = self.members.get(&handle) {
            error!("❌ {} inserted twice (already in cell {})", handle, owner);
            panic!("object {handle} is already in the spatial grid");
        }
        if !cell.is_valid() {
            error!("❌ {} at ({}, {}) lies outside the grid", handle, position.x, position.y);
            panic!("object {handle} lies outside the spatial grid");
        }

        let period = self.rebalance_period;
        self.cells[cell.index()]
            .get_or_insert_with(|| Box::new(DynamicVolumeIndex::new(period)))
            .insert(object);
        self.members.insert(handle, cell);
    }

    /// Removes the object with `handle` and returns it.
    ///
    /// # Panics
    ///
    /// If the object was never inserted.
    pub fn remove(&mut self, handle: ObjectHandle) -> Arc<T> {
        let Some(cell) = self.members.remove(&handle) else {
            error!("❌ {} removed from the spatial grid without being inserted", handle);
            panic!("object {handle} is not in the spatial grid");
        };

        match self.cells[cell.index()].as_mut().and_then(|index| index.remove(handle)) {
            Some(object) => object,
            None => {
                error!("❌ {} missing from its owning cell {}", handle, cell);
                panic!("object {handle} missing from cell {cell}");
            }
        }
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.members.contains_key(&handle)
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Cell owning `handle`, if it is a member.
    pub fn cell_of(&self, handle: ObjectHandle) -> Option<Cell> {
        self.members.get(&handle).copied()
    }

    /// Volume index of the cell containing `(x, y)`, if that cell has ever
    /// held an object.
    pub fn volume_at(&self, x: f32, y: f32) -> Option<&DynamicVolumeIndex<T>> {
        self.volume(Cell::compute(x, y))
    }

    fn volume(&self, cell: Cell) -> Option<&DynamicVolumeIndex<T>> {
        if !cell.is_valid() {
            return None;
        }
        self.cells[cell.index()].as_deref()
    }

    /// Rebalances every cell with outstanding mutations. Returns how many
    /// cells were rebuilt.
    pub fn balance(&mut self) -> usize {
        self.cells
            .iter_mut()
            .flatten()
            .map(|index| index.rebalance())
            .filter(|rebuilt| *rebuilt)
            .count()
    }

    /// Advances every cell's rebalance timer.
    pub fn update(&mut self, elapsed_ms: u32) {
        for index in self.cells.iter_mut().flatten() {
            index.update(elapsed_ms);
        }
    }

    /// Visits the cells crossed by `ray` over `[0, max_dist]` in order of
    /// increasing distance from the origin, using a 2D DDA walk.
    ///
    /// Stops after the cell containing the segment end, or as soon as the
    /// walk leaves the grid. Nothing is visited when the origin is outside
    /// the grid.
    pub fn walk_cells<F>(ray: &Ray, max_dist: f32, mut visit: F)
    where
        F: FnMut(Cell),
    {
        let mut cell = Cell::compute(ray.origin.x, ray.origin.y);
        if !cell.is_valid() {
            return;
        }

        let end = ray.point_at(max_dist);
        let last = Cell::compute(end.x, end.y);
        if cell == last {
            visit(cell);
            return;
        }

        let (step_x, mut t_max_x, t_delta_x) = Self::axis_setup(
            ray.direction.x,
            ray.inv_direction.x,
            ray.origin.x,
            cell.low_border_x(),
        );
        let (step_y, mut t_max_y, t_delta_y) = Self::axis_setup(
            ray.direction.y,
            ray.inv_direction.y,
            ray.origin.y,
            cell.low_border_y(),
        );

        for _ in 0..MAX_WALK {
            visit(cell);
            if cell == last {
                break;
            }

            let entry = if t_max_x < t_max_y {
                let entry = t_max_x;
                t_max_x += t_delta_x;
                cell.x += step_x;
                entry
            } else {
                let entry = t_max_y;
                t_max_y += t_delta_y;
                cell.y += step_y;
                entry
            };

            if !cell.is_valid() || entry > max_dist {
                break;
            }
        }
    }

    /// Step direction, distance to the first border and distance between
    /// borders along one axis. A zero direction never crosses a border.
    fn axis_setup(dir: f32, inv_dir: f32, origin: f32, low_border: f32) -> (i32, f32, f32) {
        if dir == 0.0 {
            return (0, f32::INFINITY, f32::INFINITY);
        }
        if dir > 0.0 {
            let border = low_border + CELL_SIZE;
            (1, (border - origin) * inv_dir, CELL_SIZE * inv_dir)
        } else {
            (-1, (low_border - origin) * inv_dir, -CELL_SIZE * inv_dir)
        }
    }

    /// Nearest-hit ray query across cells. `max_dist` shrinks as the callback
    /// accepts closer hits. Returns true when any hit was accepted.
    pub fn intersect_ray<F>(&self, ray: &Ray, max_dist: &mut f32, mut callback: F) -> bool
    where
        F: FnMut(&Ray, &T, &mut f32) -> bool,
    {
        let mut any_hit = false;
        let limit = *max_dist;
        Self::walk_cells(ray, limit, |cell| {
            if let Some(index) = self.volume(cell) {
                any_hit |= index.intersect_ray(ray, max_dist, &mut callback);
            }
        });
        any_hit
    }

    /// Point containment query against the single cell holding `point`.
    pub fn intersect_point<F>(&self, point: &Vec3, callback: F)
    where
        F: FnMut(&Vec3, &T),
    {
        if let Some(index) = self.volume(Cell::compute(point.x, point.y)) {
            index.intersect_point(point, callback);
        }
    }

    /// Ray query restricted to the origin cell. Meant for vertical rays,
    /// which never leave it.
    pub fn intersect_z_aligned_ray<F>(&self, ray: &Ray, max_dist: &mut f32, callback: F) -> bool
    where
        F: FnMut(&Ray, &T, &mut f32) -> bool,
    {
        match self.volume(Cell::compute(ray.origin.x, ray.origin.y)) {
            Some(index) => index.intersect_ray(ray, max_dist, callback),
            None => false,
        }
    }

    /// Every member object.
    pub fn objects(&self) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.cells.iter().flatten().flat_map(|index| index.objects())
    }
}
