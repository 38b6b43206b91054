//! Per-cell index of movable objects with amortized rebalancing.

use super::bih::BoundingIntervalHierarchy;
use super::model::VolumeModel;
use crate::countdown::{Countdown, CountdownStatus};
use crate::types::{Aabb, ObjectHandle, Ray, Vec3};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Simulated time between rebalance checks.
pub const DEFAULT_REBALANCE_PERIOD_MS: u32 = 200;

/// A bounding interval hierarchy over the objects of one grid cell.
///
/// Insert and remove never touch the hierarchy. Removed objects leave a
/// tombstone in the indexed set and new objects wait in a pending set that
/// queries scan linearly, so query results are always exact while the tree
/// itself may be stale. [`rebalance`](Self::rebalance) folds both back into a
/// freshly built tree.
pub struct DynamicVolumeIndex<T: VolumeModel> {
    tree: BoundingIntervalHierarchy,
    /// Objects in tree primitive order. `None` marks a removed object.
    indexed: Vec<Option<Arc<T>>>,
    slots: HashMap<ObjectHandle, usize>,
    pending: HashMap<ObjectHandle, Arc<T>>,
    unbalanced_mutations: u32,
    rebalance_period: u32,
    rebalance_timer: Countdown,
    rebuilds: u64,
}

impl<T: VolumeModel> Default for DynamicVolumeIndex<T> {
    fn default() -> Self {
        Self::new(DEFAULT_REBALANCE_PERIOD_MS)
    }
}

impl<T: VolumeModel> DynamicVolumeIndex<T> {
    pub fn new(rebalance_period_ms: u32) -> Self {
        Self {
            tree: BoundingIntervalHierarchy::default(),
            indexed: Vec::new(),
            slots: HashMap::new(),
            pending: HashMap::new(),
            unbalanced_mutations: 0,
            rebalance_period: rebalance_period_ms,
            rebalance_timer: Countdown::armed(rebalance_period_ms),
            rebuilds: 0,
        }
    }

    /// Adds `object`. Returns false if its handle is already present.
    pub fn insert(&mut self, object: Arc<T>) -> bool {
        let handle = object.handle();
        if self.contains(handle) {
            return false;
        }
        self.pending.insert(handle, object);
        self.unbalanced_mutations += 1;
        true
    }

    pub fn remove(&mut self, handle: ObjectHandle) -> Option<Arc<T>> {
        let removed = match self.pending.remove(&handle) {
            Some(object) => Some(object),
            None => self
                .slots
                .remove(&handle)
                .and_then(|slot| self.indexed[slot].take()),
        };
        if removed.is_some() {
            self.unbalanced_mutations += 1;
        }
        removed
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.slots.contains_key(&handle) || self.pending.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.slots.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unbalanced_mutations(&self) -> u32 {
        self.unbalanced_mutations
    }

    /// Number of tree rebuilds performed so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Objects currently held by the index structure itself, excluding
    /// pending inserts.
    pub fn indexed_len(&self) -> usize {
        self.tree.primitive_count()
    }

    /// Rebuilds the tree from all live objects. Does nothing and returns
    /// false when no insert or remove happened since the last rebuild.
    pub fn rebalance(&mut self) -> bool {
        if self.unbalanced_mutations == 0 {
            return false;
        }

        let mut live: Vec<Arc<T>> = self.indexed.drain(..).flatten().collect();
        live.extend(self.pending.drain().map(|(_, object)| object));

        let bounds: Vec<Aabb> = live.iter().map(|object| object.bounds()).collect();
        self.tree = BoundingIntervalHierarchy::build(&bounds);
        self.slots = live
            .iter()
            .enumerate()
            .map(|(slot, object)| (object.handle(), slot))
            .collect();
        self.indexed = live.into_iter().map(Some).collect();

        trace!(
            "🌲 Rebuilt volume index: {} objects after {} mutations",
            self.indexed.len(),
            self.unbalanced_mutations
        );
        self.unbalanced_mutations = 0;
        self.rebuilds += 1;
        true
    }

    /// Advances the rebalance timer and rebuilds once the period has passed
    /// with outstanding mutations.
    pub fn update(&mut self, elapsed_ms: u32) {
        if self.is_empty() && self.unbalanced_mutations == 0 {
            return;
        }
        if self.rebalance_timer.tick(elapsed_ms) == CountdownStatus::Elapsed {
            self.rebalance_timer.arm(self.rebalance_period);
            self.rebalance();
        }
    }

    /// Nearest-hit ray query. The callback receives each candidate with the
    /// running maximum distance and returns whether it accepted a hit
    /// (shrinking the distance). Returns true when any candidate accepted.
    pub fn intersect_ray<F>(&self, ray: &Ray, max_dist: &mut f32, mut callback: F) -> bool
    where
        F: FnMut(&Ray, &T, &mut f32) -> bool,
    {
        let mut any_hit = false;

        self.tree.intersect_ray(ray, max_dist, |prim, dist| {
            if let Some(object) = &self.indexed[prim as usize] {
                any_hit |= callback(ray, object, dist);
            }
        });

        for object in self.pending.values() {
            if object.bounds().intersect_ray(ray, *max_dist).is_some() {
                any_hit |= callback(ray, object, max_dist);
            }
        }

        any_hit
    }

    /// Calls `callback` for each object whose bounds contain `point`.
    pub fn intersect_point<F>(&self, point: &Vec3, mut callback: F)
    where
        F: FnMut(&Vec3, &T),
    {
        self.tree.intersect_point(point, |prim| {
            if let Some(object) = &self.indexed[prim as usize] {
                if object.bounds().contains(point) {
                    callback(point, object);
                }
            }
        });

        for object in self.pending.values() {
            if object.bounds().contains(point) {
                callback(point, object);
            }
        }
    }

    /// Every live object, indexed or pending.
    pub fn objects(&self) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.indexed.iter().flatten().chain(self.pending.values())
    }
}
