//! Objects that can live in the spatial index.

use crate::types::{Aabb, ObjectHandle, Ray, Vec3};
use std::sync::atomic::{AtomicBool, Ordering};

/// Anything that can be bucketed by the grid and indexed by a
/// [`DynamicVolumeIndex`](super::DynamicVolumeIndex).
///
/// Position and bounds are read when the object is inserted and again when
/// its cell rebuilds. Movers must be removed and re-inserted.
pub trait VolumeModel: Send + Sync {
    fn handle(&self) -> ObjectHandle;

    /// Point used to choose the owning grid cell.
    fn position(&self) -> Vec3;

    fn bounds(&self) -> Aabb;
}

/// A collidable world object (door, elevator, destructible wall...).
///
/// Collision can be switched off without touching the index, which is how an
/// opened door stops blocking line of sight.
#[derive(Debug)]
pub struct ObstacleModel {
    handle: ObjectHandle,
    name: String,
    position: Vec3,
    bounds: Aabb,
    collision_enabled: AtomicBool,
}

impl ObstacleModel {
    pub fn new(name: impl Into<String>, position: Vec3, bounds: Aabb) -> Self {
        Self {
            handle: ObjectHandle::allocate(),
            name: name.into(),
            position,
            bounds,
            collision_enabled: AtomicBool::new(true),
        }
    }

    /// Box-shaped obstacle centred on `position`.
    pub fn boxed(name: impl Into<String>, position: Vec3, half_extents: Vec3) -> Self {
        Self::new(name, position, Aabb::from_center(position, half_extents))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_collision_enabled(&self) -> bool {
        self.collision_enabled.load(Ordering::Acquire)
    }

    pub fn set_collision_enabled(&self, enabled: bool) {
        self.collision_enabled.store(enabled, Ordering::Release);
    }

    /// Shrinks `max_dist` to the hit distance and returns true when the ray
    /// hits this obstacle closer than `max_dist`.
    pub fn intersect_ray(&self, ray: &Ray, max_dist: &mut f32) -> bool {
        if !self.is_collision_enabled() {
            return false;
        }
        match self.bounds.intersect_ray(ray, *max_dist) {
            Some(distance) if distance < *max_dist => {
                *max_dist = distance;
                true
            }
            _ => false,
        }
    }

    pub fn contains_point(&self, point: &Vec3) -> bool {
        self.is_collision_enabled() && self.bounds.contains(point)
    }
}

impl VolumeModel for ObstacleModel {
    fn handle(&self) -> ObjectHandle {
        self.handle
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn bounds(&self) -> Aabb {
        self.bounds
    }
}
