//! # Core Type Definitions
//!
//! Geometry and identity types shared by the spatial index, the terrain-cell
//! state machine and the map server.
//!
//! ## Key Types
//!
//! - [`Vec3`] - single-precision world-space vector
//! - [`WorldPosition`] - a point in the world plus an orientation
//! - [`Aabb`] - axis-aligned bounding box
//! - [`Ray`] - origin/direction pair with a cached inverse direction
//! - [`ObjectHandle`] - stable identity of an object inserted into a spatial index
//! - [`PlayerId`] / [`GroupId`] - identities of viewers and their parties
//! - [`MapKey`] - (template id, instance id) pair naming one live map

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// A 3D vector in world space.
///
/// World coordinates fit comfortably in `f32`: the playable extent is
/// ±17066.66 units on each horizontal axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Component by axis index (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn axis(&self, axis: usize) -> f32 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        (*other - *self).length()
    }

    pub fn min(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn max(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f32> for Vec3 {
    type Output = Vec3;
    fn div(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

/// A position in the world with facing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub orientation: f32,
}

impl WorldPosition {
    pub const fn new(x: f32, y: f32, z: f32, orientation: f32) -> Self {
        Self { x, y, z, orientation }
    }

    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl From<Vec3> for WorldPosition {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z, 0.0)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub lo: Vec3,
    pub hi: Vec3,
}

impl Aabb {
    pub fn new(lo: Vec3, hi: Vec3) -> Self {
        Self { lo: lo.min(&hi), hi: lo.max(&hi) }
    }

    /// Box of the given half extents centred on `center`.
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    /// An inverted box that any `merge` overwrites.
    pub fn empty() -> Self {
        Self {
            lo: Vec3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            hi: Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn merge(&mut self, other: &Aabb) {
        self.lo = self.lo.min(&other.lo);
        self.hi = self.hi.max(&other.hi);
    }

    pub fn merge_point(&mut self, p: &Vec3) {
        self.lo = self.lo.min(p);
        self.hi = self.hi.max(p);
    }

    pub fn center(&self) -> Vec3 {
        (self.lo + self.hi) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.hi - self.lo
    }

    pub fn contains(&self, p: &Vec3) -> bool {
        p.x >= self.lo.x
            && p.x <= self.hi.x
            && p.y >= self.lo.y
            && p.y <= self.hi.y
            && p.z >= self.lo.z
            && p.z <= self.hi.z
    }

    /// Slab test. Returns the entry distance along `ray` when the box is hit
    /// inside `[0, max_dist]`. A ray starting inside the box reports `0.0`.
    pub fn intersect_ray(&self, ray: &Ray, max_dist: f32) -> Option<f32> {
        self.ray_interval(ray, max_dist).map(|(entry, _)| entry)
    }

    /// Parametric `[entry, exit]` interval of `ray` inside the box, clipped
    /// to `[0, max_dist]`.
    pub fn ray_interval(&self, ray: &Ray, max_dist: f32) -> Option<(f32, f32)> {
        let mut t_min = 0.0f32;
        let mut t_max = max_dist;

        for axis in 0..3 {
            let origin = ray.origin.axis(axis);
            let dir = ray.direction.axis(axis);
            let lo = self.lo.axis(axis);
            let hi = self.hi.axis(axis);

            if dir == 0.0 {
                if origin < lo || origin > hi {
                    return None;
                }
                continue;
            }

            let inv = ray.inv_direction.axis(axis);
            let mut t1 = (lo - origin) * inv;
            let mut t2 = (hi - origin) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }

        Some((t_min, t_max))
    }
}

/// A half-line used for line-of-sight and collision queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub inv_direction: Vec3,
}

impl Ray {
    /// `direction` is expected to be normalized; distances reported by
    /// queries are measured in units of its length.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            inv_direction: Vec3::new(1.0 / direction.x, 1.0 / direction.y, 1.0 / direction.z),
        }
    }

    /// Ray from `from` towards `to`, plus the segment length.
    /// Returns `None` for a degenerate (zero-length) segment.
    pub fn between(from: Vec3, to: Vec3) -> Option<(Ray, f32)> {
        let delta = to - from;
        let length = delta.length();
        if !(length > 1e-10) {
            return None;
        }
        Some((Ray::new(from, delta / length), length))
    }

    pub fn point_at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

/// Stable identity of an object inserted into a spatial index.
///
/// Handles are never derived from addresses; they are allocated from a
/// process-wide counter so that an object keeps its identity when it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle(pub u64);

static NEXT_OBJECT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl ObjectHandle {
    /// Allocates a fresh handle.
    pub fn allocate() -> Self {
        Self(NEXT_OBJECT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Unique identifier for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random player ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a player group (party or raid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one live map: the template it was built from and the
/// instance id (0 for continents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapKey {
    pub template_id: u32,
    pub instance_id: u32,
}

impl MapKey {
    pub const fn new(template_id: u32, instance_id: u32) -> Self {
        Self { template_id, instance_id }
    }

    pub const fn continent(template_id: u32) -> Self {
        Self::new(template_id, 0)
    }
}

impl std::fmt::Display for MapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.template_id, self.instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_ray_hit_reports_entry_distance() {
        let aabb = Aabb::from_center(Vec3::new(10.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0));
        let ray = Ray::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));

        let hit = aabb.intersect_ray(&ray, 100.0).unwrap();
        assert!((hit - 9.0).abs() < 1e-5);
        assert!(aabb.intersect_ray(&ray, 5.0).is_none());
    }

    #[test]
    fn test_aabb_ray_parallel_outside_slab_misses() {
        let aabb = Aabb::from_center(Vec3::new(10.0, 5.0, 0.0), Vec3::new(1.0, 1.0, 1.0));
        let ray = Ray::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        assert!(aabb.intersect_ray(&ray, 100.0).is_none());
    }

    #[test]
    fn test_ray_between_rejects_degenerate_segment() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert!(Ray::between(p, p).is_none());

        let (ray, len) = Ray::between(Vec3::ZERO, Vec3::new(0.0, 3.0, 4.0)).unwrap();
        assert!((len - 5.0).abs() < 1e-6);
        assert!((ray.direction.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_object_handles_are_unique() {
        let a = ObjectHandle::allocate();
        let b = ObjectHandle::allocate();
        assert_ne!(a, b);
    }
}
