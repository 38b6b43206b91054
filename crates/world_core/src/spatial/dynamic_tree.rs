//! Collision queries against the dynamic obstacles of one map.

use super::grid::SpatialGridIndex;
use super::model::{ObstacleModel, VolumeModel};
use crate::types::{ObjectHandle, Ray, Vec3};
use std::sync::Arc;

const FUZZY_EPSILON: f32 = 1e-5;

/// Hit test used by every query below: the nearest enabled obstacle wins.
fn obstacle_hit(ray: &Ray, model: &ObstacleModel, max_dist: &mut f32) -> bool {
    model.intersect_ray(ray, max_dist)
}

/// The grid of movable obstacles (doors, lifts, destructible walls) of one
/// map, with line-of-sight and height helpers on top.
pub struct DynamicMapTree {
    grid: SpatialGridIndex<ObstacleModel>,
}

impl Default for DynamicMapTree {
    fn default() -> Self {
        Self { grid: SpatialGridIndex::default() }
    }
}

impl DynamicMapTree {
    pub fn new(rebalance_period_ms: u32) -> Self {
        Self { grid: SpatialGridIndex::new(rebalance_period_ms) }
    }

    pub fn insert(&mut self, model: Arc<ObstacleModel>) {
        self.grid.insert(model);
    }

    pub fn remove(&mut self, handle: ObjectHandle) -> Arc<ObstacleModel> {
        self.grid.remove(handle)
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.grid.contains(handle)
    }

    pub fn size(&self) -> usize {
        self.grid.size()
    }

    pub fn balance(&mut self) -> usize {
        self.grid.balance()
    }

    pub fn update(&mut self, elapsed_ms: u32) {
        self.grid.update(elapsed_ms);
    }

    pub fn grid(&self) -> &SpatialGridIndex<ObstacleModel> {
        &self.grid
    }

    /// Handles of every obstacle in the tree.
    pub fn handles(&self) -> Vec<ObjectHandle> {
        self.grid.objects().map(|model| model.handle()).collect()
    }

    /// Nearest hit along `ray` up to `max_dist`. On a hit `max_dist` becomes
    /// the hit distance.
    pub fn get_intersection_time(&self, ray: &Ray, max_dist: &mut f32) -> bool {
        let mut distance = *max_dist;
        let hit = self.grid.intersect_ray(ray, &mut distance, obstacle_hit);
        if hit {
            *max_dist = distance;
        }
        hit
    }

    /// First obstacle hit between `from` and `to`.
    ///
    /// On a hit the position is moved along the segment by `modify_dist`
    /// (negative pulls back towards `from`, never past it). Without a hit,
    /// or for a zero-length segment, `to` is returned.
    pub fn get_object_hit_pos(&self, from: Vec3, to: Vec3, modify_dist: f32) -> (bool, Vec3) {
        let Some((ray, length)) = Ray::between(from, to) else {
            return (false, to);
        };

        let mut distance = length;
        if !self.get_intersection_time(&ray, &mut distance) {
            return (false, to);
        }

        let hit = ray.point_at(distance);
        let adjusted = if modify_dist < 0.0 {
            if hit.distance(&from) > -modify_dist {
                hit + ray.direction * modify_dist
            } else {
                from
            }
        } else {
            hit + ray.direction * modify_dist
        };
        (true, adjusted)
    }

    pub fn is_in_line_of_sight(&self, from: Vec3, to: Vec3) -> bool {
        let length = from.distance(&to);
        if !(length > FUZZY_EPSILON) {
            return true;
        }
        let Some((ray, mut distance)) = Ray::between(from, to) else {
            return true;
        };
        !self.grid.intersect_ray(&ray, &mut distance, obstacle_hit)
    }

    /// Height of the first obstacle surface below `(x, y, z)` within
    /// `max_search_dist`, if any.
    pub fn get_height(&self, x: f32, y: f32, z: f32, max_search_dist: f32) -> Option<f32> {
        let ray = Ray::new(Vec3::new(x, y, z), Vec3::new(0.0, 0.0, -1.0));
        let mut distance = max_search_dist;
        if self.grid.intersect_z_aligned_ray(&ray, &mut distance, obstacle_hit) {
            Some(z - distance)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall(x: f32) -> Arc<ObstacleModel> {
        Arc::new(ObstacleModel::boxed("wall", Vec3::new(x, 0.0, 0.0), Vec3::new(1.0, 20.0, 10.0)))
    }

    #[test]
    fn test_line_of_sight_blocked_then_opened() {
        let mut tree = DynamicMapTree::default();
        let door = wall(50.0);
        tree.insert(door.clone());

        let a = Vec3::new(0.0, 0.0, 2.0);
        let b = Vec3::new(100.0, 0.0, 2.0);
        assert!(!tree.is_in_line_of_sight(a, b));

        door.set_collision_enabled(false);
        assert!(tree.is_in_line_of_sight(a, b));
        assert!(tree.is_in_line_of_sight(a, a));
    }

    #[test]
    fn test_object_hit_pos_adjusts_and_clamps() {
        let mut tree = DynamicMapTree::default();
        tree.insert(wall(50.0));
        let from = Vec3::new(0.0, 0.0, 2.0);
        let to = Vec3::new(100.0, 0.0, 2.0);

        let (hit, pos) = tree.get_object_hit_pos(from, to, -0.5);
        assert!(hit);
        assert!((pos.x - 48.5).abs() < 1e-3);

        let (hit, pos) = tree.get_object_hit_pos(from, to, -500.0);
        assert!(hit);
        assert_eq!(pos, from);

        let (hit, pos) = tree.get_object_hit_pos(to, to, 0.0);
        assert!(!hit);
        assert_eq!(pos, to);
    }

    #[test]
    fn test_get_height_finds_top_surface() {
        let mut tree = DynamicMapTree::default();
        // Box top at z = 10.
        tree.insert(wall(0.0));
        assert_eq!(tree.get_height(0.0, 0.0, 30.0, 50.0), Some(10.0));
        assert_eq!(tree.get_height(0.0, 0.0, 30.0, 5.0), None);
        assert_eq!(tree.get_height(3000.0, 0.0, 30.0, 50.0), None);
    }

    #[test]
    fn test_intersection_time_leaves_distance_untouched_on_miss() {
        let tree = DynamicMapTree::default();
        let ray = Ray::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        let mut dist = 42.0;
        assert!(!tree.get_intersection_time(&ray, &mut dist));
        assert_eq!(dist, 42.0);
    }
}
