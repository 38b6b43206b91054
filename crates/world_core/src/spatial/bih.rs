//! Bounding interval hierarchy over a static set of boxes.
//!
//! Each interior node splits its primitives along one axis and stores two
//! clip planes: the maximum extent of the left child and the minimum extent
//! of the right child. The children may overlap, which keeps construction
//! cheap (no primitive is ever duplicated) at the cost of visiting both
//! sides in the overlap region.

use crate::types::{Aabb, Ray, Vec3};
use std::cmp::Ordering;

/// Primitives per leaf before a split is attempted.
pub const LEAF_SIZE: usize = 3;

/// Hard recursion cap. Degenerate inputs fall back to a larger leaf.
const MAX_DEPTH: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BihNode {
    Leaf {
        start: u32,
        count: u32,
    },
    Interior {
        axis: u8,
        left_max: f32,
        right_min: f32,
        left: u32,
        right: u32,
    },
}

#[derive(Debug, Clone)]
pub struct BoundingIntervalHierarchy {
    nodes: Vec<BihNode>,
    /// Primitive indices, grouped so every leaf is a contiguous run.
    primitives: Vec<u32>,
    bounds: Aabb,
}

impl Default for BoundingIntervalHierarchy {
    fn default() -> Self {
        Self {
            nodes: vec![BihNode::Leaf { start: 0, count: 0 }],
            primitives: Vec::new(),
            bounds: Aabb::empty(),
        }
    }
}

struct BuildInput<'a> {
    bounds: &'a [Aabb],
    centers: Vec<Vec3>,
}

impl BoundingIntervalHierarchy {
    /// Builds a hierarchy over `bounds`. Primitive `i` is reported to query
    /// callbacks as index `i`.
    pub fn build(bounds: &[Aabb]) -> Self {
        if bounds.is_empty() {
            return Self::default();
        }

        let mut total = Aabb::empty();
        for b in bounds {
            total.merge(b);
        }

        let input = BuildInput { bounds, centers: bounds.iter().map(Aabb::center).collect() };
        let mut tree = Self {
            nodes: Vec::with_capacity(bounds.len() * 2 / LEAF_SIZE + 1),
            primitives: (0..bounds.len() as u32).collect(),
            bounds: total,
        };
        let end = tree.primitives.len();
        tree.build_range(&input, 0, end, 0);
        tree
    }

    fn build_range(&mut self, input: &BuildInput<'_>, start: usize, end: usize, depth: usize) -> u32 {
        let node_index = self.nodes.len() as u32;
        let count = end - start;
        let leaf = BihNode::Leaf { start: start as u32, count: count as u32 };

        if count <= LEAF_SIZE || depth >= MAX_DEPTH {
            self.nodes.push(leaf);
            return node_index;
        }

        let mut centroid_bounds = Aabb::empty();
        for &prim in &self.primitives[start..end] {
            centroid_bounds.merge_point(&input.centers[prim as usize]);
        }
        let extent = centroid_bounds.extent();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };

        if !(extent.axis(axis) > 0.0) {
            // All centroids coincide: nothing to split on.
            self.nodes.push(leaf);
            return node_index;
        }

        let split = centroid_bounds.center().axis(axis);
        let mut mid = start;
        for k in start..end {
            if input.centers[self.primitives[k] as usize].axis(axis) < split {
                self.primitives.swap(k, mid);
                mid += 1;
            }
        }

        if mid == start || mid == end {
            let centers = &input.centers;
            self.primitives[start..end].sort_by(|a, b| {
                centers[*a as usize]
                    .axis(axis)
                    .partial_cmp(&centers[*b as usize].axis(axis))
                    .unwrap_or(Ordering::Equal)
            });
            mid = start + count / 2;
        }

        let mut left_max = f32::NEG_INFINITY;
        for &prim in &self.primitives[start..mid] {
            left_max = left_max.max(input.bounds[prim as usize].hi.axis(axis));
        }
        let mut right_min = f32::INFINITY;
        for &prim in &self.primitives[mid..end] {
            right_min = right_min.min(input.bounds[prim as usize].lo.axis(axis));
        }

        // Reserve the slot so children get higher indices.
        self.nodes.push(leaf);
        let left = self.build_range(input, start, mid, depth + 1);
        let right = self.build_range(input, mid, end, depth + 1);
        self.nodes[node_index as usize] = BihNode::Interior {
            axis: axis as u8,
            left_max,
            right_min,
            left,
            right,
        };
        node_index
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Walks the hierarchy front to back along `ray`.
    ///
    /// `hit` receives each candidate primitive together with the running
    /// maximum distance and may shrink it; subtrees starting beyond the
    /// current distance are skipped.
    pub fn intersect_ray<F>(&self, ray: &Ray, max_dist: &mut f32, mut hit: F)
    where
        F: FnMut(u32, &mut f32),
    {
        if self.primitives.is_empty() {
            return;
        }
        let Some((t_enter, t_exit)) = self.bounds.ray_interval(ray, *max_dist) else {
            return;
        };

        let mut stack: Vec<(u32, f32, f32)> = Vec::with_capacity(MAX_DEPTH);
        stack.push((0, t_enter, t_exit));

        while let Some((node, t_min, t_max)) = stack.pop() {
            if t_min > *max_dist {
                continue;
            }
            let t_max = t_max.min(*max_dist);

            match self.nodes[node as usize] {
                BihNode::Leaf { start, count } => {
                    for &prim in &self.primitives[start as usize..(start + count) as usize] {
                        hit(prim, max_dist);
                    }
                }
                BihNode::Interior { axis, left_max, right_min, left, right } => {
                    let axis = axis as usize;
                    let origin = ray.origin.axis(axis);
                    let dir = ray.direction.axis(axis);

                    if dir == 0.0 {
                        if origin >= right_min {
                            stack.push((right, t_min, t_max));
                        }
                        if origin <= left_max {
                            stack.push((left, t_min, t_max));
                        }
                        continue;
                    }

                    let inv = ray.inv_direction.axis(axis);
                    let t_left = (left_max - origin) * inv;
                    let t_right = (right_min - origin) * inv;
                    let (near, near_exit, far, far_enter) = if dir > 0.0 {
                        (left, t_left, right, t_right)
                    } else {
                        (right, t_right, left, t_left)
                    };

                    let far_min = t_min.max(far_enter);
                    if far_min <= t_max {
                        stack.push((far, far_min, t_max));
                    }
                    let near_max = t_max.min(near_exit);
                    if t_min <= near_max {
                        stack.push((near, t_min, near_max));
                    }
                }
            }
        }
    }

    /// Reports every primitive whose node intervals contain `point`.
    pub fn intersect_point<F>(&self, point: &Vec3, mut visit: F)
    where
        F: FnMut(u32),
    {
        if self.primitives.is_empty() || !self.bounds.contains(point) {
            return;
        }

        let mut stack: Vec<u32> = Vec::with_capacity(MAX_DEPTH);
        stack.push(0);
        while let Some(node) = stack.pop() {
            match self.nodes[node as usize] {
                BihNode::Leaf { start, count } => {
                    for &prim in &self.primitives[start as usize..(start + count) as usize] {
                        visit(prim);
                    }
                }
                BihNode::Interior { axis, left_max, right_min, left, right } => {
                    let p = point.axis(axis as usize);
                    if p <= left_max {
                        stack.push(left);
                    }
                    if p >= right_min {
                        stack.push(right);
                    }
                }
            }
        }
    }
}
