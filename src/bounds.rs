//! Bounding spheres for meshes and whole models

use crate::error::{ModelError, ModelResult};
use glam::Vec3;

/// A sphere that encloses a set of points
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Ritter's approximate bounding sphere. Empty input yields the empty sphere.
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some(&first) = points.first() else {
            return Self::default();
        };

        // Extremal points along each axis.
        let (mut min_x, mut max_x) = (first, first);
        let (mut min_y, mut max_y) = (first, first);
        let (mut min_z, mut max_z) = (first, first);
        for &p in points {
            if p.x < min_x.x {
                min_x = p;
            }
            if p.x > max_x.x {
                max_x = p;
            }
            if p.y < min_y.y {
                min_y = p;
            }
            if p.y > max_y.y {
                max_y = p;
            }
            if p.z < min_z.z {
                min_z = p;
            }
            if p.z > max_z.z {
                max_z = p;
            }
        }

        let mut a = min_x;
        let mut b = max_x;
        if min_y.distance_squared(max_y) > a.distance_squared(b) {
            a = min_y;
            b = max_y;
        }
        if min_z.distance_squared(max_z) > a.distance_squared(b) {
            a = min_z;
            b = max_z;
        }

        let mut center = (a + b) * 0.5;
        let mut radius = a.distance(b) * 0.5;

        for &p in points {
            let dist = p.distance(center);
            if dist > radius {
                let grown = (radius + dist) * 0.5;
                center += (p - center) * ((grown - radius) / dist);
                radius = grown;
            }
        }

        Self { center, radius }
    }

    /// Sphere over `count` positions read every `stride` bytes, starting `offset` bytes into `bytes`.
    pub fn from_strided(bytes: &[u8], offset: usize, stride: usize, count: usize) -> ModelResult<Self> {
        const POSITION_SIZE: usize = std::mem::size_of::<[f32; 3]>();

        let mut points = Vec::with_capacity(count);
        for i in 0..count {
            let start = i
                .checked_mul(stride)
                .and_then(|o| o.checked_add(offset))
                .filter(|start| {
                    start
                        .checked_add(POSITION_SIZE)
                        .is_some_and(|end| end <= bytes.len())
                })
                .ok_or_else(|| {
                    ModelError::corrupt(format!(
                        "position {i} at stride {stride} lies outside its {} byte vertex stream",
                        bytes.len()
                    ))
                })?;
            let xyz: [f32; 3] = bytemuck::pod_read_unaligned(&bytes[start..start + POSITION_SIZE]);
            points.push(Vec3::from(xyz));
        }

        Ok(Self::from_points(&points))
    }

    /// Smallest sphere enclosing both spheres.
    pub fn merge(&self, other: &BoundingSphere) -> BoundingSphere {
        let offset = other.center - self.center;
        let dist = offset.length();

        if self.radius + dist <= other.radius {
            return *other;
        }
        if other.radius + dist <= self.radius {
            return *self;
        }

        let dir = offset / dist;
        let t1 = (-self.radius).min(dist - other.radius);
        let t2 = self.radius.max(dist + other.radius);
        let radius = (t2 - t1) * 0.5;

        BoundingSphere {
            center: self.center + dir * (radius + t1),
            radius,
        }
    }

    pub fn contains_point(&self, point: Vec3, epsilon: f32) -> bool {
        point.distance(self.center) <= self.radius + epsilon
    }

    pub fn contains_sphere(&self, other: &BoundingSphere, epsilon: f32) -> bool {
        other.center.distance(self.center) + other.radius <= self.radius + epsilon
    }
}
