//! Ray type and operations

use crate::core::types::Vec3;
use super::aabb::Aabb;

/// A ray defined by origin and direction
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Precomputed 1/direction for fast AABB intersection
    pub inv_direction: Vec3,
}

impl Ray {
    /// Create a new ray (direction should be normalized)
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            inv_direction: Vec3::new(
                1.0 / direction.x,
                1.0 / direction.y,
                1.0 / direction.z,
            ),
        }
    }

    /// Get point along ray at parameter t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Ray-AABB intersection using slab method
    /// Returns Some((t_near, t_far)) if intersection, None otherwise
    pub fn intersects_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let t1 = (aabb.min - self.origin) * self.inv_direction;
        let t2 = (aabb.max - self.origin) * self.inv_direction;

        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        let t_near = t_min.x.max(t_min.y).max(t_min.z);
        let t_far = t_max.x.min(t_max.y).min(t_max.z);

        if t_near <= t_far && t_far >= 0.0 {
            Some((t_near.max(0.0), t_far))
        } else {
            None
        }
    }

    /// Ray-sphere intersection.
    ///
    /// Returns both roots `(t_near, t_far)` when the line through the ray
    /// touches the sphere; either may be negative (behind the origin).
    pub fn intersect_sphere(&self, center: Vec3, radius: f32) -> Option<(f32, f32)> {
        let oc = self.origin - center;
        let b = oc.dot(self.direction);
        let c = oc.dot(oc) - radius * radius;
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let sqrt_disc = disc.sqrt();
        Some((-b - sqrt_disc, -b + sqrt_disc))
    }

    /// Forward segment `[t_enter, t_exit]` of the ray inside a sphere.
    pub fn sphere_segment(&self, center: Vec3, radius: f32) -> Option<(f32, f32)> {
        let (near, far) = self.intersect_sphere(center, radius)?;
        if far < 0.0 {
            return None;
        }
        Some((near.max(0.0), far))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(ray.at(5.0), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_intersects_aabb_hit() {
        let ray = Ray::new(Vec3::new(-2.0, 0.5, 0.5), Vec3::X);
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let (t_near, t_far) = ray.intersects_aabb(&aabb).unwrap();
        assert!((t_near - 2.0).abs() < 0.001);
        assert!((t_far - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_intersects_aabb_miss() {
        let ray = Ray::new(Vec3::new(-2.0, 5.0, 0.5), Vec3::X);
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(ray.intersects_aabb(&aabb).is_none());
    }

    #[test]
    fn test_intersects_aabb_inside() {
        let ray = Ray::new(Vec3::splat(0.5), Vec3::X);
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let (t_near, _) = ray.intersects_aabb(&aabb).unwrap();
        assert_eq!(t_near, 0.0); // Inside, so t_near clamped to 0
    }

    #[test]
    fn test_sphere_hit_from_outside() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let (near, far) = ray.intersect_sphere(Vec3::ZERO, 1.0).unwrap();
        assert!((near - 4.0).abs() < 1e-5);
        assert!((far - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_sphere_segment_from_inside() {
        let ray = Ray::new(Vec3::ZERO, Vec3::Y);
        let (enter, exit) = ray.sphere_segment(Vec3::ZERO, 2.0).unwrap();
        assert_eq!(enter, 0.0);
        assert!((exit - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_sphere_behind_is_none() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z);
        assert!(ray.sphere_segment(Vec3::ZERO, 1.0).is_none());
        assert!(ray.intersect_sphere(Vec3::new(0.0, 10.0, 0.0), 1.0).is_none());
    }
}
