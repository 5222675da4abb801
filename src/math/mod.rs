//! Geometric primitives used by the raymarcher

pub mod aabb;
pub mod ray;

pub use aabb::Aabb;
pub use ray::Ray;
