//! Per-frame host inputs: camera, lights, depth and the destination surface.

use serde::{Deserialize, Serialize};

use crate::core::types::{Mat4, Vec2, Vec3, Vec4};
use crate::core::{Error, Result};
use crate::math::Ray;

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

/// Camera matrices as extracted by the host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraState {
    pub projection: Mat4,
    pub inverse_projection: Mat4,
    pub camera_to_world: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
}

impl CameraState {
    /// Right-handed perspective camera looking from `position` at `target`.
    pub fn look_at(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y_degrees: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let forward = (target - position).normalize_or(Vec3::NEG_Z);
        let right = forward.cross(up).normalize_or(Vec3::X);
        let up = right.cross(forward);

        let camera_to_world = Mat4::from_cols(
            right.extend(0.0),
            up.extend(0.0),
            (-forward).extend(0.0),
            position.extend(1.0),
        );
        let projection = Mat4::perspective_rh(fov_y_degrees.to_radians(), aspect, near, far);

        Self {
            projection,
            inverse_projection: projection.inverse(),
            camera_to_world,
            position,
            near,
            far,
        }
    }

    /// World-space ray through normalized device coordinates (`y` up).
    ///
    /// Also returns the ray distance per unit of linear eye depth, so a
    /// depth buffer value converts to a march limit with one multiply.
    pub fn view_ray(&self, ndc: Vec2) -> (Ray, f32) {
        let clip = Vec4::new(ndc.x, ndc.y, 1.0, 1.0);
        let view = self.inverse_projection * clip;
        let view = if view.w.abs() > f32::EPSILON { view.truncate() / view.w } else { view.truncate() };
        let dir_view = view.normalize_or(Vec3::NEG_Z);

        let direction = self.camera_to_world.transform_vector3(dir_view).normalize_or(Vec3::NEG_Z);
        let forward = (-dir_view.z).max(1e-4);

        (Ray::new(self.position, direction), 1.0 / forward)
    }

    /// Ray through the centre of pixel `(x, y)` on a `width × height` grid.
    pub fn pixel_ray(&self, x: u32, y: u32, width: u32, height: u32) -> (Ray, f32) {
        let u = (x as f32 + 0.5) / width.max(1) as f32;
        let v = (y as f32 + 0.5) / height.max(1) as f32;
        self.view_ray(Vec2::new(u * 2.0 - 1.0, 1.0 - v * 2.0))
    }

    /// Whether every matrix is usable.
    pub fn is_valid(&self) -> bool {
        self.inverse_projection.is_finite()
            && self.camera_to_world.is_finite()
            && self.position.is_finite()
            && self.inverse_projection.determinant() != 0.0
    }
}

// ---------------------------------------------------------------------------
// Lights
// ---------------------------------------------------------------------------

/// The single directional light.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    /// Direction the light travels (from the light toward the scene).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl LightState {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or(Vec3::NEG_Y),
            color,
            intensity,
        }
    }

    /// Unit vector from a point toward the light.
    #[inline]
    pub fn to_light(&self) -> Vec3 {
        -self.direction.normalize_or(Vec3::NEG_Y)
    }

    /// Color times intensity.
    #[inline]
    pub fn radiance(&self) -> Vec3 {
        (self.color * self.intensity).max(Vec3::ZERO)
    }
}

/// Cone of a spot light, as cosines of the half angles.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpotCone {
    pub direction: Vec3,
    pub inner_cos: f32,
    pub outer_cos: f32,
}

/// Point light, or spot light when `spot` is set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    pub position: Vec3,
    /// Color already multiplied by intensity.
    pub color: Vec3,
    pub range: f32,
    pub spot: Option<SpotCone>,
}

impl PointLight {
    pub fn point(position: Vec3, color: Vec3, range: f32) -> Self {
        Self {
            position,
            color,
            range,
            spot: None,
        }
    }

    /// Light arriving at `p`: `1 / (1 + d²)` falloff, zero beyond range,
    /// smoothstep across the spot cone edge.
    pub fn attenuation(&self, p: Vec3) -> f32 {
        let offset = p - self.position;
        let d2 = offset.length_squared();
        if !(d2 <= self.range * self.range) {
            return 0.0;
        }

        let mut falloff = 1.0 / (1.0 + d2);
        if let Some(spot) = self.spot {
            let axis = spot.direction.normalize_or(Vec3::NEG_Y);
            let cos = offset.normalize_or(axis).dot(axis);
            falloff *= smoothstep(spot.outer_cos, spot.inner_cos, cos);
        }
        falloff
    }
}

#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x >= edge1 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

// ---------------------------------------------------------------------------
// Depth
// ---------------------------------------------------------------------------

/// Linear eye depth of the opaque scene, one value per destination pixel.
///
/// Non-finite values mean open sky.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthBuffer {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DepthBuffer {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        if values.len() != width as usize * height as usize {
            return Err(Error::InvalidConfig(format!(
                "depth buffer has {} values for {}x{}",
                values.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, values })
    }

    /// Every pixel open sky.
    pub fn sky(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![f32::INFINITY; width as usize * height as usize],
        }
    }

    /// Convert `[0, 1]` device depth into linear eye depth.
    ///
    /// Device depth `1` (the far plane) becomes open sky.
    pub fn from_device_depth(width: u32, height: u32, raw: &[f32], near: f32, far: f32) -> Result<Self> {
        if !(near > 0.0) || !(far > near) {
            return Err(Error::InvalidConfig(format!("invalid depth range {near}..{far}")));
        }
        let values = raw
            .iter()
            .map(|&d| {
                if d >= 1.0 {
                    f32::INFINITY
                } else {
                    let d = d.max(0.0);
                    near * far / (far - d * (far - near))
                }
            })
            .collect();
        Self::new(width, height, values)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Depth at a pixel, clamped to the buffer.
    pub fn get(&self, x: u32, y: u32) -> f32 {
        if self.values.is_empty() {
            return f32::INFINITY;
        }
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        self.values[(y * self.width + x) as usize]
    }

    /// Nearest depth at normalized `(u, v)`, `v` down.
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        let x = (u * self.width as f32).floor().max(0.0) as u32;
        let y = (v * self.height as f32).floor().max(0.0) as u32;
        self.get(x, y)
    }
}

// ---------------------------------------------------------------------------
// Surface and images
// ---------------------------------------------------------------------------

/// Pixel format of the destination surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceFormat {
    #[default]
    Rgba16Float,
    Rgba32Float,
    Rgba8UnormSrgb,
}

/// Size and format of the destination surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
}

impl SurfaceDescriptor {
    pub fn new(width: u32, height: u32, format: SurfaceFormat) -> Self {
        Self { width, height, format }
    }

    /// Evaluation size for an integer downscale factor, rounded up.
    pub fn scaled(&self, downscale: u32) -> (u32, u32) {
        let d = downscale.max(1);
        (self.width.div_ceil(d).max(1), self.height.div_ceil(d).max(1))
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Linear RGBA image, row-major from the top-left.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorImage {
    width: u32,
    height: u32,
    pixels: Vec<Vec4>,
}

impl ColorImage {
    pub fn new(width: u32, height: u32, pixels: Vec<Vec4>) -> Result<Self> {
        if pixels.len() != width as usize * height as usize {
            return Err(Error::InvalidConfig(format!(
                "image has {} pixels for {}x{}",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, pixels })
    }

    pub fn filled(width: u32, height: u32, color: Vec4) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    /// Build by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> Vec4) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self { width, height, pixels }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[Vec4] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        self.pixels.get((y * self.width + x) as usize).copied().unwrap_or(Vec4::ZERO)
    }

    /// 8-bit RGBA with values clamped to `[0, 1]`.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| {
                p.clamp(Vec4::ZERO, Vec4::ONE)
                    .to_array()
                    .map(|c| (c * 255.0 + 0.5) as u8)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FrameInputs
// ---------------------------------------------------------------------------

/// Everything the host hands over for one frame.
///
/// Any missing camera, light or depth input turns the frame into a
/// pass-through of the source image.
#[derive(Clone, Copy, Debug)]
pub struct FrameInputs<'a> {
    pub surface: SurfaceDescriptor,
    pub camera: Option<&'a CameraState>,
    pub light: Option<&'a LightState>,
    pub point_lights: &'a [PointLight],
    pub depth: Option<&'a DepthBuffer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraState {
        CameraState::look_at(
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::ZERO,
            Vec3::Y,
            60.0,
            1.0,
            0.1,
            1000.0,
        )
    }

    #[test]
    fn test_centre_ray_points_at_target() {
        let cam = camera();
        let (ray, scale) = cam.view_ray(Vec2::ZERO);
        assert!((ray.direction - Vec3::NEG_Z).length() < 1e-4, "dir {:?}", ray.direction);
        assert!((scale - 1.0).abs() < 1e-4);
        assert_eq!(ray.origin, cam.position);
    }

    #[test]
    fn test_corner_rays_diverge_and_scale_depth() {
        let cam = camera();
        let (ray, scale) = cam.view_ray(Vec2::new(1.0, 1.0));
        assert!(ray.direction.x > 0.0 && ray.direction.y > 0.0);
        assert!(scale > 1.0);
        // A point at eye depth d lies on the ray at t = d * scale
        let p = ray.at(5.0 * scale);
        assert!((p.z - 5.0).abs() < 1e-3, "z {}", p.z);
    }

    #[test]
    fn test_pixel_ray_top_left_points_up_left() {
        let (ray, _) = camera().pixel_ray(0, 0, 64, 64);
        assert!(ray.direction.x < 0.0 && ray.direction.y > 0.0);
    }

    #[test]
    fn test_point_light_falloff_and_range() {
        let light = PointLight::point(Vec3::ZERO, Vec3::ONE, 5.0);
        assert_eq!(light.attenuation(Vec3::ZERO), 1.0);
        assert!((light.attenuation(Vec3::new(2.0, 0.0, 0.0)) - 0.2).abs() < 1e-6);
        assert_eq!(light.attenuation(Vec3::new(6.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_spot_cone() {
        let mut light = PointLight::point(Vec3::ZERO, Vec3::ONE, 10.0);
        light.spot = Some(SpotCone {
            direction: Vec3::NEG_Y,
            inner_cos: 0.9,
            outer_cos: 0.8,
        });
        assert!(light.attenuation(Vec3::new(0.0, -1.0, 0.0)) > 0.0);
        assert_eq!(light.attenuation(Vec3::new(0.0, 1.0, 0.0)), 0.0);
        assert_eq!(light.attenuation(Vec3::new(1.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_device_depth_linearization() {
        let depth = DepthBuffer::from_device_depth(3, 1, &[0.0, 0.5, 1.0], 1.0, 100.0).unwrap();
        assert!((depth.get(0, 0) - 1.0).abs() < 1e-5);
        let mid = 100.0 / (100.0 - 0.5 * 99.0);
        assert!((depth.get(1, 0) - mid).abs() < 1e-4);
        assert!(depth.get(2, 0).is_infinite());
        assert!(DepthBuffer::from_device_depth(1, 1, &[0.5], 0.0, 1.0).is_err());
    }

    #[test]
    fn test_buffer_size_mismatch_rejected() {
        assert!(DepthBuffer::new(2, 2, vec![1.0; 3]).is_err());
        assert!(ColorImage::new(2, 2, vec![Vec4::ONE; 5]).is_err());
    }

    #[test]
    fn test_scaled_surface_rounds_up() {
        let s = SurfaceDescriptor::new(101, 50, SurfaceFormat::Rgba16Float);
        assert_eq!(s.scaled(1), (101, 50));
        assert_eq!(s.scaled(2), (51, 25));
        assert_eq!(s.scaled(4), (26, 13));
    }

    #[test]
    fn test_to_rgba8_clamps() {
        let img = ColorImage::filled(1, 1, Vec4::new(2.0, -1.0, 0.5, 1.0));
        assert_eq!(img.to_rgba8(), vec![255, 0, 128, 255]);
    }
}
