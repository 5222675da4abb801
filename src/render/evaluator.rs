//! Per-pixel raymarch through the cloud volume and the atmosphere.
//!
//! For every output pixel a view ray is rebuilt from the camera matrices and
//! marched twice: first in fixed `eye_step_size` steps through the cloud
//! media (noise box plus impact spheres), then in `in_scattering_samples`
//! steps through the atmosphere shell behind it. Light reaching each sample
//! is attenuated by a short march toward the sun through the clouds and by
//! the atmosphere's optical depth toward the sun.
//!
//! The result is premultiplied: `radiance` is the light added in front of the
//! scene and `transmittance` is how much of the scene still shows through.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::atmosphere::optical_depth::{depth_to_transmittance, integrate_optical_depth};
use crate::atmosphere::phase::{mie_phase, rayleigh_phase};
use crate::atmosphere::{AtmosphereParams, OpticalDepthCache, OpticalDepthTable};
use crate::clouds::{DensityGrid, EasingCurve, ImpactRecord, PhaseFunctionTable};
use crate::core::types::Vec3;
use crate::core::ComputeBackend;
use crate::math::{Aabb, Ray};
use crate::render::config::{CloudConfig, ScatteringConfig, ScatteringMode, MAX_POINT_LIGHTS};
use crate::render::frame::{CameraState, DepthBuffer, LightState, PointLight};

/// Upper bound on cloud samples per view ray.
pub const MAX_EYE_STEPS: usize = 2048;

/// Transmittance below which the cloud march stops.
const OPAQUE_THRESHOLD: f32 = 1e-4;

// ---------------------------------------------------------------------------
// Density sampling
// ---------------------------------------------------------------------------

/// A participating medium the evaluator can march through.
pub trait DensitySampler: Sync {
    /// Density at a world-space point, never negative.
    fn density_at(&self, p: Vec3) -> f32;

    /// Forward segment of `ray` that may hold density, clipped to `t_max`.
    fn segment(&self, ray: &Ray, t_max: f32) -> Option<(f32, f32)>;
}

/// Noise field mapped into a box, plus animated impact spheres.
pub struct CloudMedium<'a> {
    pub grid: Option<&'a DensityGrid>,
    pub bounds: Aabb,
    pub noise_tiling: f32,
    pub density_multiplier: f32,
    pub impact_density: f32,
    pub impacts: &'a [ImpactRecord],
    pub curve: &'a EasingCurve,
}

impl<'a> CloudMedium<'a> {
    pub fn new(
        config: &CloudConfig,
        grid: Option<&'a DensityGrid>,
        impacts: &'a [ImpactRecord],
        curve: &'a EasingCurve,
    ) -> Self {
        Self {
            grid,
            bounds: config.bounds,
            noise_tiling: config.noise_tiling,
            density_multiplier: config.density_multiplier,
            impact_density: config.impact_density,
            impacts,
            curve,
        }
    }

    /// Wrapped trilinear noise inside the container, zero outside it.
    pub fn noise_density(&self, p: Vec3) -> f32 {
        let Some(grid) = self.grid else {
            return 0.0;
        };
        if !self.bounds.is_valid() || !self.bounds.contains_point(p) {
            return 0.0;
        }
        grid.sample(self.bounds.normalized(p) * self.noise_tiling)
    }

    /// Sum of every impact kernel covering `p`.
    ///
    /// Each kernel is `impact_density * curve(1 - d / r)` inside its sphere.
    /// Overlaps add up.
    pub fn impact_density(&self, p: Vec3) -> f32 {
        let mut sum = 0.0;
        for impact in self.impacts {
            if !(impact.radius > 0.0) {
                continue;
            }
            let d = p.distance(impact.center());
            if d < impact.radius {
                sum += self.impact_density * self.curve.evaluate(1.0 - d / impact.radius);
            }
        }
        sum
    }
}

impl DensitySampler for CloudMedium<'_> {
    fn density_at(&self, p: Vec3) -> f32 {
        let d = self.density_multiplier * (self.noise_density(p) + self.impact_density(p));
        if d.is_finite() { d.max(0.0) } else { 0.0 }
    }

    fn segment(&self, ray: &Ray, t_max: f32) -> Option<(f32, f32)> {
        let mut hull: Option<(f32, f32)> = None;
        let mut merge = |seg: (f32, f32)| {
            hull = Some(match hull {
                Some((a, b)) => (a.min(seg.0), b.max(seg.1)),
                None => seg,
            });
        };

        if self.grid.is_some() && self.bounds.is_valid() {
            if let Some(seg) = ray.intersects_aabb(&self.bounds) {
                merge(seg);
            }
        }
        for impact in self.impacts {
            if impact.radius > 0.0 {
                if let Some(seg) = ray.sphere_segment(impact.center(), impact.radius) {
                    merge(seg);
                }
            }
        }

        let (start, end) = hull?;
        let start = start.max(0.0);
        let end = end.min(t_max);
        (end > start).then_some((start, end))
    }
}

/// One cloud sample along a view ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DensitySample {
    pub t: f32,
    pub position: Vec3,
    pub density: f32,
}

/// Fixed-step density samples along `ray`, as the cloud march sees them.
pub fn trace_density<D: DensitySampler>(sampler: &D, ray: &Ray, t_max: f32, step: f32) -> Vec<DensitySample> {
    let Some((start, end)) = sampler.segment(ray, t_max) else {
        return Vec::new();
    };
    march_steps(start, end, step)
        .map(|(t, _)| {
            let position = ray.at(t);
            DensitySample {
                t,
                position,
                density: sampler.density_at(position),
            }
        })
        .collect()
}

/// Midpoints and lengths of fixed steps covering `[start, end]`.
fn march_steps(start: f32, end: f32, step: f32) -> impl Iterator<Item = (f32, f32)> {
    let length = (end - start).max(0.0);
    let mut step = step.max(1e-4);
    let mut count = (length / step).ceil() as usize;
    if count > MAX_EYE_STEPS {
        count = MAX_EYE_STEPS;
        step = length / count as f32;
    }
    (0..count).map(move |i| {
        let t0 = start + i as f32 * step;
        let t1 = (t0 + step).min(end);
        (0.5 * (t0 + t1), t1 - t0)
    })
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Premultiplied scattering result at evaluation resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterOutput {
    width: u32,
    height: u32,
    radiance: Vec<Vec3>,
    transmittance: Vec<f32>,
}

impl ScatterOutput {
    /// Nothing added, everything visible.
    pub fn clear(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            radiance: vec![Vec3::ZERO; n],
            transmittance: vec![1.0; n],
        }
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
    pub fn radiance(&self) -> &[Vec3] {
        &self.radiance
    }

    #[inline]
    pub fn transmittance(&self) -> &[f32] {
        &self.transmittance
    }

    pub fn radiance_mut(&mut self) -> &mut [Vec3] {
        &mut self.radiance
    }

    pub fn transmittance_mut(&mut self) -> &mut [f32] {
        &mut self.transmittance
    }

    /// Pixel at `(x, y)`, clamped to the image.
    pub fn get(&self, x: u32, y: u32) -> (Vec3, f32) {
        if self.radiance.is_empty() {
            return (Vec3::ZERO, 1.0);
        }
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        let i = (y * self.width + x) as usize;
        (self.radiance[i], self.transmittance[i])
    }

    /// Bilinear sample at normalized `(u, v)` with pixel centres at half texels.
    pub fn sample_bilinear(&self, u: f32, v: f32) -> (Vec3, f32) {
        let fx = (u * self.width as f32 - 0.5).max(0.0);
        let fy = (v * self.height as f32 - 0.5).max(0.0);
        let x0 = fx.floor() as u32;
        let y0 = fy.floor() as u32;
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let (l00, t00) = self.get(x0, y0);
        let (l10, t10) = self.get(x0 + 1, y0);
        let (l01, t01) = self.get(x0, y0 + 1);
        let (l11, t11) = self.get(x0 + 1, y0 + 1);

        let l = l00.lerp(l10, tx).lerp(l01.lerp(l11, tx), ty);
        let t0 = t00 + (t10 - t00) * tx;
        let t1 = t01 + (t11 - t01) * tx;
        (l, t0 + (t1 - t0) * ty)
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Everything one evaluation reads.
#[derive(Clone, Copy)]
pub struct EvaluationInputs<'a> {
    pub camera: &'a CameraState,
    pub light: &'a LightState,
    pub point_lights: &'a [PointLight],
    pub depth: &'a DepthBuffer,
    pub impacts: &'a [ImpactRecord],
    pub noise: Option<&'a DensityGrid>,
    pub phase: &'a PhaseFunctionTable,
    pub config: &'a ScatteringConfig,
    /// Output size; the depth buffer is resampled to it.
    pub width: u32,
    pub height: u32,
}

/// Source of sun transmittance through the atmosphere.
enum SunPath {
    Table(Arc<OpticalDepthTable>),
    Realtime { params: AtmosphereParams, samples: u32 },
}

/// Per-frame constants shared by every pixel.
struct FrameContext<'a> {
    camera: &'a CameraState,
    depth: &'a DepthBuffer,
    phase: &'a PhaseFunctionTable,
    point_lights: &'a [PointLight],
    config: &'a ScatteringConfig,
    medium: CloudMedium<'a>,
    sun: SunPath,
    to_light: Vec3,
    sun_radiance: Vec3,
    planet_center: Vec3,
    top_radius: f32,
    rayleigh_extinction: Vec3,
    mie_extinction: Vec3,
    width: u32,
    height: u32,
}

/// Runs the march on the compute backend.
///
/// Owns the optical depth cache so every frame goes through its dirty check;
/// a stale or missing table is rebaked before any pixel reads it.
pub struct ScatteringEvaluator {
    backend: ComputeBackend,
    cache: Arc<OpticalDepthCache>,
}

impl ScatteringEvaluator {
    pub fn new(backend: ComputeBackend) -> Self {
        let cache = Arc::new(OpticalDepthCache::new(backend.clone()));
        Self { backend, cache }
    }

    /// The cache this evaluator bakes into.
    pub fn cache(&self) -> &Arc<OpticalDepthCache> {
        &self.cache
    }

    /// March every pixel and return radiance plus transmittance.
    pub fn evaluate(&self, inputs: &EvaluationInputs<'_>) -> ScatterOutput {
        let start = Instant::now();
        let config = inputs.config;
        let params = config.bake_params();

        let sun = match config.mode {
            ScatteringMode::Precomputed => SunPath::Table(self.cache.ensure_baked(&params)),
            ScatteringMode::Realtime => SunPath::Realtime {
                params,
                samples: config.optical_depth_samples.max(1),
            },
        };

        let point_lights = if inputs.point_lights.len() > MAX_POINT_LIGHTS {
            log::debug!(
                "Ignoring {} point lights beyond the first {}",
                inputs.point_lights.len() - MAX_POINT_LIGHTS,
                MAX_POINT_LIGHTS
            );
            &inputs.point_lights[..MAX_POINT_LIGHTS]
        } else {
            inputs.point_lights
        };

        let mut medium = CloudMedium::new(&config.clouds, inputs.noise, inputs.impacts, &config.impacts.curve);
        if !config.clouds.enabled {
            medium.grid = None;
            medium.impacts = &[];
        }

        let ctx = FrameContext {
            camera: inputs.camera,
            depth: inputs.depth,
            phase: inputs.phase,
            point_lights,
            config,
            medium,
            sun,
            to_light: inputs.light.to_light(),
            sun_radiance: inputs.light.radiance(),
            planet_center: params.planet_center(),
            top_radius: params.earth_radius + params.top_height(),
            rayleigh_extinction: config.rayleigh.extinction(),
            mie_extinction: config.mie.extinction(),
            width: inputs.width.max(1),
            height: inputs.height.max(1),
        };

        let width = ctx.width as usize;
        let n = width * ctx.height as usize;
        let mut radiance = vec![Vec3::ZERO; n];
        let mut transmittance = vec![1.0_f32; n];

        self.backend.dispatch(|| {
            radiance
                .par_chunks_mut(width)
                .zip(transmittance.par_chunks_mut(width))
                .enumerate()
                .for_each(|(y, (l_row, t_row))| {
                    for (x, (l, t)) in l_row.iter_mut().zip(t_row.iter_mut()).enumerate() {
                        let (pl, pt) = ctx.shade_pixel(x as u32, y as u32);
                        *l = pl;
                        *t = pt;
                    }
                });
        });

        log::trace!(
            "Evaluated {}x{} scattering in {:.2}ms",
            ctx.width,
            ctx.height,
            start.elapsed().as_secs_f64() * 1000.0
        );

        ScatterOutput {
            width: ctx.width,
            height: ctx.height,
            radiance,
            transmittance,
        }
    }
}

impl FrameContext<'_> {
    fn shade_pixel(&self, x: u32, y: u32) -> (Vec3, f32) {
        let (ray, depth_scale) = self.camera.pixel_ray(x, y, self.width, self.height);
        let u = (x as f32 + 0.5) / self.width as f32;
        let v = (y as f32 + 0.5) / self.height as f32;
        let scene_depth = self.depth.sample(u, v);
        let t_scene = if scene_depth.is_finite() { scene_depth.max(0.0) * depth_scale } else { f32::INFINITY };
        let t_max = t_scene.min(self.config.max_distance);

        let (cloud_radiance, cloud_t) = self.march_clouds(&ray, t_max);
        if cloud_t <= OPAQUE_THRESHOLD {
            return (cloud_radiance.max(Vec3::ZERO), 0.0);
        }
        let (atmo_radiance, atmo_t) = self.march_atmosphere(&ray, t_max);

        let radiance = cloud_radiance + cloud_t * atmo_radiance;
        let transmittance = cloud_t * (atmo_t.x + atmo_t.y + atmo_t.z) / 3.0;

        let radiance = if radiance.is_finite() { radiance.max(Vec3::ZERO) } else { Vec3::ZERO };
        let transmittance = if transmittance.is_finite() { transmittance.clamp(0.0, 1.0) } else { 1.0 };
        (radiance, transmittance)
    }

    /// Front-to-back cloud integration. Returns radiance and scalar transmittance.
    fn march_clouds(&self, ray: &Ray, t_max: f32) -> (Vec3, f32) {
        let Some((start, end)) = self.medium.segment(ray, t_max) else {
            return (Vec3::ZERO, 1.0);
        };

        let clouds = &self.config.clouds;
        let tint = Vec3::from(clouds.tint);
        let sun_phase = self.phase.lookup(ray.direction.dot(self.to_light));

        let mut radiance = Vec3::ZERO;
        let mut transmittance = 1.0_f32;

        for (t, dt) in march_steps(start, end, self.config.eye_step_size) {
            let p = ray.at(t);
            let density = self.medium.density_at(p);
            if density <= 0.0 {
                continue;
            }

            let extinction = density * clouds.absorption;
            let step_t = (-extinction * dt).exp();

            let mut light = self.sun_radiance
                * sun_phase
                * self.cloud_shadow(p)
                * self.sun_transmittance(p);
            for point in self.point_lights {
                let falloff = point.attenuation(p);
                if falloff > 0.0 {
                    let to_point = (point.position - p).normalize_or(self.to_light);
                    light += point.color.max(Vec3::ZERO) * falloff * self.phase.lookup(ray.direction.dot(to_point));
                }
            }

            radiance += transmittance * (1.0 - step_t) * light * tint;
            transmittance *= step_t;
            if transmittance <= OPAQUE_THRESHOLD {
                break;
            }
        }

        (radiance, transmittance)
    }

    /// Transmittance of the clouds between `p` and the sun.
    fn cloud_shadow(&self, p: Vec3) -> f32 {
        let step = self.config.light_step_size.max(1e-4);
        let mut depth = 0.0;
        for i in 0..self.config.light_sample_count {
            let q = p + self.to_light * ((i as f32 + 0.5) * step);
            depth += self.medium.density_at(q) * step;
        }
        (-depth * self.config.clouds.absorption).exp()
    }

    /// Atmosphere transmittance from `p` toward the sun.
    fn sun_transmittance(&self, p: Vec3) -> Vec3 {
        let offset = p - self.planet_center;
        let r = offset.length();
        let altitude = r - self.config.earth_radius;
        let up = if r > 0.0 { offset / r } else { Vec3::Y };
        let cos = up.dot(self.to_light);

        match &self.sun {
            SunPath::Table(table) => {
                table.transmittance(altitude.max(0.0), cos, self.rayleigh_extinction, self.mie_extinction)
            }
            SunPath::Realtime { params, samples } => integrate_optical_depth(params, altitude, cos, *samples)
                .map(|d| depth_to_transmittance(d, self.rayleigh_extinction, self.mie_extinction))
                .unwrap_or(Vec3::ZERO),
        }
    }

    /// Single-scattering through both layers up to `t_max`.
    fn march_atmosphere(&self, ray: &Ray, t_max: f32) -> (Vec3, Vec3) {
        let rayleigh = &self.config.rayleigh;
        let mie = &self.config.mie;
        if !rayleigh.enabled && !mie.enabled {
            return (Vec3::ZERO, Vec3::ONE);
        }

        let Some((start, mut end)) = ray.sphere_segment(self.planet_center, self.top_radius) else {
            return (Vec3::ZERO, Vec3::ONE);
        };
        if let Some((ground, _)) = ray.intersect_sphere(self.planet_center, self.config.earth_radius) {
            if ground > start {
                end = end.min(ground);
            }
        }
        end = end.min(t_max);
        if !(end > start) {
            return (Vec3::ZERO, Vec3::ONE);
        }

        let rayleigh_profile = rayleigh.profile();
        let mie_profile = mie.profile();
        let cos = ray.direction.dot(self.to_light);
        let rayleigh_scatter = self.rayleigh_extinction * rayleigh_phase(cos) * Vec3::from(rayleigh.tint);
        let mie_scatter =
            self.mie_extinction * mie_phase(cos, self.config.mie_anisotropy) * Vec3::from(mie.tint);

        let samples = self.config.in_scattering_samples.max(1);
        let ds = (end - start) / samples as f32;
        let mut depth = [0.0_f32; 2];
        let mut radiance = Vec3::ZERO;

        for i in 0..samples {
            let p = ray.at(start + (i as f32 + 0.5) * ds);
            let h = p.distance(self.planet_center) - self.config.earth_radius;
            let rho_r = if rayleigh.enabled { rayleigh_profile.density_at(h) } else { 0.0 };
            let rho_m = if mie.enabled { mie_profile.density_at(h) } else { 0.0 };

            // Midpoint of this step's own attenuation
            depth[0] += rho_r * ds * 0.5;
            depth[1] += rho_m * ds * 0.5;
            let view_t = depth_to_transmittance(depth, self.rayleigh_extinction, self.mie_extinction);
            depth[0] += rho_r * ds * 0.5;
            depth[1] += rho_m * ds * 0.5;

            if rho_r <= 0.0 && rho_m <= 0.0 {
                continue;
            }
            let sun_t = self.sun_transmittance(p);
            radiance += view_t * sun_t * (rayleigh_scatter * rho_r + mie_scatter * rho_m) * ds;
        }

        let total_t = depth_to_transmittance(depth, self.rayleigh_extinction, self.mie_extinction);
        (radiance * self.sun_radiance, total_t)
    }
}
