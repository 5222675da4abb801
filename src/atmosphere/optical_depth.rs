//! Precomputed optical depth lookup table.
//!
//! The table is a square grid over `(altitude, cos view angle)`. Each texel
//! holds the integrated density of both layers along a ray that starts at
//! that altitude, leaves at that angle from the local vertical, and runs to
//! the top of the atmosphere. Rays that hit the ground store [`OCCLUDED`].

use std::time::Instant;

use rayon::prelude::*;

use crate::atmosphere::config::AtmosphereParams;
use crate::core::types::Vec3;
use crate::core::ComputeBackend;

/// Sentinel depth for rays blocked by the planet.
pub const OCCLUDED: f32 = f32::MAX;

/// Smallest usable table edge.
pub const MIN_TABLE_RESOLUTION: u32 = 2;

/// Optical depth of `[rayleigh, mie]` along one ray.
pub type LayerDepths = [f32; 2];

/// Baked optical depth grid, valid for exactly one [`AtmosphereParams`].
#[derive(Clone, Debug)]
pub struct OpticalDepthTable {
    params: AtmosphereParams,
    resolution: u32,
    /// Row-major, `v` (angle) rows of `u` (altitude) texels.
    texels: Vec<LayerDepths>,
}

impl OpticalDepthTable {
    /// Integrate every texel on the compute backend.
    ///
    /// Cost is `resolution² × sample_count`; callers go through
    /// [`OpticalDepthCache`](crate::atmosphere::OpticalDepthCache) so this
    /// only runs when parameters change.
    pub fn bake(params: &AtmosphereParams, backend: &ComputeBackend) -> Self {
        let resolution = params.resolution.max(MIN_TABLE_RESOLUTION);
        let samples = params.sample_count.max(1);
        let res = resolution as usize;
        let top = params.top_height();
        let start = Instant::now();

        let mut texels = vec![[0.0_f32; 2]; res * res];
        backend.dispatch(|| {
            texels
                .par_chunks_mut(res)
                .enumerate()
                .for_each(|(v, row)| {
                    let cos_angle = axis_value(v, res) * 2.0 - 1.0;
                    for (u, texel) in row.iter_mut().enumerate() {
                        let altitude = axis_value(u, res) * top;
                        *texel = integrate_optical_depth(params, altitude, cos_angle, samples)
                            .unwrap_or([OCCLUDED, OCCLUDED]);
                    }
                });
        });

        log::debug!(
            "Baked {}x{} optical depth table ({} samples/texel) in {:.2}ms",
            resolution,
            resolution,
            samples,
            start.elapsed().as_secs_f64() * 1000.0
        );

        Self {
            params: *params,
            resolution,
            texels,
        }
    }

    /// Parameters this table was baked with.
    #[inline]
    pub fn params(&self) -> &AtmosphereParams {
        &self.params
    }

    /// Whether the table may be read for `params`.
    #[inline]
    pub fn is_valid_for(&self, params: &AtmosphereParams) -> bool {
        self.params == *params
    }

    /// Texels per axis.
    #[inline]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Raw texel at `(u, v)`, clamped to the grid.
    pub fn texel(&self, u: u32, v: u32) -> LayerDepths {
        let max = self.resolution - 1;
        let idx = (v.min(max) * self.resolution + u.min(max)) as usize;
        self.texels[idx]
    }

    /// Filtered depths for a ray leaving `altitude` at `cos_angle` from the
    /// local vertical. `None` when the ray is blocked by the ground.
    ///
    /// Bilinear between unoccluded neighbours; falls back to the nearest
    /// texel at the horizon edge where some neighbours are occluded.
    pub fn lookup(&self, altitude: f32, cos_angle: f32) -> Option<LayerDepths> {
        let top = self.params.top_height();
        let max = (self.resolution - 1) as f32;
        let u = if top > 0.0 { (altitude / top).clamp(0.0, 1.0) * max } else { 0.0 };
        let v = ((cos_angle.clamp(-1.0, 1.0) + 1.0) * 0.5) * max;
        if !u.is_finite() || !v.is_finite() {
            return None;
        }

        let u0 = u.floor() as u32;
        let v0 = v.floor() as u32;
        let u1 = (u0 + 1).min(self.resolution - 1);
        let v1 = (v0 + 1).min(self.resolution - 1);
        let fu = u - u0 as f32;
        let fv = v - v0 as f32;

        let corners = [
            self.texel(u0, v0),
            self.texel(u1, v0),
            self.texel(u0, v1),
            self.texel(u1, v1),
        ];

        if corners.iter().any(|c| c[0] >= OCCLUDED) {
            let nearest = self.texel(u.round() as u32, v.round() as u32);
            return if nearest[0] >= OCCLUDED { None } else { Some(nearest) };
        }

        let mut out = [0.0; 2];
        for (layer, value) in out.iter_mut().enumerate() {
            let a = corners[0][layer] + (corners[1][layer] - corners[0][layer]) * fu;
            let b = corners[2][layer] + (corners[3][layer] - corners[2][layer]) * fu;
            *value = a + (b - a) * fv;
        }
        Some(out)
    }

    /// Per-channel transmittance toward the atmosphere exit.
    ///
    /// Exactly zero for occluded rays, whatever the coefficients.
    pub fn transmittance(
        &self,
        altitude: f32,
        cos_angle: f32,
        rayleigh_extinction: Vec3,
        mie_extinction: Vec3,
    ) -> Vec3 {
        match self.lookup(altitude, cos_angle) {
            Some(depths) => depth_to_transmittance(depths, rayleigh_extinction, mie_extinction),
            None => Vec3::ZERO,
        }
    }
}

/// Beer-Lambert attenuation for a pair of layer depths.
#[inline]
pub fn depth_to_transmittance(depths: LayerDepths, rayleigh_extinction: Vec3, mie_extinction: Vec3) -> Vec3 {
    let tau = rayleigh_extinction * depths[0].max(0.0) + mie_extinction * depths[1].max(0.0);
    Vec3::new((-tau.x).exp(), (-tau.y).exp(), (-tau.z).exp())
}

/// Numerically integrate both layers from `altitude` to the atmosphere exit.
///
/// The ray leaves at `cos_angle` from the local vertical. Uses `samples`
/// fixed midpoint steps. Returns `None` when the ray hits the ground.
pub fn integrate_optical_depth(
    params: &AtmosphereParams,
    altitude: f32,
    cos_angle: f32,
    samples: u32,
) -> Option<LayerDepths> {
    let radius = params.earth_radius;
    let top_radius = radius + params.top_height();
    let r = radius + altitude.max(0.0);
    let mu = cos_angle.clamp(-1.0, 1.0);
    let sin2 = (1.0 - mu * mu).max(0.0);

    // Downward ray whose closest approach passes below the surface.
    if mu < 0.0 && r * r * sin2 < radius * radius {
        return None;
    }

    // Distance to the outer shell from inside it.
    let disc = (top_radius * top_radius - r * r * sin2).max(0.0);
    let exit = (-r * mu + disc.sqrt()).max(0.0);
    if exit <= 0.0 {
        return Some([0.0, 0.0]);
    }

    let n = samples.max(1);
    let step = exit / n as f32;
    let mut depth = [0.0_f32; 2];
    for i in 0..n {
        let t = (i as f32 + 0.5) * step;
        let h = (r * r + 2.0 * r * mu * t + t * t).max(0.0).sqrt() - radius;
        depth[0] += params.rayleigh.density_at(h) * step;
        depth[1] += params.mie.density_at(h) * step;
    }
    Some(depth)
}

/// Normalized coordinate of texel `i` on an axis of `n` texels, endpoints inclusive.
#[inline]
fn axis_value(i: usize, n: usize) -> f32 {
    if n <= 1 { 0.0 } else { i as f32 / (n - 1) as f32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> AtmosphereParams {
        AtmosphereParams {
            resolution: 16,
            sample_count: 32,
            ..Default::default()
        }
    }

    fn backend() -> ComputeBackend {
        ComputeBackend::new(Some(2)).unwrap()
    }

    #[test]
    fn test_straight_up_matches_analytic_integral() {
        let params = small_params();
        // Rayleigh: ∫0^100 exp(-h/100) dh = 100 (1 - e^-1)
        let expected = 100.0 * (1.0 - (-1.0_f32).exp());
        let d = integrate_optical_depth(&params, 0.0, 1.0, 200).unwrap();
        assert!(
            (d[0] - expected).abs() / expected < 0.01,
            "rayleigh depth {} expected ~{expected}",
            d[0]
        );
        // Mie shell is 20 units tall
        let expected_mie = 20.0 * (1.0 - (-1.0_f32).exp());
        assert!((d[1] - expected_mie).abs() / expected_mie < 0.01);
    }

    #[test]
    fn test_downward_ray_from_ground_is_occluded() {
        let params = small_params();
        assert!(integrate_optical_depth(&params, 0.0, -0.5, 16).is_none());
        assert!(integrate_optical_depth(&params, 0.0, -1.0, 16).is_none());
    }

    #[test]
    fn test_horizontal_ray_from_ground_is_not_occluded() {
        let params = small_params();
        let d = integrate_optical_depth(&params, 0.0, 0.0, 64).unwrap();
        let up = integrate_optical_depth(&params, 0.0, 1.0, 64).unwrap();
        assert!(d[0] > up[0], "horizon path should be longer than zenith path");
    }

    #[test]
    fn test_top_of_atmosphere_has_no_depth_upward() {
        let params = small_params();
        let d = integrate_optical_depth(&params, params.top_height(), 1.0, 16).unwrap();
        assert!(d[0] < 1e-3 && d[1] < 1e-3, "depth at top: {d:?}");
    }

    #[test]
    fn test_bake_stores_sentinel_for_ground_hits() {
        let params = small_params();
        let table = OpticalDepthTable::bake(&params, &backend());
        // u = 0 (ground), v = 0 (straight down)
        assert_eq!(table.texel(0, 0), [OCCLUDED, OCCLUDED]);
        let up = table.texel(0, table.resolution() - 1);
        assert!(up[0] < OCCLUDED && up[0] > 0.0);
    }

    #[test]
    fn test_occluded_transmittance_is_zero() {
        let params = small_params();
        let table = OpticalDepthTable::bake(&params, &backend());
        let t = table.transmittance(0.0, -1.0, Vec3::ZERO, Vec3::ZERO);
        assert_eq!(t, Vec3::ZERO);
    }

    #[test]
    fn test_lookup_matches_direct_integration_at_texel_centres() {
        let params = small_params();
        let table = OpticalDepthTable::bake(&params, &backend());
        let top = params.top_height();
        let res = table.resolution();
        let u = 5;
        let v = res - 2;
        let altitude = u as f32 / (res - 1) as f32 * top;
        let cos_angle = v as f32 / (res - 1) as f32 * 2.0 - 1.0;
        let direct = integrate_optical_depth(&params, altitude, cos_angle, params.sample_count).unwrap();
        let looked_up = table.lookup(altitude, cos_angle).unwrap();
        assert!((direct[0] - looked_up[0]).abs() < 1e-2 * direct[0].max(1.0));
        assert!((direct[1] - looked_up[1]).abs() < 1e-2 * direct[1].max(1.0));
    }

    #[test]
    fn test_table_is_valid_only_for_its_params() {
        let params = small_params();
        let table = OpticalDepthTable::bake(&params, &backend());
        assert!(table.is_valid_for(&params));
        let mut other = params;
        other.earth_radius += 1.0;
        assert!(!table.is_valid_for(&other));
    }

    #[test]
    fn test_transmittance_in_unit_range() {
        let params = small_params();
        let table = OpticalDepthTable::bake(&params, &backend());
        for i in 0..=20 {
            let cos_angle = -1.0 + i as f32 * 0.1;
            let t = table.transmittance(30.0, cos_angle, Vec3::splat(0.01), Vec3::splat(0.05));
            for c in t.to_array() {
                assert!((0.0..=1.0).contains(&c), "transmittance {c} out of range");
            }
        }
    }
}
