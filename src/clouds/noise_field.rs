//! Tileable cellular density grid for the cloud volume.
//!
//! The grid is a cube (or a single slice in plane mode) of Worley values in
//! `[0, 1]`, inverted so feature points are dense. Tiling comes from blending
//! the noise with copies of itself shifted by one period on every axis, so
//! sampling with wrapped coordinates shows no seams.

use std::sync::Arc;
use std::time::Instant;

use noise::core::worley::ReturnType;
use noise::{NoiseFn, Worley};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::core::{ComputeBackend, Error, Result};

/// Smallest grid edge accepted by [`NoiseField::generate`].
pub const MIN_NOISE_RESOLUTION: u32 = 8;

/// Shape of the generated grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseDimension {
    /// Full `R×R×R` volume.
    #[default]
    Volume,
    /// A single `R×R` slice, sampled with `w` ignored.
    Plane,
}

/// Generation parameters. Any change regenerates the grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    /// Texels per edge.
    pub resolution: u32,
    pub seed: u32,
    /// Worley cells across one tile.
    pub cells: u32,
    pub dimension: NoiseDimension,
    /// Map `1 - distance` so cell centres are dense.
    pub invert: bool,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            resolution: 64,
            seed: 0,
            cells: 4,
            dimension: NoiseDimension::Volume,
            invert: true,
        }
    }
}

// ---------------------------------------------------------------------------
// DensityGrid
// ---------------------------------------------------------------------------

/// Immutable density texels, `x` fastest then `y` then `z`.
#[derive(Clone, Debug, PartialEq)]
pub struct DensityGrid {
    resolution: u32,
    depth: u32,
    values: Vec<f32>,
}

impl DensityGrid {
    /// Grid filled with one value; mostly for tests and debugging.
    pub fn uniform(resolution: u32, depth: u32, value: f32) -> Self {
        let resolution = resolution.max(1);
        let depth = depth.max(1);
        let len = (resolution as usize).pow(2) * depth as usize;
        Self {
            resolution,
            depth,
            values: vec![value.clamp(0.0, 1.0); len],
        }
    }

    /// Edge length in `x` and `y`.
    #[inline]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Number of `z` slices: the resolution for volumes, 1 for planes.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn dimensions(&self) -> [u32; 3] {
        [self.resolution, self.resolution, self.depth]
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Texel at integer coordinates, wrapped on every axis.
    #[inline]
    pub fn texel(&self, x: i64, y: i64, z: i64) -> f32 {
        let r = self.resolution as i64;
        let x = x.rem_euclid(r) as usize;
        let y = y.rem_euclid(r) as usize;
        let z = z.rem_euclid(self.depth as i64) as usize;
        let r = r as usize;
        self.values[(z * r + y) * r + x]
    }

    /// Trilinear sample at normalized coordinates with repeat addressing.
    pub fn sample(&self, uvw: Vec3) -> f32 {
        if !uvw.is_finite() {
            return 0.0;
        }
        let r = self.resolution as f32;
        let p = Vec3::new(uvw.x * r - 0.5, uvw.y * r - 0.5, uvw.z * self.depth as f32 - 0.5);
        let base = p.floor();
        let f = p - base;
        let (x0, y0, z0) = (base.x as i64, base.y as i64, base.z as i64);

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let plane = |z: i64| {
            let a = lerp(self.texel(x0, y0, z), self.texel(x0 + 1, y0, z), f.x);
            let b = lerp(self.texel(x0, y0 + 1, z), self.texel(x0 + 1, y0 + 1, z), f.x);
            lerp(a, b, f.y)
        };

        if self.depth == 1 {
            plane(0)
        } else {
            lerp(plane(z0), plane(z0 + 1), f.z)
        }
    }
}

// ---------------------------------------------------------------------------
// NoiseField
// ---------------------------------------------------------------------------

/// Owner of the current density grid.
///
/// The grid is shared out as an `Arc`, so evaluations that already hold it
/// keep reading the old texels while a new one is generated.
pub struct NoiseField {
    backend: ComputeBackend,
    settings: NoiseSettings,
    grid: Option<Arc<DensityGrid>>,
    rejected_resolution: Option<u32>,
}

impl NoiseField {
    /// A field with no grid yet; samples read as zero density.
    pub fn empty(backend: ComputeBackend) -> Self {
        Self {
            backend,
            settings: NoiseSettings::default(),
            grid: None,
            rejected_resolution: None,
        }
    }

    /// Create a field and generate its first grid.
    pub fn new(backend: ComputeBackend, settings: NoiseSettings) -> Result<Self> {
        let mut field = Self::empty(backend);
        field.settings = settings;
        field.generate(field.settings.resolution)?;
        Ok(field)
    }

    /// Regenerate at `resolution`, keeping every other setting.
    ///
    /// Resolutions below [`MIN_NOISE_RESOLUTION`] are rejected and the
    /// previous grid stays in place.
    pub fn generate(&mut self, resolution: u32) -> Result<Arc<DensityGrid>> {
        if resolution < MIN_NOISE_RESOLUTION {
            return Err(Error::InvalidResolution {
                requested: resolution,
                minimum: MIN_NOISE_RESOLUTION,
            });
        }

        let mut settings = self.settings.clone();
        settings.resolution = resolution;
        let grid = Arc::new(generate_worley(&settings, &self.backend));

        self.settings = settings;
        self.grid = Some(Arc::clone(&grid));
        self.rejected_resolution = None;
        Ok(grid)
    }

    /// Bring the grid in line with `settings`, regenerating only on change.
    ///
    /// Returns `true` when a new grid was produced. An invalid resolution is
    /// logged once per distinct value and leaves the current grid untouched.
    pub fn ensure(&mut self, settings: &NoiseSettings) -> bool {
        if self.grid.is_some() && *settings == self.settings {
            return false;
        }
        if self.rejected_resolution == Some(settings.resolution) {
            return false;
        }

        let previous = self.settings.clone();
        self.settings = NoiseSettings {
            resolution: previous.resolution,
            ..settings.clone()
        };
        match self.generate(settings.resolution) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Keeping previous noise grid: {e}");
                self.settings = previous;
                self.rejected_resolution = Some(settings.resolution);
                false
            }
        }
    }

    /// Current grid, if one has been generated.
    pub fn grid(&self) -> Option<Arc<DensityGrid>> {
        self.grid.clone()
    }

    pub fn settings(&self) -> &NoiseSettings {
        &self.settings
    }
}

/// Build a tileable inverted-Worley grid on the compute backend.
///
/// Deterministic for a given seed, cell count and resolution.
pub fn generate_worley(settings: &NoiseSettings, backend: &ComputeBackend) -> DensityGrid {
    let start = Instant::now();
    let resolution = settings.resolution.max(1);
    let depth = match settings.dimension {
        NoiseDimension::Volume => resolution,
        NoiseDimension::Plane => 1,
    };
    let res = resolution as usize;
    let period = settings.cells.max(1) as f64;
    let seed = settings.seed;

    let mut values = vec![0.0_f32; res * res * depth as usize];
    backend.dispatch(|| {
        values
            .par_chunks_mut(res * res)
            .enumerate()
            .for_each(|(z, slice)| {
                // Worley is not Send; one instance per slice.
                let worley = Worley::new(seed)
                    .set_frequency(1.0)
                    .set_return_type(ReturnType::Distance);
                let wz = if depth == 1 { 0.0 } else { (z as f64 + 0.5) / res as f64 };
                for (i, value) in slice.iter_mut().enumerate() {
                    let wx = ((i % res) as f64 + 0.5) / res as f64;
                    let wy = ((i / res) as f64 + 0.5) / res as f64;
                    *value = tiled_sample(&worley, [wx, wy, wz], period, depth > 1) as f32;
                }
            });
    });

    normalize(&mut values, settings.invert);

    log::info!(
        "Generated {}x{}x{} noise grid (seed {}, {} cells) in {:.2}ms",
        resolution,
        resolution,
        depth,
        seed,
        settings.cells,
        start.elapsed().as_secs_f64() * 1000.0
    );

    DensityGrid {
        resolution,
        depth,
        values,
    }
}

/// Blend the noise with its period-shifted copies so opposite faces match.
fn tiled_sample(noise: &Worley, uvw: [f64; 3], period: f64, wrap_z: bool) -> f64 {
    let p = [uvw[0] * period, uvw[1] * period, uvw[2] * period];
    let z_corners: &[f64] = if wrap_z { &[0.0, 1.0] } else { &[0.0] };

    let mut sum = 0.0;
    for &cz in z_corners {
        let wz = if wrap_z { axis_weight(uvw[2], cz) } else { 1.0 };
        for cy in [0.0, 1.0] {
            let wy = axis_weight(uvw[1], cy);
            for cx in [0.0, 1.0] {
                let wx = axis_weight(uvw[0], cx);
                let shifted = [p[0] - cx * period, p[1] - cy * period, p[2] - cz * period];
                sum += wx * wy * wz * noise.get(shifted);
            }
        }
    }
    sum
}

#[inline]
fn axis_weight(t: f64, corner: f64) -> f64 {
    if corner == 0.0 { 1.0 - t } else { t }
}

/// Stretch to `[0, 1]`, optionally inverting. A flat field becomes zero.
fn normalize(values: &mut [f32], invert: bool) {
    let (min, max) = values
        .par_iter()
        .fold(
            || (f32::MAX, f32::MIN),
            |(lo, hi), &v| (lo.min(v), hi.max(v)),
        )
        .reduce(|| (f32::MAX, f32::MIN), |a, b| (a.0.min(b.0), a.1.max(b.1)));

    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        values.par_iter_mut().for_each(|v| *v = 0.0);
        return;
    }

    values.par_iter_mut().for_each(|v| {
        let n = ((*v - min) / range).clamp(0.0, 1.0);
        *v = if invert { 1.0 - n } else { n };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ComputeBackend {
        ComputeBackend::new(Some(2)).unwrap()
    }

    fn settings(resolution: u32) -> NoiseSettings {
        NoiseSettings {
            resolution,
            seed: 7,
            cells: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_volume_has_exact_dimensions_and_unit_range() {
        let field = NoiseField::new(backend(), settings(16)).unwrap();
        let grid = field.grid().unwrap();
        assert_eq!(grid.dimensions(), [16, 16, 16]);
        assert_eq!(grid.values().len(), 16 * 16 * 16);
        assert!(grid.values().iter().all(|v| (0.0..=1.0).contains(v)));
        let max = grid.values().iter().cloned().fold(0.0, f32::max);
        assert!(max > 0.99, "normalized grid should reach 1, got {max}");
    }

    #[test]
    fn test_plane_is_single_slice() {
        let s = NoiseSettings {
            dimension: NoiseDimension::Plane,
            ..settings(12)
        };
        let grid = generate_worley(&s, &backend());
        assert_eq!(grid.dimensions(), [12, 12, 1]);
    }

    #[test]
    fn test_small_resolution_rejected_and_previous_kept() {
        let mut field = NoiseField::new(backend(), settings(8)).unwrap();
        let before = field.grid().unwrap();

        let err = field.generate(4).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidResolution { requested: 4, minimum: 8 }
        ));
        assert!(Arc::ptr_eq(&before, &field.grid().unwrap()));
        assert_eq!(field.settings().resolution, 8);
    }

    #[test]
    fn test_ensure_regenerates_only_on_change() {
        let mut field = NoiseField::new(backend(), settings(8)).unwrap();
        let first = field.grid().unwrap();

        assert!(!field.ensure(&settings(8)));
        assert!(Arc::ptr_eq(&first, &field.grid().unwrap()));

        assert!(field.ensure(&settings(10)));
        assert_eq!(field.grid().unwrap().resolution(), 10);

        assert!(!field.ensure(&settings(2)));
        assert_eq!(field.grid().unwrap().resolution(), 10);
        assert_eq!(field.settings().resolution, 10);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let a = generate_worley(&settings(8), &backend());
        let b = generate_worley(&settings(8), &backend());
        assert_eq!(a, b);

        let mut other = settings(8);
        other.seed = 8;
        let c = generate_worley(&other, &backend());
        assert_ne!(a.values(), c.values());
    }

    #[test]
    fn test_sampling_wraps_without_seams() {
        let grid = generate_worley(&settings(16), &backend());
        for i in 0..8 {
            let t = i as f32 / 8.0;
            let a = grid.sample(Vec3::new(0.0, t, 0.5));
            let b = grid.sample(Vec3::new(1.0, t, 0.5));
            assert!((a - b).abs() < 1e-5, "seam at t={t}: {a} vs {b}");
        }
    }

    #[test]
    fn test_uniform_grid_samples_constant() {
        let grid = DensityGrid::uniform(8, 8, 0.25);
        assert!((grid.sample(Vec3::new(0.3, 0.7, 0.1)) - 0.25).abs() < 1e-6);
        assert!((grid.sample(Vec3::new(-2.3, 5.7, 9.1)) - 0.25).abs() < 1e-6);
        assert_eq!(grid.sample(Vec3::new(f32::NAN, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn test_empty_field_has_no_grid() {
        let field = NoiseField::empty(backend());
        assert!(field.grid().is_none());
    }
}
