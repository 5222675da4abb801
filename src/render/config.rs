//! Host-settable scattering configuration.
//!
//! Everything the host can tune lives in [`ScatteringConfig`] and is passed
//! explicitly into each frame. There is no global settings state; the optical
//! depth cache compares [`ScatteringConfig::bake_params`] against its last
//! bake to decide whether to rebuild.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atmosphere::{AtmosphereLayer, AtmosphereParams};
use crate::clouds::{ImpactSettings, NoiseSettings};
use crate::core::types::Vec3;
use crate::core::Result;
use crate::math::Aabb;

/// Most point/spot lights a frame may carry.
pub const MAX_POINT_LIGHTS: usize = 8;

/// How light transmittance toward the sun is obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScatteringMode {
    /// Integrate the light path every sample.
    Realtime,
    /// Read the baked optical depth table.
    #[default]
    Precomputed,
}

/// Cloud volume parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub enabled: bool,
    /// World-space container the noise field is mapped into.
    pub bounds: Aabb,
    /// Noise tiles across the container on each axis.
    pub noise_tiling: f32,
    /// Scales noise and impact density together.
    pub density_multiplier: f32,
    /// Extinction per unit density.
    pub absorption: f32,
    /// Peak density added at an impact's centre.
    pub impact_density: f32,
    /// Scattered light tint (linear RGB, HDR allowed).
    pub tint: [f32; 3],
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bounds: Aabb::new(Vec3::new(-8.0, 0.0, -8.0), Vec3::new(8.0, 6.0, 8.0)),
            noise_tiling: 1.0,
            density_multiplier: 1.0,
            absorption: 1.0,
            impact_density: 1.0,
            tint: [1.0, 1.0, 1.0],
        }
    }
}

/// The full configuration surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScatteringConfig {
    pub earth_radius: f32,
    pub rayleigh: AtmosphereLayer,
    pub mie: AtmosphereLayer,
    /// Henyey-Greenstein `g` for the Mie layer (0-1).
    pub mie_anisotropy: f32,
    /// Integration steps per optical depth sample (1-100).
    pub optical_depth_samples: u32,
    /// Atmosphere in-scattering steps per view ray (1-50).
    pub in_scattering_samples: u32,
    /// Optical depth table texels per axis.
    pub lut_resolution: u32,
    /// Cloud march step along the view ray.
    pub eye_step_size: f32,
    /// Cloud march step toward the light.
    pub light_step_size: f32,
    /// Steps toward the light per cloud sample.
    pub light_sample_count: u32,
    /// Farthest distance a view ray is marched when the depth buffer is open sky.
    pub max_distance: f32,
    /// Strength of the composite over the source image (0-1).
    pub blend_factor: f32,
    /// Integer evaluation downscale (1-4).
    pub downscale: u32,
    pub mode: ScatteringMode,
    pub clouds: CloudConfig,
    pub noise: NoiseSettings,
    pub impacts: ImpactSettings,
}

impl Default for ScatteringConfig {
    fn default() -> Self {
        Self {
            earth_radius: 5000.0,
            rayleigh: AtmosphereLayer::rayleigh(),
            mie: AtmosphereLayer::mie(),
            mie_anisotropy: 0.7,
            optical_depth_samples: 50,
            in_scattering_samples: 30,
            lut_resolution: 128,
            eye_step_size: 0.1,
            light_step_size: 0.25,
            light_sample_count: 6,
            max_distance: 1000.0,
            blend_factor: 0.5,
            downscale: 1,
            mode: ScatteringMode::Precomputed,
            clouds: CloudConfig::default(),
            noise: NoiseSettings::default(),
            impacts: ImpactSettings::default(),
        }
    }
}

impl ScatteringConfig {
    /// Copy with every value clamped into its documented range.
    ///
    /// Each adjusted field is logged as a warning.
    pub fn sanitized(&self) -> Self {
        let mut c = self.clone();

        c.earth_radius = clamp_f32("earth_radius", c.earth_radius, 1.0, f32::MAX);
        sanitize_layer("rayleigh", &mut c.rayleigh);
        sanitize_layer("mie", &mut c.mie);
        c.mie_anisotropy = clamp_f32("mie_anisotropy", c.mie_anisotropy, 0.0, 1.0);
        c.optical_depth_samples = clamp_u32("optical_depth_samples", c.optical_depth_samples, 1, 100);
        c.in_scattering_samples = clamp_u32("in_scattering_samples", c.in_scattering_samples, 1, 50);
        c.lut_resolution = clamp_u32("lut_resolution", c.lut_resolution, 2, 1024);
        c.eye_step_size = clamp_f32("eye_step_size", c.eye_step_size, 1e-3, f32::MAX);
        c.light_step_size = clamp_f32("light_step_size", c.light_step_size, 1e-3, f32::MAX);
        c.light_sample_count = clamp_u32("light_sample_count", c.light_sample_count, 1, 64);
        c.max_distance = clamp_f32("max_distance", c.max_distance, 1e-3, f32::MAX);
        c.blend_factor = clamp_f32("blend_factor", c.blend_factor, 0.0, 1.0);
        c.downscale = clamp_u32("downscale", c.downscale, 1, 4);

        c.clouds.noise_tiling = clamp_f32("clouds.noise_tiling", c.clouds.noise_tiling, 1e-3, f32::MAX);
        c.clouds.density_multiplier =
            clamp_f32("clouds.density_multiplier", c.clouds.density_multiplier, 0.0, f32::MAX);
        c.clouds.absorption = clamp_f32("clouds.absorption", c.clouds.absorption, 0.0, f32::MAX);
        c.clouds.impact_density = clamp_f32("clouds.impact_density", c.clouds.impact_density, 0.0, f32::MAX);
        if !c.clouds.bounds.is_valid() {
            log::warn!("clouds.bounds {:?} has no volume, disabling noise", c.clouds.bounds);
            c.clouds.bounds = Aabb::default();
        }

        c.impacts.capacity = clamp_usize("impacts.capacity", c.impacts.capacity, 1, usize::MAX);
        c.impacts.lifetime = clamp_f32("impacts.lifetime", c.impacts.lifetime, 0.0, f32::MAX);
        c.impacts.target_radius = clamp_f32("impacts.target_radius", c.impacts.target_radius, 0.0, f32::MAX);

        c
    }

    /// The parameter stamp the optical depth table is baked for.
    pub fn bake_params(&self) -> AtmosphereParams {
        AtmosphereParams {
            earth_radius: self.earth_radius,
            rayleigh: self.rayleigh.profile(),
            mie: self.mie.profile(),
            sample_count: self.optical_depth_samples,
            resolution: self.lut_resolution,
        }
    }

    /// Save as pretty JSON, creating parent directories.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON. Missing fields take their defaults.
    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn sanitize_layer(name: &str, layer: &mut AtmosphereLayer) {
    layer.thickness = clamp_f32(&format!("{name}.thickness"), layer.thickness, 1e-3, f32::MAX);
    layer.density_falloff = clamp_f32(&format!("{name}.density_falloff"), layer.density_falloff, 1.0, 10.0);
    layer.density_multiplier =
        clamp_f32(&format!("{name}.density_multiplier"), layer.density_multiplier, 0.0, 3.0);
    layer.absorption = clamp_f32(&format!("{name}.absorption"), layer.absorption, 0.0, 1.0);
    layer.channel_split = clamp_f32(&format!("{name}.channel_split"), layer.channel_split, 0.0, 1.0);
    for (i, w) in layer.scatter_weight.iter_mut().enumerate() {
        *w = clamp_f32(&format!("{name}.scatter_weight[{i}]"), *w, 0.0, f32::MAX);
    }
    for (i, t) in layer.tint.iter_mut().enumerate() {
        *t = clamp_f32(&format!("{name}.tint[{i}]"), *t, 0.0, f32::MAX);
    }
}

fn clamp_f32(name: &str, value: f32, min: f32, max: f32) -> f32 {
    let clamped = if value.is_nan() { min } else { value.clamp(min, max) };
    if clamped != value {
        log::warn!("Config {name} = {value} out of range, using {clamped}");
    }
    clamped
}

fn clamp_usize(name: &str, value: usize, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min, max);
    if clamped != value {
        log::warn!("Config {name} = {value} out of range, using {clamped}");
    }
    clamped
}

fn clamp_u32(name: &str, value: u32, min: u32, max: u32) -> u32 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        log::warn!("Config {name} = {value} out of range, using {clamped}");
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let c = ScatteringConfig::default();
        assert_eq!(c.earth_radius, 5000.0);
        assert_eq!(c.rayleigh.thickness, 100.0);
        assert_eq!(c.mie.thickness, 20.0);
        assert_eq!(c.mie_anisotropy, 0.7);
        assert_eq!(c.optical_depth_samples, 50);
        assert_eq!(c.in_scattering_samples, 30);
        assert_eq!(c.lut_resolution, 128);
        assert_eq!(c.blend_factor, 0.5);
        assert_eq!(c.downscale, 1);
        assert_eq!(c.impacts.capacity, 10);
        assert_eq!(c.mode, ScatteringMode::Precomputed);
    }

    #[test]
    fn test_default_config_is_already_sane() {
        let c = ScatteringConfig::default();
        assert_eq!(c.sanitized(), c);
    }

    #[test]
    fn test_sanitized_clamps_ranges() {
        let mut c = ScatteringConfig::default();
        c.optical_depth_samples = 0;
        c.in_scattering_samples = 500;
        c.downscale = 9;
        c.blend_factor = -1.0;
        c.mie_anisotropy = 1.5;
        c.rayleigh.density_falloff = 0.0;
        c.mie.density_multiplier = 8.0;
        c.rayleigh.absorption = f32::NAN;
        c.eye_step_size = 0.0;

        let s = c.sanitized();
        assert_eq!(s.optical_depth_samples, 1);
        assert_eq!(s.in_scattering_samples, 50);
        assert_eq!(s.downscale, 4);
        assert_eq!(s.blend_factor, 0.0);
        assert_eq!(s.mie_anisotropy, 1.0);
        assert_eq!(s.rayleigh.density_falloff, 1.0);
        assert_eq!(s.mie.density_multiplier, 3.0);
        assert_eq!(s.rayleigh.absorption, 0.0);
        assert!(s.eye_step_size > 0.0);
    }

    #[test]
    fn test_sanitized_clamps_impact_settings() {
        let mut c = ScatteringConfig::default();
        c.impacts.capacity = 0;
        c.impacts.lifetime = -2.0;
        c.impacts.target_radius = -3.0;

        let s = c.sanitized();
        assert_eq!(s.impacts.capacity, 1);
        assert_eq!(s.impacts.lifetime, 0.0);
        assert_eq!(s.impacts.target_radius, 0.0);

        c.impacts.lifetime = f32::NAN;
        assert_eq!(c.sanitized().impacts.lifetime, 0.0);
    }

    #[test]
    fn test_bake_params_ignore_shading_only_fields() {
        let a = ScatteringConfig::default();
        let mut b = a.clone();
        b.rayleigh.tint = [2.0, 0.5, 0.5];
        b.mie.absorption = 0.9;
        b.blend_factor = 1.0;
        assert_eq!(a.bake_params(), b.bake_params());

        b.rayleigh.thickness = 150.0;
        assert_ne!(a.bake_params(), b.bake_params());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/scattering.json");

        let mut c = ScatteringConfig::default();
        c.earth_radius = 6371.0;
        c.mode = ScatteringMode::Realtime;
        c.noise.seed = 42;
        c.save_json(&path).unwrap();

        let loaded = ScatteringConfig::load_json(&path).unwrap();
        assert_eq!(loaded, c);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "downscale": 2, "rayleigh": { "thickness": 30.0 } }"#).unwrap();

        let c = ScatteringConfig::load_json(&path).unwrap();
        assert_eq!(c.downscale, 2);
        assert_eq!(c.rayleigh.thickness, 30.0);
        assert_eq!(c.earth_radius, 5000.0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = ScatteringConfig::load_json(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, crate::core::Error::Io(_)));
    }
}
