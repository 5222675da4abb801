//! Atmosphere layer configuration and the bake parameter stamp.

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;

// ---------------------------------------------------------------------------
// AtmosphereLayer
// ---------------------------------------------------------------------------

/// One exponential-density scattering shell around the planet.
///
/// The crate uses two: a Rayleigh-like molecular layer and a Mie-like
/// aerosol layer. Only [`profile`](Self::profile) feeds the optical depth
/// bake; absorption, channel weights and tint are applied at evaluation time
/// so changing them never forces a rebake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtmosphereLayer {
    /// Whether this layer contributes to the frame at all.
    pub enabled: bool,
    /// Height of the shell above the ground, in world units.
    pub thickness: f32,
    /// Exponential falloff rate (1-10).
    pub density_falloff: f32,
    /// Density scale at ground level (0-3).
    pub density_multiplier: f32,
    /// Uniform absorption coefficient (0-1).
    pub absorption: f32,
    /// Per-channel scattering weight (linear RGB).
    pub scatter_weight: [f32; 3],
    /// Blend between uniform absorption (0) and per-channel weights (1).
    pub channel_split: f32,
    /// In-scattering tint (linear RGB, HDR allowed).
    pub tint: [f32; 3],
}

impl AtmosphereLayer {
    /// Molecular layer defaults: tall shell, blue-weighted absorption.
    pub fn rayleigh() -> Self {
        Self {
            enabled: true,
            thickness: 100.0,
            density_falloff: 1.0,
            density_multiplier: 1.0,
            absorption: 0.1,
            scatter_weight: [0.01, 0.03, 0.08],
            channel_split: 1.0,
            tint: [1.0, 1.0, 1.0],
        }
    }

    /// Aerosol layer defaults: thin shell, grey absorption.
    pub fn mie() -> Self {
        Self {
            enabled: true,
            thickness: 20.0,
            density_falloff: 1.0,
            density_multiplier: 1.0,
            absorption: 0.1,
            scatter_weight: [1.0, 1.0, 1.0],
            channel_split: 0.0,
            tint: [1.0, 1.0, 1.0],
        }
    }

    /// The subset of this layer that shapes its density curve.
    pub fn profile(&self) -> LayerProfile {
        LayerProfile {
            thickness: self.thickness,
            density_falloff: self.density_falloff,
            density_multiplier: self.density_multiplier,
        }
    }

    /// Per-channel extinction coefficient.
    ///
    /// `absorption * mix(1, scatter_weight, channel_split)`; zero when the
    /// layer is disabled.
    pub fn extinction(&self) -> Vec3 {
        if !self.enabled {
            return Vec3::ZERO;
        }
        let weight = Vec3::ONE.lerp(Vec3::from(self.scatter_weight), self.channel_split);
        (weight * self.absorption).max(Vec3::ZERO)
    }
}

impl Default for AtmosphereLayer {
    fn default() -> Self {
        Self::rayleigh()
    }
}

// ---------------------------------------------------------------------------
// LayerProfile
// ---------------------------------------------------------------------------

/// Density curve of a single layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerProfile {
    pub thickness: f32,
    pub density_falloff: f32,
    pub density_multiplier: f32,
}

impl LayerProfile {
    /// `multiplier * exp(-h / thickness * falloff)` inside `[0, thickness]`,
    /// zero outside the shell and below the ground.
    #[inline]
    pub fn density_at(&self, height: f32) -> f32 {
        if self.thickness <= 0.0 || height < 0.0 || height > self.thickness {
            return 0.0;
        }
        let d = self.density_multiplier * (-height / self.thickness * self.density_falloff).exp();
        d.max(0.0)
    }
}

// ---------------------------------------------------------------------------
// AtmosphereParams
// ---------------------------------------------------------------------------

/// Everything an optical depth bake depends on.
///
/// A baked table is valid for exactly one value of this struct. Equality is
/// the field-by-field comparison used for dirty checking.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AtmosphereParams {
    pub earth_radius: f32,
    pub rayleigh: LayerProfile,
    pub mie: LayerProfile,
    /// Integration steps per texel (1-100).
    pub sample_count: u32,
    /// Texels per table axis.
    pub resolution: u32,
}

impl AtmosphereParams {
    /// Height of the outermost shell above the ground.
    pub fn top_height(&self) -> f32 {
        self.rayleigh.thickness.max(self.mie.thickness).max(0.0)
    }

    /// Planet centre in world space; the ground sits at `y = 0` above it.
    pub fn planet_center(&self) -> Vec3 {
        Vec3::new(0.0, -self.earth_radius, 0.0)
    }

    /// Names of the fields that differ between `self` and `other`.
    pub fn changed_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.earth_radius != other.earth_radius {
            changed.push("earth_radius");
        }
        if self.rayleigh.thickness != other.rayleigh.thickness {
            changed.push("rayleigh.thickness");
        }
        if self.rayleigh.density_falloff != other.rayleigh.density_falloff {
            changed.push("rayleigh.density_falloff");
        }
        if self.rayleigh.density_multiplier != other.rayleigh.density_multiplier {
            changed.push("rayleigh.density_multiplier");
        }
        if self.mie.thickness != other.mie.thickness {
            changed.push("mie.thickness");
        }
        if self.mie.density_falloff != other.mie.density_falloff {
            changed.push("mie.density_falloff");
        }
        if self.mie.density_multiplier != other.mie.density_multiplier {
            changed.push("mie.density_multiplier");
        }
        if self.sample_count != other.sample_count {
            changed.push("sample_count");
        }
        if self.resolution != other.resolution {
            changed.push("resolution");
        }
        changed
    }
}

impl Default for AtmosphereParams {
    fn default() -> Self {
        Self {
            earth_radius: 5000.0,
            rayleigh: AtmosphereLayer::rayleigh().profile(),
            mie: AtmosphereLayer::mie().profile(),
            sample_count: 50,
            resolution: 128,
        }
    }
}
