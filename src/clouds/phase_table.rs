//! Tabulated cloud phase function.
//!
//! 256 scalar weights indexed by scattering angle: index 255 is forward
//! scattering (`cos θ = 1`), index 0 is back scattering (`cos θ = -1`), with
//! the angle spaced linearly in between.

use serde::{Deserialize, Serialize};

use crate::atmosphere::phase::henyey_greenstein;
use crate::core::{Error, Result};

/// Entries in a phase table.
pub const PHASE_TABLE_SIZE: usize = 256;

/// Default forward-scattering anisotropy for the generated table.
pub const DEFAULT_ANISOTROPY: f32 = 0.6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct PhaseFunctionTable {
    values: [f32; PHASE_TABLE_SIZE],
}

impl PhaseFunctionTable {
    /// Build from exactly 256 values, clamped to `[0, 1]`.
    pub fn from_values(values: &[f32]) -> Result<Self> {
        if values.len() != PHASE_TABLE_SIZE {
            return Err(Error::InvalidPhaseTable(format!(
                "expected {PHASE_TABLE_SIZE} entries, got {}",
                values.len()
            )));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidPhaseTable(format!("entry {i} is not finite")));
        }

        let mut table = [0.0; PHASE_TABLE_SIZE];
        for (dst, src) in table.iter_mut().zip(values) {
            *dst = src.clamp(0.0, 1.0);
        }
        Ok(Self { values: table })
    }

    /// Tabulate `f(cos θ)` at every index, normalized so the peak is 1.
    pub fn from_fn(f: impl Fn(f32) -> f32) -> Self {
        let mut values = [0.0; PHASE_TABLE_SIZE];
        for (i, v) in values.iter_mut().enumerate() {
            let v_f = f(index_to_cos(i));
            *v = if v_f.is_finite() { v_f.max(0.0) } else { 0.0 };
        }

        let peak = values.iter().cloned().fold(0.0, f32::max);
        if peak > 0.0 {
            for v in values.iter_mut() {
                *v /= peak;
            }
        }
        Self { values }
    }

    /// Normalize captured distances into weights: `clamp(d / reference, 0, 1)`.
    ///
    /// Non-finite distances read as zero.
    pub fn from_distances(distances: &[f32], reference: f32) -> Result<Self> {
        if !(reference > 0.0) || !reference.is_finite() {
            return Err(Error::InvalidPhaseTable(format!(
                "reference distance must be positive, got {reference}"
            )));
        }
        let weights: Vec<f32> = distances
            .iter()
            .map(|d| if d.is_finite() { d / reference } else { 0.0 })
            .collect();
        Self::from_values(&weights)
    }

    /// Henyey-Greenstein lobe with anisotropy `g`, peak normalized to 1.
    pub fn henyey_greenstein(g: f32) -> Self {
        let g = g.clamp(-0.99, 0.99);
        Self::from_fn(|cos| henyey_greenstein(cos, g))
    }

    /// Weight for a scattering angle given as its cosine.
    ///
    /// NaN is treated as forward scattering.
    #[inline]
    pub fn lookup(&self, cos_theta: f32) -> f32 {
        self.values[cos_to_index(cos_theta)]
    }

    /// Entry `i`, clamped to the table.
    #[inline]
    pub fn value(&self, index: usize) -> f32 {
        self.values[index.min(PHASE_TABLE_SIZE - 1)]
    }

    pub fn values(&self) -> &[f32; PHASE_TABLE_SIZE] {
        &self.values
    }
}

impl Default for PhaseFunctionTable {
    fn default() -> Self {
        Self::henyey_greenstein(DEFAULT_ANISOTROPY)
    }
}

impl TryFrom<Vec<f32>> for PhaseFunctionTable {
    type Error = Error;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        Self::from_values(&values)
    }
}

impl From<PhaseFunctionTable> for Vec<f32> {
    fn from(table: PhaseFunctionTable) -> Self {
        table.values.to_vec()
    }
}

/// `round((1 - acos(cos θ) / π) × 255)`, clamped to the table.
#[inline]
pub fn cos_to_index(cos_theta: f32) -> usize {
    let cos = if cos_theta.is_nan() { 1.0 } else { cos_theta.clamp(-1.0, 1.0) };
    let t = 1.0 - cos.acos() / std::f32::consts::PI;
    let i = (t * (PHASE_TABLE_SIZE - 1) as f32).round();
    (i.max(0.0) as usize).min(PHASE_TABLE_SIZE - 1)
}

/// Scattering cosine at the centre of index `i`.
#[inline]
fn index_to_cos(i: usize) -> f32 {
    let t = i as f32 / (PHASE_TABLE_SIZE - 1) as f32;
    ((1.0 - t) * std::f32::consts::PI).cos()
}
