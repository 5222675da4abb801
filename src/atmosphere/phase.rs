//! Analytic phase functions for the two atmosphere layers.

use std::f32::consts::PI;

/// Rayleigh phase: `3 / (16π) · (1 + cos²θ)`.
#[inline]
pub fn rayleigh_phase(cos_angle: f32) -> f32 {
    3.0 / (16.0 * PI) * (1.0 + cos_angle * cos_angle)
}

/// Cornette-Shanks approximation of Mie scattering with anisotropy `g`.
#[inline]
pub fn mie_phase(cos_angle: f32, g: f32) -> f32 {
    let g = g.clamp(-0.999, 0.999);
    let g2 = g * g;
    let num = 3.0 * (1.0 - g2) * (1.0 + cos_angle * cos_angle);
    let denom = 8.0 * PI * (2.0 + g2) * (1.0 + g2 - 2.0 * g * cos_angle).max(1e-6).powf(1.5);
    num / denom
}

/// Henyey-Greenstein phase with anisotropy `g`.
#[inline]
pub fn henyey_greenstein(cos_angle: f32, g: f32) -> f32 {
    let g = g.clamp(-0.999, 0.999);
    let g2 = g * g;
    let denom = (1.0 + g2 - 2.0 * g * cos_angle).max(1e-6).powf(1.5);
    (1.0 - g2) / (4.0 * PI * denom)
}
