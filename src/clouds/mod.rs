//! Cloud volume inputs: density noise, animated impacts and the phase table.

pub mod curve;
pub mod impacts;
pub mod noise_field;
pub mod phase_table;

// Re-exports
pub use curve::{EasingCurve, KeyframeCurve};
pub use impacts::{DensityImpact, ImpactBuffer, ImpactRecord, ImpactSettings, SharedImpactBuffer};
pub use noise_field::{DensityGrid, NoiseDimension, NoiseField, NoiseSettings, MIN_NOISE_RESOLUTION};
pub use phase_table::PhaseFunctionTable;
