//! Two-layer planetary atmosphere.
//!
//! A Rayleigh-like and a Mie-like exponential shell share one precomputed
//! optical depth table. [`OpticalDepthCache`] hands out that table and
//! rebakes it only when the bake parameters change.

pub mod cache;
pub mod config;
pub mod optical_depth;
pub mod phase;

// Re-exports
pub use cache::OpticalDepthCache;
pub use config::{AtmosphereLayer, AtmosphereParams, LayerProfile};
pub use optical_depth::{LayerDepths, OpticalDepthTable, OCCLUDED};
