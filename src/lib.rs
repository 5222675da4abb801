//! Nimbus - Volumetric cloud and planetary atmosphere scattering core

pub mod core;
pub mod math;
pub mod atmosphere;
pub mod clouds;
pub mod render;
