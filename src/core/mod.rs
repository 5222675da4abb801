//! Core types and utilities shared by every stage of the scattering core

pub mod types;
pub mod error;
pub mod logging;
pub mod backend;

pub use types::*;
pub use error::Error;
pub use backend::ComputeBackend;
