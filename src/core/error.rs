//! Error types for the scattering core

use thiserror::Error;

/// Main error type for the crate
///
/// Only setup, configuration loading and table/curve construction return
/// these. Per-frame work absorbs its failures and degrades to a pass-through.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid resolution {requested} (minimum is {minimum})")]
    InvalidResolution { requested: u32, minimum: u32 },

    #[error("Invalid phase table: {0}")]
    InvalidPhaseTable(String),

    #[error("Invalid curve: {0}")]
    InvalidCurve(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Compute backend unavailable: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
