//! Dirty-checked cache around the optical depth bake.
//!
//! The cache remembers the parameters of the last bake. Asking for a table
//! with identical parameters returns the existing one; any field change
//! triggers exactly one rebake. Bakes are serialized: a caller that arrives
//! while another thread is baking waits for it and then reuses its result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::atmosphere::config::AtmosphereParams;
use crate::atmosphere::optical_depth::OpticalDepthTable;
use crate::core::ComputeBackend;

/// Shared cache of the current optical depth table.
///
/// Readers hold an `Arc` to the table they were handed, so a rebake swaps in
/// a new table without disturbing evaluations already in flight.
pub struct OpticalDepthCache {
    backend: ComputeBackend,
    current: Mutex<Option<Arc<OpticalDepthTable>>>,
    bake_count: AtomicU64,
}

impl OpticalDepthCache {
    /// Create an empty cache. Nothing is baked until first use.
    pub fn new(backend: ComputeBackend) -> Self {
        Self {
            backend,
            current: Mutex::new(None),
            bake_count: AtomicU64::new(0),
        }
    }

    /// Return a table baked for exactly `params`, baking it if needed.
    pub fn ensure_baked(&self, params: &AtmosphereParams) -> Arc<OpticalDepthTable> {
        // Held across the bake: one bake in flight, later callers wait.
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(table) = current.as_ref() {
            if table.is_valid_for(params) {
                return Arc::clone(table);
            }
            log::debug!(
                "Optical depth table stale, changed: {:?}",
                table.params().changed_fields(params)
            );
        }

        let start = Instant::now();
        let table = Arc::new(OpticalDepthTable::bake(params, &self.backend));
        let count = self.bake_count.fetch_add(1, Ordering::AcqRel) + 1;
        log::info!(
            "Optical depth bake #{} ({}x{}, {} samples) took {:.2}ms",
            count,
            table.resolution(),
            table.resolution(),
            params.sample_count,
            start.elapsed().as_secs_f64() * 1000.0
        );

        *current = Some(Arc::clone(&table));
        table
    }

    /// The most recently baked table, without checking it against anything.
    pub fn current(&self) -> Option<Arc<OpticalDepthTable>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the cached table matches `params`.
    pub fn is_fresh(&self, params: &AtmosphereParams) -> bool {
        self.current().is_some_and(|t| t.is_valid_for(params))
    }

    /// Drop the cached table so the next call rebakes.
    pub fn invalidate(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Total number of bakes performed.
    pub fn bake_count(&self) -> u64 {
        self.bake_count.load(Ordering::Acquire)
    }
}
