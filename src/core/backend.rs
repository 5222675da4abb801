//! Parallel compute backend.
//!
//! Every heavy stage (noise generation, optical depth bake, per-pixel march)
//! is dispatched onto one shared rayon pool. A dispatch blocks the caller
//! until all of its work has finished, so results are always complete when
//! the next stage reads them.

use std::sync::Arc;

use crate::core::{Error, Result};

/// Shared handle to the worker pool. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct ComputeBackend {
    pool: Arc<rayon::ThreadPool>,
}

impl ComputeBackend {
    /// Build the worker pool.
    ///
    /// `threads = None` lets rayon pick one worker per logical core. This is
    /// the only fatal error the core reports, and it happens at setup.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("nimbus-compute-{i}"));
        if let Some(n) = threads {
            if n == 0 {
                return Err(Error::Backend("thread count must be at least 1".to_string()));
            }
            builder = builder.num_threads(n);
        }

        let pool = builder
            .build()
            .map_err(|e| Error::Backend(e.to_string()))?;

        log::info!("Compute backend ready with {} worker(s)", pool.current_num_threads());

        Ok(Self { pool: Arc::new(pool) })
    }

    /// Run `work` inside the pool and wait for it to complete.
    pub fn dispatch<R, F>(&self, work: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(work)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }
}
