//! Multi-threaded backend
//!
//! Workgroups are independent, so each one becomes a rayon task. Inside a
//! workgroup the phases still run in order on the task's thread.

use crate::backend::traits::*;
use crate::backend::types::*;
use rayon::prelude::*;
use std::time::Instant;

/// Backend spreading workgroups across a rayon thread pool.
pub struct ParallelBackend {
    /// Dedicated pool; `None` uses the global rayon pool.
    pool: Option<rayon::ThreadPool>,
}

impl ParallelBackend {
    /// Use the global rayon pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Use a dedicated pool with `threads` workers.
    pub fn with_threads(threads: usize) -> BackendResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tiled-lighting-{i}"))
            .build()
            .map_err(|e| BackendError::ThreadPool(e.to_string()))?;
        log::trace!("ParallelBackend: created pool with {} threads", threads);
        Ok(Self { pool: Some(pool) })
    }

    pub fn thread_count(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

impl Default for ParallelBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParallelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBackend")
            .field("threads", &self.thread_count())
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

impl ComputeBackend for ParallelBackend {
    fn name(&self) -> &'static str {
        "Parallel"
    }

    fn dispatch<K: ComputeKernel>(
        &self,
        kernel: &K,
        size: DispatchSize,
    ) -> BackendResult<DispatchStats> {
        validate_dispatch(kernel, size)?;

        let start = Instant::now();
        let num_workgroups = size.as_uvec2();
        let run = || {
            (0..size.workgroup_count())
                .into_par_iter()
                .for_each(|index| run_workgroup(kernel, size.workgroup_id(index), num_workgroups));
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }

        let stats = DispatchStats {
            label: kernel.label().to_string(),
            workgroups: size.workgroup_count(),
            invocations: size.workgroup_count() as u64
                * kernel.workgroup_size().invocations() as u64,
            elapsed: start.elapsed(),
        };
        log_dispatch(self.name(), &stats);
        Ok(stats)
    }
}
