//! Single-threaded backend
//!
//! Runs workgroups one after another in row-major order. Useful as a
//! deterministic reference and for debugging kernels.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::time::Instant;

#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl SerialBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for SerialBackend {
    fn name(&self) -> &'static str {
        "Serial"
    }

    fn dispatch<K: ComputeKernel>(
        &self,
        kernel: &K,
        size: DispatchSize,
    ) -> BackendResult<DispatchStats> {
        validate_dispatch(kernel, size)?;

        let start = Instant::now();
        let num_workgroups = size.as_uvec2();
        for index in 0..size.workgroup_count() {
            run_workgroup(kernel, size.workgroup_id(index), num_workgroups);
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
