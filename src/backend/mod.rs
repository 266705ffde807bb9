//! Backend abstraction layer
//!
//! Provides the workgroup execution model the kernels are written against and
//! the CPU backends that run it.

pub mod parallel;
pub mod serial;
pub mod shared;
pub mod traits;
pub mod types;

pub use parallel::ParallelBackend;
pub use serial::SerialBackend;
pub use shared::{SharedAppendList, SharedDepthRange};
pub use traits::*;
pub use types::*;

use crate::BackendType;

/// Backend wrapper to select an implementation at runtime
#[derive(Debug)]
pub enum CpuBackend {
    Serial(SerialBackend),
    Parallel(ParallelBackend),
}

impl CpuBackend {
    pub fn new(backend_type: BackendType) -> Self {
        match backend_type {
            BackendType::Serial => CpuBackend::Serial(SerialBackend::new()),
            BackendType::Parallel => CpuBackend::Parallel(ParallelBackend::new()),
        }
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        match self {
            CpuBackend::Serial(b) => b.name(),
            CpuBackend::Parallel(b) => b.name(),
        }
    }

    fn dispatch<K: ComputeKernel>(
        &self,
        kernel: &K,
        size: DispatchSize,
    ) -> BackendResult<DispatchStats> {
        match self {
            CpuBackend::Serial(b) => b.dispatch(kernel, size),
            CpuBackend::Parallel(b) => b.dispatch(kernel, size),
        }
    }
}
