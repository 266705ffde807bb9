//! Core backend abstraction traits
//!
//! A [`ComputeKernel`] describes one workgroup program as a sequence of
//! phases separated by barriers. Backends decide how workgroups are spread
//! over threads; inside a workgroup every invocation finishes phase `n`
//! before any invocation starts phase `n + 1`.

use crate::backend::types::*;
use glam::UVec2;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Workgroup size {x}x{y} has no invocations")]
    EmptyWorkgroup { x: u32, y: u32 },
    #[error("Workgroup size {x}x{y} exceeds the limit of {max} invocations")]
    WorkgroupTooLarge { x: u32, y: u32, max: u32 },
    #[error("Dispatch has no workgroups")]
    EmptyDispatch,
    #[error("Kernel '{0}' declares no phases")]
    NoPhases(String),
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Built-in ids of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub workgroup_id: UVec2,
    pub local_id: UVec2,
    pub global_id: UVec2,
    pub local_index: u32,
    pub num_workgroups: UVec2,
    pub workgroup_size: UVec2,
}

impl Invocation {
    pub fn new(
        workgroup_id: UVec2,
        local_index: u32,
        workgroup_size: UVec2,
        num_workgroups: UVec2,
    ) -> Self {
        let local_id = UVec2::new(local_index % workgroup_size.x, local_index / workgroup_size.x);
        Self {
            workgroup_id,
            local_id,
            global_id: workgroup_id * workgroup_size + local_id,
            local_index,
            num_workgroups,
            workgroup_size,
        }
    }

    /// Linear workgroup index, `x + num_workgroups.x * y`.
    pub fn workgroup_index(&self) -> usize {
        (self.workgroup_id.x + self.num_workgroups.x * self.workgroup_id.y) as usize
    }

    /// The designated invocation that initializes and publishes shared state.
    pub fn is_leader(&self) -> bool {
        self.local_index == 0
    }

    /// Stride for loops distributed over the whole workgroup.
    pub fn group_stride(&self) -> u32 {
        self.workgroup_size.x * self.workgroup_size.y
    }
}

/// A workgroup program split into barrier-separated phases.
pub trait ComputeKernel: Sync {
    /// Workgroup-shared scratch memory, created fresh for every workgroup.
    type Shared;
    /// Per-invocation registers carried across barriers.
    type Local: Default + Send;

    /// Label for logging
    fn label(&self) -> &str;

    fn workgroup_size(&self) -> WorkgroupSize;

    /// Number of phases; a barrier separates consecutive phases.
    fn phase_count(&self) -> usize;

    fn create_shared(&self) -> Self::Shared;

    fn run_phase(
        &self,
        phase: usize,
        invocation: &Invocation,
        shared: &Self::Shared,
        local: &mut Self::Local,
    );
}

/// Something that can run every workgroup of a dispatch to completion.
pub trait ComputeBackend {
    fn name(&self) -> &'static str;

    /// Run all workgroups; returns once every one has finished.
    fn dispatch<K: ComputeKernel>(
        &self,
        kernel: &K,
        size: DispatchSize,
    ) -> BackendResult<DispatchStats>;
}

/// Reject dispatches no GPU would accept.
pub fn validate_dispatch<K: ComputeKernel>(kernel: &K, size: DispatchSize) -> BackendResult<()> {
    let wg = kernel.workgroup_size();
    if wg.invocations() == 0 {
        return Err(BackendError::EmptyWorkgroup { x: wg.x, y: wg.y });
    }
    if wg.invocations() > MAX_WORKGROUP_INVOCATIONS {
        return Err(BackendError::WorkgroupTooLarge {
            x: wg.x,
            y: wg.y,
            max: MAX_WORKGROUP_INVOCATIONS,
        });
    }
    if size.workgroup_count() == 0 {
        return Err(BackendError::EmptyDispatch);
    }
    if kernel.phase_count() == 0 {
        return Err(BackendError::NoPhases(kernel.label().to_string()));
    }
    Ok(())
}

/// Execute one workgroup.
///
/// Invocations run one after another inside a phase and the loop over phases
/// is the barrier. Shared state is only touched through atomics, so the
/// kernel stays correct when invocations of a phase run concurrently.
pub fn run_workgroup<K: ComputeKernel + ?Sized>(
    kernel: &K,
    workgroup_id: UVec2,
    num_workgroups: UVec2,
) {
    let size = kernel.workgroup_size().as_uvec2();
    let count = size.x * size.y;
    let shared = kernel.create_shared();
    let mut locals: Vec<K::Local> = (0..count).map(|_| K::Local::default()).collect();

    for phase in 0..kernel.phase_count() {
        for (local_index, local) in (0..count).zip(locals.iter_mut()) {
            let invocation = Invocation::new(workgroup_id, local_index, size, num_workgroups);
            kernel.run_phase(phase, &invocation, &shared, local);
        }
    }
}

/// Log a finished dispatch.
pub(crate) fn log_dispatch(backend: &str, stats: &DispatchStats) {
    log::debug!(
        "{}: '{}' ran {} workgroups ({} invocations) in {:?}",
        backend,
        stats.label,
        stats.workgroups,
        stats.invocations,
        stats.elapsed
    );
}
