//! Common types shared between backends

use glam::UVec2;
use std::time::Duration;

/// Largest workgroup a backend accepts, matching the common GPU limit.
pub const MAX_WORKGROUP_INVOCATIONS: u32 = 1024;

/// Number of cooperating invocations in one workgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Square workgroup, one invocation per pixel of a tile.
    pub const fn square(edge: u32) -> Self {
        Self { x: edge, y: edge }
    }

    pub const fn invocations(&self) -> u32 {
        self.x * self.y
    }

    pub fn as_uvec2(&self) -> UVec2 {
        UVec2::new(self.x, self.y)
    }
}

/// Number of workgroups launched by one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchSize {
    pub x: u32,
    pub y: u32,
}

impl DispatchSize {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Enough workgroups to cover a `width` x `height` grid of invocations.
    pub fn covering(width: u32, height: u32, workgroup: WorkgroupSize) -> Self {
        Self {
            x: width.div_ceil(workgroup.x.max(1)),
            y: height.div_ceil(workgroup.y.max(1)),
        }
    }

    pub const fn workgroup_count(&self) -> u32 {
        self.x * self.y
    }

    pub fn as_uvec2(&self) -> UVec2 {
        UVec2::new(self.x, self.y)
    }

    /// Workgroup id for a linear index, row-major.
    pub fn workgroup_id(&self, index: u32) -> UVec2 {
        UVec2::new(index % self.x, index / self.x)
    }
}

/// Summary of a completed dispatch.
#[derive(Debug, Clone)]
pub struct DispatchStats {
    pub label: String,
    pub workgroups: u32,
    pub invocations: u64,
    pub elapsed: Duration,
}
