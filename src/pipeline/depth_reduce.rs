//! Per-tile depth reduction
//!
//! One workgroup per tile, one invocation per pixel. The leader resets the
//! shared range, every invocation folds its sample in with atomic min/max,
//! and the leader publishes the packed range.

use crate::backend::{ComputeKernel, DispatchSize, Invocation, SharedDepthRange, WorkgroupSize};
use crate::packing::quantize_depth;
use crate::resources::{DepthImage, StorageBuffer};
use crate::{DepthMode, TiledConfig};
use bytemuck::{Pod, Zeroable};
use glam::UVec2;

const PHASE_INIT: usize = 0;
const PHASE_REDUCE: usize = 1;
const PHASE_STORE: usize = 2;

/// Reduces a depth image to one packed [`DepthRange`](crate::DepthRange) per tile.
pub struct DepthReduceKernel<'a> {
    depth: &'a DepthImage,
    output: &'a StorageBuffer,
    tile_size: u32,
    mode: DepthMode,
}

impl<'a> DepthReduceKernel<'a> {
    /// `output` needs one word per tile of the grid covering `depth`.
    pub fn new(depth: &'a DepthImage, output: &'a StorageBuffer, config: &TiledConfig) -> Self {
        Self {
            depth,
            output,
            tile_size: config.tile_size,
            mode: config.depth_mode,
        }
    }

    pub fn dispatch_size(&self) -> DispatchSize {
        DispatchSize::covering(self.depth.width(), self.depth.height(), self.workgroup_size())
    }

    /// Quantized sample for one pixel, `None` when it must not contribute.
    fn sample(&self, coord: UVec2) -> Option<u16> {
        let depth = self.depth.load(coord)?;
        match self.mode {
            DepthMode::Hardware => Some(quantize_depth(depth)),
            // Zero means nothing was rendered there
            DepthMode::Linear if depth > 0.0 => Some(quantize_depth(depth)),
            DepthMode::Linear => None,
        }
    }
}

impl ComputeKernel for DepthReduceKernel<'_> {
    type Shared = SharedDepthRange;
    type Local = ();

    fn label(&self) -> &str {
        "Tile Depth Reduce"
    }

    fn workgroup_size(&self) -> WorkgroupSize {
        WorkgroupSize::square(self.tile_size)
    }

    fn phase_count(&self) -> usize {
        3
    }

    fn create_shared(&self) -> SharedDepthRange {
        SharedDepthRange::default()
    }

    fn run_phase(
        &self,
        phase: usize,
        invocation: &Invocation,
        shared: &SharedDepthRange,
        _local: &mut (),
    ) {
        match phase {
            PHASE_INIT => {
                if invocation.is_leader() {
                    shared.reset();
                }
            }
            PHASE_REDUCE => {
                if let Some(depth) = self.sample(invocation.global_id) {
                    shared.include(depth);
                }
            }
            PHASE_STORE => {
                if invocation.is_leader() {
                    self.output
                        .store(invocation.workgroup_index(), shared.load().pack());
                }
            }
            _ => {}
        }
    }
}

/// Uniform block of [`TILE_DEPTH_SHADER`]
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DepthReduceUniforms {
    pub viewport_size: [u32; 2],
    /// 0 = hardware, 1 = linear
    pub depth_mode: u32,
    pub _padding: u32,
}

impl DepthReduceUniforms {
    pub fn new(viewport_size: UVec2, mode: DepthMode) -> Self {
        Self {
            viewport_size: viewport_size.to_array(),
            depth_mode: match mode {
                DepthMode::Hardware => 0,
                DepthMode::Linear => 1,
            },
            _padding: 0,
        }
    }
}

/// WGSL version of [`DepthReduceKernel`]; specialize with [`crate::shader::specialize`].
pub const TILE_DEPTH_SHADER: &str = r#"
struct ReduceUniforms {
    viewport_size: vec2<u32>,
    depth_mode: u32,
    _padding: u32,
}

@group(0) @binding(0) var<uniform> params: ReduceUniforms;
@group(0) @binding(1) var depth_image: texture_2d<f32>;
@group(0) @binding(2) var<storage, read_write> tile_depth: array<u32>;

var<workgroup> min_depth: atomic<u32>;
var<workgroup> max_depth: atomic<u32>;

@compute @workgroup_size({{TILE_SIZE}}, {{TILE_SIZE}}, 1)
fn main(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(local_invocation_index) local_idx: u32,
    @builtin(workgroup_id) workgroup_id: vec3<u32>,
    @builtin(num_workgroups) num_workgroups: vec3<u32>,
) {
    if local_idx == 0u {
        atomicStore(&min_depth, 0xffffu);
        atomicStore(&max_depth, 0u);
    }
    workgroupBarrier();

    let coord = global_id.xy;
    if all(coord < params.viewport_size) {
        let depth = textureLoad(depth_image, vec2<i32>(coord), 0).r;
        // Linear depth of zero marks pixels without geometry
        if params.depth_mode == 0u || depth > 0.0 {
            let quantized = u32(round(clamp(depth, 0.0, 1.0) * 65535.0));
            atomicMin(&min_depth, quantized);
            atomicMax(&max_depth, quantized);
        }
    }
    workgroupBarrier();

    if local_idx == 0u {
        let tile_id = workgroup_id.x + num_workgroups.x * workgroup_id.y;
        tile_depth[tile_id] = (atomicLoad(&max_depth) << 16u) | atomicLoad(&min_depth);
    }
}
"#;
