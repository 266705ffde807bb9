//! Per-tile light culling
//!
//! Two strided passes over a tile workgroup, separated by a barrier:
//! - **XY**: every light whose screen quad contains the tile is appended to
//!   the tile's candidate list
//! - **Z**: every candidate whose depth range overlaps the tile's depth range
//!   is appended to the bin of its light type
//!
//! Bins have a fixed capacity. Lights that do not fit are dropped and only
//! counted, never resized for.

use crate::backend::{
    ComputeKernel, DispatchSize, Invocation, SharedAppendList, SharedDepthRange, WorkgroupSize,
};
use crate::error::{TiledError, TiledResult};
use crate::packing::{DepthRange, TileRect};
use crate::resources::StorageBuffer;
use crate::scene::{LightRecord, LightType};
use crate::TiledConfig;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Tile-scoped shared scratch used by the culling phases.
#[derive(Debug)]
pub struct TileBins {
    pub depth: SharedDepthRange,
    /// Lights passing the screen-quad test
    pub xy: SharedAppendList,
    /// Lights also passing the depth test, indexed by [`LightType::bin`]
    pub z: [SharedAppendList; LightType::COUNT],
    /// Candidates whose type flag matched no bin
    pub unknown: AtomicU32,
}

impl TileBins {
    pub fn new(xy_capacity: usize, z_capacity: usize) -> Self {
        Self {
            depth: SharedDepthRange::default(),
            xy: SharedAppendList::new(xy_capacity),
            z: std::array::from_fn(|_| SharedAppendList::new(z_capacity)),
            unknown: AtomicU32::new(0),
        }
    }

    pub fn bin(&self, light_type: LightType) -> &SharedAppendList {
        &self.z[light_type.bin()]
    }
}

/// Culling phases shared by the culling-only and the fused shading kernels.
pub struct LightCuller<'a> {
    lights: &'a [LightRecord],
    tile_depth: &'a StorageBuffer,
}

impl<'a> LightCuller<'a> {
    /// `tile_depth` holds one packed range per workgroup of the dispatch.
    pub fn new(lights: &'a [LightRecord], tile_depth: &'a StorageBuffer) -> Self {
        Self { lights, tile_depth }
    }

    pub fn light(&self, index: u32) -> &'a LightRecord {
        &self.lights[index as usize]
    }

    /// Leader only: load the tile's depth range and empty every bin.
    pub fn begin_tile(&self, invocation: &Invocation, bins: &TileBins) {
        if !invocation.is_leader() {
            return;
        }
        let packed = self.tile_depth.load(invocation.workgroup_index());
        bins.depth.store(DepthRange::unpack(packed));
        bins.xy.reset();
        for bin in &bins.z {
            bin.reset();
        }
        bins.unknown.store(0, Ordering::Relaxed);
    }

    /// Screen-quad test over the whole light list, strided by group size.
    pub fn cull_xy(&self, invocation: &Invocation, bins: &TileBins) {
        let tile = invocation.workgroup_id;
        let stride = invocation.group_stride() as usize;
        for index in (invocation.local_index as usize..self.lights.len()).step_by(stride) {
            if TileRect::unpack(self.lights[index].quad_id).contains(tile) {
                bins.xy.push(index as u32);
            }
        }
    }

    /// Depth test over the XY candidates, strided by group size.
    pub fn cull_z(&self, invocation: &Invocation, bins: &TileBins) {
        let tile_range = bins.depth.load();
        let stride = invocation.group_stride() as usize;
        for slot in (invocation.local_index as usize..bins.xy.len()).step_by(stride) {
            let index = bins.xy.get(slot);
            let light = self.light(index);
            if !light.depth_range().overlaps(&tile_range) {
                continue;
            }
            match light.light_type() {
                Some(light_type) => {
                    bins.bin(light_type).push(index);
                }
                None => {
                    bins.unknown.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Lights dropped or ignored over a whole dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullingStats {
    /// XY candidates that did not fit the candidate list
    pub xy_overflow: u64,
    /// Depth-tested lights that did not fit their type bin
    pub z_overflow: u64,
    /// Lights with a type flag outside the known types
    pub unknown_type: u64,
}

impl CullingStats {
    /// True when some tile lost lights to a full bin.
    pub fn has_overflow(&self) -> bool {
        self.xy_overflow > 0 || self.z_overflow > 0
    }
}

/// Dispatch-wide accumulator for [`CullingStats`].
#[derive(Debug, Default)]
pub struct CullingCounters {
    xy_overflow: AtomicU64,
    z_overflow: AtomicU64,
    unknown_type: AtomicU64,
}

impl CullingCounters {
    /// Add one finished tile. Called by the tile leader after the last barrier.
    pub fn record(&self, bins: &TileBins) {
        let z_overflow: u64 = bins.z.iter().map(|bin| u64::from(bin.overflow())).sum();
        let unknown = u64::from(bins.unknown.load(Ordering::Relaxed));
        self.xy_overflow
            .fetch_add(u64::from(bins.xy.overflow()), Ordering::Relaxed);
        self.z_overflow.fetch_add(z_overflow, Ordering::Relaxed);
        self.unknown_type.fetch_add(unknown, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CullingStats {
        CullingStats {
            xy_overflow: self.xy_overflow.load(Ordering::Relaxed),
            z_overflow: self.z_overflow.load(Ordering::Relaxed),
            unknown_type: self.unknown_type.load(Ordering::Relaxed),
        }
    }
}

/// Culled lights of one tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileLightData {
    /// Lights passing the screen-quad test (kept ones only)
    pub xy_count: u32,
    /// Light indices per type, indexed by [`LightType::bin`]
    pub bins: [Vec<u32>; LightType::COUNT],
}

impl TileLightData {
    /// Words per tile in the output buffer: four counts, then the three bins.
    pub fn record_words(z_capacity: u32) -> usize {
        4 + LightType::COUNT * z_capacity as usize
    }

    pub fn lights(&self, light_type: LightType) -> &[u32] {
        &self.bins[light_type.bin()]
    }

    pub fn total(&self) -> usize {
        self.bins.iter().map(Vec::len).sum()
    }

    /// Decode one tile record: `[xy, directional, point, spot, bins...]`.
    pub fn from_words(words: &[u32], z_capacity: u32) -> TiledResult<Self> {
        let expected = Self::record_words(z_capacity);
        if words.len() != expected {
            return Err(TiledError::BufferSizeMismatch {
                name: "tile light record".into(),
                expected,
                actual: words.len(),
            });
        }
        let capacity = z_capacity as usize;
        let bins = std::array::from_fn(|bin| {
            let count = (words[1 + bin] as usize).min(capacity);
            let start = 4 + bin * capacity;
            words[start..start + count].to_vec()
        });
        Ok(Self {
            xy_count: words[0],
            bins,
        })
    }
}

const PHASE_BEGIN: usize = 0;
const PHASE_XY: usize = 1;
const PHASE_Z: usize = 2;
const PHASE_STORE: usize = 3;

/// Culling-only dispatch writing every tile's bins to a storage buffer.
pub struct LightCullingKernel<'a> {
    culler: LightCuller<'a>,
    output: &'a StorageBuffer,
    counters: CullingCounters,
    tile_size: u32,
    xy_capacity: u32,
    z_capacity: u32,
}

impl<'a> LightCullingKernel<'a> {
    /// `output` needs [`TileLightData::record_words`] words per tile.
    pub fn new(
        lights: &'a [LightRecord],
        tile_depth: &'a StorageBuffer,
        output: &'a StorageBuffer,
        config: &TiledConfig,
    ) -> Self {
        Self {
            culler: LightCuller::new(lights, tile_depth),
            output,
            counters: CullingCounters::default(),
            tile_size: config.tile_size,
            xy_capacity: config.xy_capacity,
            z_capacity: config.z_capacity,
        }
    }

    /// One workgroup per tile of `grid`.
    pub fn dispatch_size(grid: glam::UVec2) -> DispatchSize {
        DispatchSize::new(grid.x, grid.y)
    }

    pub fn stats(&self) -> CullingStats {
        self.counters.stats()
    }

    fn store_tile(&self, invocation: &Invocation, bins: &TileBins) {
        let record = TileLightData::record_words(self.z_capacity);
        let base = invocation.workgroup_index() * record;
        self.output.store(base, bins.xy.len() as u32);
        for (bin, list) in bins.z.iter().enumerate() {
            let indices = list.to_vec();
            self.output.store(base + 1 + bin, indices.len() as u32);
            self.output
                .store_slice(base + 4 + bin * self.z_capacity as usize, &indices);
        }
    }
}

impl ComputeKernel for LightCullingKernel<'_> {
    type Shared = TileBins;
    type Local = ();

    fn label(&self) -> &str {
        "Light Culling"
    }

    fn workgroup_size(&self) -> WorkgroupSize {
        WorkgroupSize::square(self.tile_size)
    }

    fn phase_count(&self) -> usize {
        4
    }

    fn create_shared(&self) -> TileBins {
        TileBins::new(self.xy_capacity as usize, self.z_capacity as usize)
    }

    fn run_phase(&self, phase: usize, invocation: &Invocation, bins: &TileBins, _local: &mut ()) {
        match phase {
            PHASE_BEGIN => self.culler.begin_tile(invocation, bins),
            PHASE_XY => self.culler.cull_xy(invocation, bins),
            PHASE_Z => self.culler.cull_z(invocation, bins),
            PHASE_STORE => {
                if invocation.is_leader() {
                    self.store_tile(invocation, bins);
                    self.counters.record(bins);
                }
            }
            _ => {}
        }
    }
}

/// WGSL version of [`LightCullingKernel`]; specialize with [`crate::shader::specialize`].
pub const LIGHT_CULLING_SHADER: &str = r#"
struct LightRecord {
    value_inv_sqr_radius: vec4<f32>,
    position: vec4<f32>,
    direction: vec4<f32>,
    spot_parameters: vec4<f32>,
    depth: u32,
    flags: u32,
    quad_id: u32,
    _padding: u32,
}

struct CullingUniforms {
    light_count: u32,
    _padding0: u32,
    _padding1: u32,
    _padding2: u32,
}

@group(0) @binding(0) var<uniform> culling: CullingUniforms;
@group(0) @binding(1) var<storage, read> lights: array<LightRecord>;
@group(0) @binding(2) var<storage, read> tile_depth: array<u32>;
@group(0) @binding(3) var<storage, read_write> tile_lights: array<u32>;

var<workgroup> tile_min_depth: u32;
var<workgroup> tile_max_depth: u32;
var<workgroup> xy_count: atomic<u32>;
var<workgroup> xy_lights: array<u32, {{XY_CAPACITY}}>;
var<workgroup> z_count: array<atomic<u32>, 3>;
var<workgroup> z_lights: array<array<u32, {{Z_CAPACITY}}>, 3>;

// Half-open [min, max) test on both axes
fn quad_contains(quad_id: u32, tile: vec2<u32>) -> bool {
    let quad = vec4<u32>(
        quad_id & 0xffu,
        (quad_id >> 8u) & 0xffu,
        (quad_id >> 16u) & 0xffu,
        (quad_id >> 24u) & 0xffu,
    );
    let t = tile.xxyy < quad;
    let inside = t & !t.yxwz;
    return inside.y && inside.w;
}

fn depth_overlaps(light_depth: u32, tile_min: u32, tile_max: u32) -> bool {
    let light_min = light_depth & 0xffffu;
    let light_max = light_depth >> 16u;
    return light_min < tile_max && light_max > tile_min;
}

@compute @workgroup_size({{TILE_SIZE}}, {{TILE_SIZE}}, 1)
fn main(
    @builtin(local_invocation_index) local_idx: u32,
    @builtin(workgroup_id) workgroup_id: vec3<u32>,
    @builtin(num_workgroups) num_workgroups: vec3<u32>,
) {
    let tile_id = workgroup_id.x + num_workgroups.x * workgroup_id.y;
    let group_size = {{TILE_SIZE}}u * {{TILE_SIZE}}u;

    if local_idx == 0u {
        let packed_range = tile_depth[tile_id];
        tile_min_depth = packed_range & 0xffffu;
        tile_max_depth = packed_range >> 16u;
        atomicStore(&xy_count, 0u);
        for (var b = 0u; b < 3u; b = b + 1u) {
            atomicStore(&z_count[b], 0u);
        }
    }
    workgroupBarrier();

    for (var i = local_idx; i < culling.light_count; i = i + group_size) {
        if quad_contains(lights[i].quad_id, workgroup_id.xy) {
            let slot = atomicAdd(&xy_count, 1u);
            if slot < {{XY_CAPACITY}}u {
                xy_lights[slot] = i;
            }
        }
    }
    workgroupBarrier();

    let xy_total = min(atomicLoad(&xy_count), {{XY_CAPACITY}}u);
    for (var i = local_idx; i < xy_total; i = i + group_size) {
        let light_id = xy_lights[i];
        let light_type = lights[light_id].flags;
        let light_depth = lights[light_id].depth;
        if light_type < 3u && depth_overlaps(light_depth, tile_min_depth, tile_max_depth) {
            let slot = atomicAdd(&z_count[light_type], 1u);
            if slot < {{Z_CAPACITY}}u {
                z_lights[light_type][slot] = light_id;
            }
        }
    }
    workgroupBarrier();

    if local_idx == 0u {
        let base = tile_id * (4u + 3u * {{Z_CAPACITY}}u);
        tile_lights[base] = xy_total;
        for (var b = 0u; b < 3u; b = b + 1u) {
            let count = min(atomicLoad(&z_count[b]), {{Z_CAPACITY}}u);
            tile_lights[base + 1u + b] = count;
            for (var i = 0u; i < count; i = i + 1u) {
                tile_lights[base + 4u + b * {{Z_CAPACITY}}u + i] = z_lights[b][i];
            }
        }
    }
}
"#;
