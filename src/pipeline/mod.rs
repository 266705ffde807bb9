//! Tiled deferred lighting pipeline
//!
//! A frame is two dispatches over the same tile grid:
//! 1. Depth reduction - one packed depth range per tile
//! 2. Cull + shade - per-tile light bins, then the BRDF per pixel
//!
//! The second dispatch only starts once the first has finished.

pub mod brdf;
pub mod depth_reduce;
pub mod gbuffer;
pub mod light_culling;
pub mod tiled_shading;

pub use brdf::{ShadingParams, ShadingUniforms, SHADING_EPSILON};
pub use depth_reduce::{DepthReduceKernel, TILE_DEPTH_SHADER};
pub use gbuffer::{GBuffer, GBufferSample};
pub use light_culling::{
    CullingStats, LightCuller, LightCullingKernel, TileBins, TileLightData, LIGHT_CULLING_SHADER,
};
pub use tiled_shading::{TiledShadingKernel, TILED_SHADING_SHADER};

use crate::backend::{ComputeBackend, CpuBackend, DispatchStats};
use crate::error::{TiledError, TiledResult};
use crate::resources::{DepthImage, LitImage, StorageBuffer, StorageImage};
use crate::scene::LightRecord;
use crate::TiledConfig;
use glam::UVec2;

/// Everything one frame reads
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub gbuffer: &'a GBuffer,
    pub lights: &'a [LightRecord],
    pub params: &'a ShadingParams,
}

/// Everything one frame produces
#[derive(Debug)]
pub struct FrameOutput {
    /// Packed depth range per tile, row-major
    pub tile_depth: Vec<u32>,
    pub image: LitImage,
    pub culling: CullingStats,
    pub dispatches: Vec<DispatchStats>,
}

/// Culling-only results
#[derive(Debug)]
pub struct CullingOutput {
    /// Bins per tile, row-major
    pub tiles: Vec<TileLightData>,
    pub stats: CullingStats,
}

/// Runs the dispatches of a frame on a CPU backend.
#[derive(Debug)]
pub struct TiledPipeline {
    config: TiledConfig,
    backend: CpuBackend,
}

impl TiledPipeline {
    pub fn new(config: TiledConfig) -> TiledResult<Self> {
        let backend = CpuBackend::new(config.backend);
        Self::with_backend(config, backend)
    }

    /// Use an already built backend, e.g. a parallel one with its own pool.
    pub fn with_backend(config: TiledConfig, backend: CpuBackend) -> TiledResult<Self> {
        config.validate()?;
        log::info!(
            "Tiled pipeline: {} backend, {}px tiles, bins {}/{}, {} depth",
            backend.name(),
            config.tile_size,
            config.xy_capacity,
            config.z_capacity,
            config.depth_mode.label()
        );
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &TiledConfig {
        &self.config
    }

    pub fn backend(&self) -> &CpuBackend {
        &self.backend
    }

    /// Reduce a depth image to one packed range per tile.
    pub fn reduce_depth(&self, depth: &DepthImage) -> TiledResult<Vec<u32>> {
        let grid = self.config.tile_grid(depth.size())?;
        let output = StorageBuffer::new("tile depth", tile_count(grid));
        let kernel = DepthReduceKernel::new(depth, &output, &self.config);
        self.backend.dispatch(&kernel, kernel.dispatch_size())?;
        Ok(output.to_vec())
    }

    /// Bin `lights` for every tile of a `viewport`-sized frame.
    pub fn cull_lights(
        &self,
        tile_depth: &[u32],
        lights: &[LightRecord],
        viewport: UVec2,
    ) -> TiledResult<CullingOutput> {
        let grid = self.config.tile_grid(viewport)?;
        check_tile_depth(tile_depth, grid)?;

        let depth = StorageBuffer::from_words("tile depth", tile_depth);
        let record = TileLightData::record_words(self.config.z_capacity);
        let output = StorageBuffer::new("tile lights", record * tile_count(grid));
        let kernel = LightCullingKernel::new(lights, &depth, &output, &self.config);
        self.backend
            .dispatch(&kernel, LightCullingKernel::dispatch_size(grid))?;

        let stats = kernel.stats();
        report_culling(&stats);
        let tiles = output
            .to_vec()
            .chunks(record)
            .map(|words| TileLightData::from_words(words, self.config.z_capacity))
            .collect::<TiledResult<Vec<_>>>()?;
        Ok(CullingOutput { tiles, stats })
    }

    /// Run both dispatches for one frame.
    pub fn render(&self, inputs: &FrameInputs) -> TiledResult<FrameOutput> {
        let size = inputs.gbuffer.size();
        let grid = self.config.tile_grid(size)?;
        self.check_params(inputs.params, size)?;

        let tile_depth = StorageBuffer::new("tile depth", tile_count(grid));
        let reduce = DepthReduceKernel::new(&inputs.gbuffer.depth, &tile_depth, &self.config);
        let reduce_stats = self.backend.dispatch(&reduce, reduce.dispatch_size())?;

        let output = StorageImage::new("lit", size.x, size.y);
        let shading = TiledShadingKernel::new(
            inputs.gbuffer,
            inputs.lights,
            &tile_depth,
            inputs.params,
            &output,
            &self.config,
        );
        let shade_stats = self.backend.dispatch(&shading, shading.dispatch_size())?;

        let culling = shading.stats();
        report_culling(&culling);

        Ok(FrameOutput {
            tile_depth: tile_depth.to_vec(),
            image: output.to_image(),
            culling,
            dispatches: vec![reduce_stats, shade_stats],
        })
    }

    fn check_params(&self, params: &ShadingParams, size: UVec2) -> TiledResult<()> {
        if params.depth_mode != self.config.depth_mode {
            return Err(TiledError::InvalidConfig(format!(
                "shading expects {} depth but the pipeline reduces {} depth",
                params.depth_mode.label(),
                self.config.depth_mode.label()
            )));
        }
        if params.viewport_size != size {
            return Err(TiledError::ImageSizeMismatch {
                name: "viewport".into(),
                expected_width: size.x,
                expected_height: size.y,
                actual_width: params.viewport_size.x,
                actual_height: params.viewport_size.y,
            });
        }
        Ok(())
    }
}

fn tile_count(grid: UVec2) -> usize {
    grid.x as usize * grid.y as usize
}

fn check_tile_depth(tile_depth: &[u32], grid: UVec2) -> TiledResult<()> {
    if tile_depth.len() != tile_count(grid) {
        return Err(TiledError::BufferSizeMismatch {
            name: "tile depth".into(),
            expected: tile_count(grid),
            actual: tile_depth.len(),
        });
    }
    Ok(())
}

fn report_culling(stats: &CullingStats) {
    if stats.has_overflow() {
        log::warn!(
            "Light bins overflowed: {} lights dropped from XY lists, {} from type bins",
            stats.xy_overflow,
            stats.z_overflow
        );
    }
    if stats.unknown_type > 0 {
        log::warn!("{} culled lights had an unknown type flag", stats.unknown_type);
    }
}
