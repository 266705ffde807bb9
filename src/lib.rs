//! Tiled Lighting - light culling and shading core of a tile-based deferred renderer
//!
//! The screen is split into fixed-size tiles. Every frame runs two dispatches,
//! each one workgroup per tile:
//! - **Depth reduction**: per-tile `(min, max)` depth, packed into one `u32`
//! - **Cull + shade**: bins the lights whose screen quad and depth range touch
//!   the tile, then evaluates an Oren-Nayar / Cook-Torrance BRDF per pixel
//!   against only those lights
//!
//! # Features
//! - Workgroup simulator with barrier-separated phases and tile-scoped shared memory
//! - Serial and rayon-parallel CPU backends
//! - Hardware (non-linear) or linear view-space depth input
//! - WGSL versions of every kernel, validated with naga
//!
//! # Example
//!
//! ```ignore
//! use tiled_lighting::{pipeline::TiledPipeline, TiledConfig};
//!
//! let pipeline = TiledPipeline::new(TiledConfig::default())?;
//! let output = pipeline.render(&inputs)?;
//! output.image.save_png("lit.png")?;
//! ```

pub mod backend;
pub mod error;
pub mod packing;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod shader;

pub use error::{TiledError, TiledResult};
pub use packing::{DepthRange, TileRect};
pub use pipeline::{FrameInputs, FrameOutput, TiledPipeline};

use glam::UVec2;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest tile grid along one axis; quad ids store tile bounds in 8 bits.
pub const MAX_TILES_PER_AXIS: u32 = 255;

/// Initialize the library.
///
/// Only logs the version; call it after installing a logger.
pub fn init() {
    log::info!("Tiled Lighting v{} initialized", VERSION);
}

/// Backend selection for running the kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Workgroups run one after another on the calling thread
    Serial,
    /// Workgroups are spread across a rayon thread pool
    #[default]
    Parallel,
}

/// How the depth image should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthMode {
    /// Normalized `[0, 1]` depth straight from the depth buffer; 1 is the far plane
    #[default]
    Hardware,
    /// View distance divided by the far plane; 0 means no geometry
    Linear,
}

impl DepthMode {
    pub fn label(&self) -> &'static str {
        match self {
            DepthMode::Hardware => "hardware",
            DepthMode::Linear => "linear",
        }
    }
}

/// Configuration for the tiled pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct TiledConfig {
    /// Tile edge in pixels; one workgroup invocation per pixel
    pub tile_size: u32,
    /// Capacity of the per-tile list of lights passing the screen-quad test
    pub xy_capacity: u32,
    /// Capacity of each per-type bin of lights passing the depth test
    pub z_capacity: u32,
    /// Interpretation of the depth image
    pub depth_mode: DepthMode,
    /// Which backend executes the dispatches
    pub backend: BackendType,
}

impl Default for TiledConfig {
    fn default() -> Self {
        Self {
            tile_size: 16,
            xy_capacity: 256,
            z_capacity: 64,
            depth_mode: DepthMode::Hardware,
            backend: BackendType::Parallel,
        }
    }
}

impl TiledConfig {
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_capacities(mut self, xy_capacity: u32, z_capacity: u32) -> Self {
        self.xy_capacity = xy_capacity;
        self.z_capacity = z_capacity;
        self
    }

    pub fn with_depth_mode(mut self, depth_mode: DepthMode) -> Self {
        self.depth_mode = depth_mode;
        self
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Check the values a kernel would be built from.
    pub fn validate(&self) -> TiledResult<()> {
        if self.tile_size == 0 {
            return Err(TiledError::InvalidConfig("tile_size must be positive".into()));
        }
        let invocations = self.tile_size.saturating_mul(self.tile_size);
        if invocations > backend::MAX_WORKGROUP_INVOCATIONS {
            return Err(TiledError::InvalidConfig(format!(
                "tile_size {} needs {} invocations per workgroup, limit is {}",
                self.tile_size,
                invocations,
                backend::MAX_WORKGROUP_INVOCATIONS
            )));
        }
        if self.xy_capacity == 0 || self.z_capacity == 0 {
            return Err(TiledError::InvalidConfig(
                "light bin capacities must be positive".into(),
            ));
        }
        if self.z_capacity > self.xy_capacity {
            return Err(TiledError::InvalidConfig(format!(
                "z_capacity {} exceeds xy_capacity {}",
                self.z_capacity, self.xy_capacity
            )));
        }
        Ok(())
    }

    /// Number of tiles covering `viewport`, partial tiles included.
    pub fn tile_grid(&self, viewport: UVec2) -> TiledResult<UVec2> {
        if viewport.x == 0 || viewport.y == 0 {
            return Err(TiledError::EmptyViewport {
                width: viewport.x,
                height: viewport.y,
            });
        }
        let tile = self.tile_size.max(1);
        let grid = UVec2::new(viewport.x.div_ceil(tile), viewport.y.div_ceil(tile));
        if grid.x > MAX_TILES_PER_AXIS || grid.y > MAX_TILES_PER_AXIS {
            return Err(TiledError::TileGridTooLarge {
                tiles_x: grid.x,
                tiles_y: grid.y,
            });
        }
        Ok(grid)
    }
}
