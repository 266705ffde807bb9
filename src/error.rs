//! Crate error types

use crate::backend::BackendError;
use thiserror::Error;

/// Errors raised while validating or dispatching a frame.
///
/// The kernels themselves never fail: bin overflow and degenerate geometry
/// degrade silently. Everything here is a host-side contract violation.
#[derive(Error, Debug)]
pub enum TiledError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Viewport must be non-empty, got {width}x{height}")]
    EmptyViewport { width: u32, height: u32 },
    #[error("Tile grid {tiles_x}x{tiles_y} exceeds the 255 tiles per axis addressable by quad ids")]
    TileGridTooLarge { tiles_x: u32, tiles_y: u32 },
    #[error("Image '{name}' is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    ImageSizeMismatch {
        name: String,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("Buffer '{name}' holds {actual} elements, expected {expected}")]
    BufferSizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Malformed light upload: {0}")]
    MalformedLightList(String),
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),
    #[error("Failed to write image: {0}")]
    ImageWrite(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type TiledResult<T> = Result<T, TiledError>;
