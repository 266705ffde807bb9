//! Bit-packed tile coordinates and depth ranges
//!
//! Two 32-bit encodings are shared between the light-list builder, the
//! depth reducer and the light culler:
//!
//! - [`DepthRange`]: `(max << 16) | min`, both quantized to 16 bits.
//! - [`TileRect`]: the light's screen quad in tile units, one byte per bound,
//!   packed little-to-big as `min_x | max_x << 8 | min_y << 16 | max_y << 24`.
//!
//! The same depth packing is used for tile ranges and for light ranges in both
//! depth modes, so a packed value can always be compared against another.

use glam::UVec2;

/// Scale applied to a normalized depth before rounding to 16 bits.
pub const DEPTH_QUANTIZATION_SCALE: f32 = 65535.0;

/// Quantize a normalized depth to a 16-bit unsigned value.
///
/// Computes `round(clamp(depth, 0, 1) * 65535)`. NaN maps to 0.
pub fn quantize_depth(depth: f32) -> u16 {
    // `as` saturates and maps NaN to 0
    (depth.clamp(0.0, 1.0) * DEPTH_QUANTIZATION_SCALE).round() as u16
}

/// Quantized `[min, max]` depth interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthRange {
    pub min: u16,
    pub max: u16,
}

impl DepthRange {
    /// Reduction identity: no sample has been accumulated yet.
    pub const EMPTY: Self = Self {
        min: u16::MAX,
        max: 0,
    };

    /// The whole depth range, used for lights that are not depth-bounded.
    pub const FULL: Self = Self {
        min: 0,
        max: u16::MAX,
    };

    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    /// Quantize a normalized `[near, far]` pair.
    pub fn from_normalized(min: f32, max: f32) -> Self {
        Self {
            min: quantize_depth(min),
            max: quantize_depth(max),
        }
    }

    /// Pack as `(max << 16) | min`.
    pub const fn pack(self) -> u32 {
        ((self.max as u32) << 16) | self.min as u32
    }

    /// Inverse of [`DepthRange::pack`].
    pub const fn unpack(packed: u32) -> Self {
        Self {
            min: (packed & 0x0000_ffff) as u16,
            max: (packed >> 16) as u16,
        }
    }

    /// True when no sample contributed (min is still above max).
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// Strict open-interval overlap: `self.min < other.max && self.max > other.min`.
    ///
    /// Touching intervals do not overlap, and an empty range overlaps nothing.
    pub fn overlaps(&self, other: &DepthRange) -> bool {
        self.min < other.max && self.max > other.min
    }

    /// Fold one quantized sample into the range.
    pub fn include(&mut self, depth: u16) {
        self.min = self.min.min(depth);
        self.max = self.max.max(depth);
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Screen-space bounding rectangle of a light in tile units.
///
/// Bounds are half-open: a tile `(x, y)` is covered when
/// `min_x <= x < max_x` and `min_y <= y < max_y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileRect {
    pub min_x: u8,
    pub max_x: u8,
    pub min_y: u8,
    pub max_y: u8,
}

impl TileRect {
    /// Every addressable tile.
    pub const FULL: Self = Self {
        min_x: 0,
        max_x: u8::MAX,
        min_y: 0,
        max_y: u8::MAX,
    };

    pub const fn new(min_x: u8, max_x: u8, min_y: u8, max_y: u8) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Pack little-to-big as `min_x | max_x << 8 | min_y << 16 | max_y << 24`.
    pub const fn pack(self) -> u32 {
        self.min_x as u32
            | (self.max_x as u32) << 8
            | (self.min_y as u32) << 16
            | (self.max_y as u32) << 24
    }

    /// Inverse of [`TileRect::pack`].
    pub const fn unpack(quad_id: u32) -> Self {
        Self {
            min_x: (quad_id & 0xff) as u8,
            max_x: ((quad_id >> 8) & 0xff) as u8,
            min_y: ((quad_id >> 16) & 0xff) as u8,
            max_y: ((quad_id >> 24) & 0xff) as u8,
        }
    }

    /// A quad with no area covers no tile.
    pub fn is_degenerate(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    /// Half-open containment test for a tile coordinate.
    ///
    /// Evaluated as the paired comparison the kernels use:
    /// `t = (x < min_x, x < max_x, y < min_y, y < max_y)`, then
    /// `t && !t.yxwz`, passing when both the `max_x` and `max_y` lanes hold.
    pub fn contains(&self, tile: UVec2) -> bool {
        let t = [
            tile.x < self.min_x as u32,
            tile.x < self.max_x as u32,
            tile.y < self.min_y as u32,
            tile.y < self.max_y as u32,
        ];
        let inside_x = t[1] && !t[0];
        let inside_y = t[3] && !t[2];
        inside_x && inside_y
    }

    /// Number of tiles covered.
    pub fn area(&self) -> u32 {
        if self.is_degenerate() {
            0
        } else {
            (self.max_x - self.min_x) as u32 * (self.max_y - self.min_y) as u32
        }
    }
}
