//! G-buffer inputs and the geometry helpers the shading kernel needs

use crate::error::TiledResult;
use crate::resources::{ColorImage, DepthImage, NormalImage};
use crate::DepthMode;
use glam::{UVec2, Vec2, Vec3};

/// Depth, encoded normal and albedo+mask planes, all the same size.
#[derive(Debug, Clone)]
pub struct GBuffer {
    pub depth: DepthImage,
    pub normal: NormalImage,
    pub color: ColorImage,
}

/// Decoded G-buffer texel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GBufferSample {
    pub depth: f32,
    /// View-space unit normal
    pub normal: Vec3,
    pub albedo: Vec3,
    /// Specular selector from the color alpha channel
    pub mask: f32,
}

impl GBuffer {
    pub fn new(depth: DepthImage, normal: NormalImage, color: ColorImage) -> TiledResult<Self> {
        let size = depth.size();
        normal.check_size(size)?;
        color.check_size(size)?;
        Ok(Self {
            depth,
            normal,
            color,
        })
    }

    pub fn size(&self) -> UVec2 {
        self.depth.size()
    }

    /// Decode the texel at `coord`, `None` outside the image.
    pub fn sample(&self, coord: UVec2) -> Option<GBufferSample> {
        let depth = self.depth.load(coord)?;
        let normal = decode_normal(self.normal.load(coord)?);
        let color = self.color.load(coord)?;
        Some(GBufferSample {
            depth,
            normal,
            albedo: color.truncate(),
            mask: color.w,
        })
    }
}

/// Spheremap (Lambert azimuthal) encoding of a unit normal into `[0, 1]²`.
///
/// Exact everywhere except straight away from the viewer (`z = -1`).
pub fn encode_normal(normal: Vec3) -> Vec2 {
    let f = (8.0 * normal.z + 8.0).max(1e-8).sqrt();
    Vec2::new(normal.x, normal.y) / f + Vec2::splat(0.5)
}

/// Inverse of [`encode_normal`].
pub fn decode_normal(encoded: Vec2) -> Vec3 {
    let fenc = encoded * 4.0 - Vec2::splat(2.0);
    let f = fenc.dot(fenc);
    let g = (1.0 - f / 4.0).max(0.0).sqrt();
    Vec3::new(fenc.x * g, fenc.y * g, 1.0 - f / 2.0)
}

/// Texel-center UV with the origin at the top-left.
pub fn pixel_uv(coord: UVec2, viewport: UVec2) -> Vec2 {
    (coord.as_vec2() + Vec2::splat(0.5)) / viewport.as_vec2().max(Vec2::ONE)
}

/// Convert an OpenGL-style depth buffer value to view distance over `far`.
pub fn linearize_depth(depth: f32, near: f32, far: f32) -> f32 {
    let z_ndc = 2.0 * depth - 1.0;
    let distance = 2.0 * near * far / ((far + near) - z_ndc * (far - near));
    distance / far
}

/// Linear depth for either depth mode.
pub fn linear_depth(depth: f32, mode: DepthMode, near: f32, far: f32) -> f32 {
    match mode {
        DepthMode::Hardware => linearize_depth(depth, near, far),
        DepthMode::Linear => depth,
    }
}

/// True for pixels no geometry was rasterized into.
pub fn is_background(depth: f32, mode: DepthMode) -> bool {
    match mode {
        DepthMode::Hardware => depth >= 1.0,
        DepthMode::Linear => depth <= 0.0,
    }
}

/// View-space position from a texel-center UV and linear depth.
///
/// `view_scale` is the far-plane top-right corner, so `uv = (1, 0)` with
/// linear depth 1 lands exactly on it.
pub fn reconstruct_view_position(uv: Vec2, view_scale: Vec3, linear_depth: f32) -> Vec3 {
    let ndc = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    Vec3::new(ndc.x * view_scale.x, ndc.y * view_scale.y, view_scale.z) * linear_depth
}
