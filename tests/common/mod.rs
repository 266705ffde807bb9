//! Shared fixtures for the pipeline integration tests.

use glam::{Mat4, UVec2, Vec3, Vec4};
use tiled_lighting::pipeline::gbuffer::encode_normal;
use tiled_lighting::pipeline::{GBuffer, ShadingParams};
use tiled_lighting::resources::{ColorImage, DepthImage, LitImage, NormalImage};
use tiled_lighting::scene::{DirectionalLight, LightRecord, PointLight, SpotLight};
use tiled_lighting::{BackendType, DepthMode, DepthRange, TileRect, TiledConfig, TiledPipeline};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Pipeline for `config` running on `backend`.
pub fn pipeline(backend: BackendType, config: TiledConfig) -> TiledPipeline {
    init_logging();
    TiledPipeline::new(config.with_backend(backend)).expect("valid test config")
}

/// Cheap integer hash mapped to `[0, 1)`.
pub fn hash01(x: u32, y: u32, seed: u32) -> f32 {
    let mut h = x.wrapping_mul(0x9E37_79B9) ^ y.wrapping_mul(0x85EB_CA6B) ^ seed;
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    (h & 0xffff) as f32 / 65536.0
}

/// Same depth, normal and albedo+mask at every pixel.
pub fn uniform_gbuffer(size: UVec2, depth: f32, normal: Vec3, color: Vec4) -> GBuffer {
    GBuffer::new(
        DepthImage::filled("depth", size.x, size.y, depth),
        NormalImage::filled("normal", size.x, size.y, encode_normal(normal)),
        ColorImage::filled("color", size.x, size.y, color),
    )
    .expect("planes share a size")
}

/// Noisy depth and normals with a band of background pixels along the bottom.
pub fn scene_gbuffer(size: UVec2) -> GBuffer {
    let background_rows = size.y / 8;
    let depth = DepthImage::from_fn("depth", size.x, size.y, |x, y| {
        if y >= size.y - background_rows {
            1.0
        } else {
            0.2 + 0.75 * hash01(x, y, 1)
        }
    });
    let normal = NormalImage::from_fn("normal", size.x, size.y, |x, y| {
        let tilt = Vec3::new(hash01(x, y, 2) - 0.5, hash01(x, y, 3) - 0.5, 1.0);
        encode_normal(tilt.normalize())
    });
    let color = ColorImage::from_fn("color", size.x, size.y, |x, y| {
        Vec4::new(0.8, 0.5 + 0.3 * hash01(x, y, 4), 0.3, (x + y) as f32 % 2.0)
    });
    GBuffer::new(depth, normal, color).expect("planes share a size")
}

/// Shading parameters with an identity view so test lights are placed in view space.
pub fn view_space_params(size: UVec2, mode: DepthMode) -> ShadingParams {
    ShadingParams {
        viewport_size: size,
        view_matrix: Mat4::IDENTITY,
        ..Default::default()
    }
    .with_depth_mode(mode)
}

/// A mix of every light type with scattered tile rects and depth ranges.
pub fn scene_lights(count: u32, grid: UVec2) -> Vec<LightRecord> {
    let view = Mat4::IDENTITY;
    (0..count)
        .map(|i| {
            let r = |seed| hash01(i, 0, seed);
            let position = Vec3::new(r(10) * 20.0 - 10.0, r(11) * 12.0 - 6.0, -2.0 - r(12) * 40.0);
            let color = Vec3::new(r(13), r(14), r(15)) * 4.0;
            let record = match i % 5 {
                0 => DirectionalLight::new(Vec3::new(r(16) - 0.5, -1.0, -0.5), color, 0.3)
                    .to_record(&view),
                1 | 2 | 3 => PointLight::new(position, color, 1.0, 4.0 + r(17) * 10.0)
                    .to_record(&view),
                _ => SpotLight::new(position, -Vec3::Z, color, 1.0, 20.0, 0.3, 0.6)
                    .to_record(&view),
            };
            let min_x = (r(20) * grid.x as f32) as u8;
            let min_y = (r(21) * grid.y as f32) as u8;
            let rect = TileRect::new(
                min_x,
                min_x.saturating_add(1 + (r(22) * 4.0) as u8),
                min_y,
                min_y.saturating_add(1 + (r(23) * 4.0) as u8),
            );
            let near = r(24) * 0.8;
            record
                .with_tile_rect(rect)
                .with_depth_range(DepthRange::from_normalized(near, near + 0.2))
        })
        .collect()
}

/// Raw bits of every channel, for exact comparisons.
pub fn texel_bits(image: &LitImage) -> Vec<u32> {
    image
        .texels()
        .iter()
        .flat_map(|texel| texel.to_array())
        .map(f32::to_bits)
        .collect()
}

pub fn approx_eq(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() <= 1e-5
}
