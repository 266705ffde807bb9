//! Tiled lighting demo
//!
//! Ray-casts a G-buffer of spheres standing on a floor, scatters point and
//! spot lights over it, runs the tiled pipeline and writes the lit image as
//! a PNG. Optionally writes a heat map of lights per tile as well.
//!
//! ```bash
//! cargo run --release --example tiled_demo -- --lights 512 --heatmap heat.png
//! ```

use clap::Parser;
use glam::{Mat4, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use tiled_lighting::backend::{CpuBackend, ParallelBackend};
use tiled_lighting::pipeline::gbuffer::{encode_normal, pixel_uv};
use tiled_lighting::pipeline::{GBuffer, ShadingParams};
use tiled_lighting::resources::{ColorImage, DepthImage, LitImage, NormalImage};
use tiled_lighting::scene::{
    Camera, DirectionalLight, LightRecord, PointLight, Projection, SpotLight,
};
use tiled_lighting::shader::{build_kernel, KernelShader};
use tiled_lighting::{
    BackendType, DepthRange, FrameInputs, TileRect, TiledConfig, TiledPipeline, TiledResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliBackend {
    Serial,
    Parallel,
}

/// Render a procedural scene with tiled deferred lighting.
#[derive(Parser, Debug)]
#[command(name = "tiled_demo", version)]
struct Args {
    /// Image width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Image height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Number of point and spot lights.
    #[arg(long, default_value = "256")]
    lights: u32,

    /// Tile edge in pixels.
    #[arg(long, default_value = "16")]
    tile_size: u32,

    /// Workgroup executor.
    #[arg(long, default_value = "parallel", value_enum)]
    backend: CliBackend,

    /// Worker threads for the parallel backend (defaults to one per core).
    #[arg(long)]
    threads: Option<usize>,

    /// Seed for light placement.
    #[arg(long, default_value = "7")]
    seed: u32,

    /// Where to write the lit image.
    #[arg(long, short, default_value = "tiled_demo.png")]
    output: String,

    /// Also write a lights-per-tile heat map here.
    #[arg(long)]
    heatmap: Option<String>,

    /// Compile the WGSL kernels for this configuration before rendering.
    #[arg(long)]
    validate_shaders: bool,
}

struct Sphere {
    center: Vec3,
    radius: f32,
    albedo: Vec3,
    shiny: bool,
}

/// Small xorshift generator so runs are reproducible.
struct Rng(u32);

impl Rng {
    fn next(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        (self.0 >> 8) as f32 / (1u32 << 24) as f32
    }

    fn range(&mut self, min: f32, max: f32) -> f32 {
        min + (max - min) * self.next()
    }
}

fn scene_spheres() -> Vec<Sphere> {
    let mut spheres = Vec::new();
    for row in 0..4 {
        for col in 0..5 {
            let hue = (row * 5 + col) as f32 / 20.0;
            spheres.push(Sphere {
                center: Vec3::new(col as f32 * 2.2 - 4.4, 0.8, row as f32 * -2.5 + 1.0),
                radius: 0.8,
                albedo: Vec3::new(
                    0.5 + 0.4 * (hue * 6.28).cos(),
                    0.5 + 0.4 * (hue * 6.28 + 2.1).cos(),
                    0.5 + 0.4 * (hue * 6.28 + 4.2).cos(),
                ),
                shiny: (row + col) % 2 == 0,
            });
        }
    }
    spheres
}

fn intersect_sphere(origin: Vec3, dir: Vec3, sphere: &Sphere) -> Option<f32> {
    let oc = origin - sphere.center;
    let b = oc.dot(dir);
    let c = oc.length_squared() - sphere.radius * sphere.radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let t = -b - disc.sqrt();
    (t > 0.0).then_some(t)
}

/// Hardware depth of a view-space z under `projection`.
fn hardware_depth(view_z: f32, projection: &Mat4) -> f32 {
    let clip = *projection * Vec4::new(0.0, 0.0, view_z, 1.0);
    (clip.z / clip.w) * 0.5 + 0.5
}

fn build_gbuffer(camera: &Camera, size: UVec2, spheres: &[Sphere]) -> TiledResult<GBuffer> {
    let view = camera.view_matrix();
    let inv_view = view.inverse();
    let projection = camera.projection_matrix();
    let scale = camera.projection.view_scale();

    let mut depth = DepthImage::filled("depth", size.x, size.y, 1.0);
    let mut normal = NormalImage::filled("normal", size.x, size.y, Vec2::splat(0.5));
    let mut color = ColorImage::filled("color", size.x, size.y, Vec4::ZERO);

    for y in 0..size.y {
        for x in 0..size.x {
            let coord = UVec2::new(x, y);
            let uv = pixel_uv(coord, size);
            let ndc = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
            let view_dir = Vec3::new(ndc.x * scale.x, ndc.y * scale.y, scale.z).normalize();
            let dir = inv_view.transform_vector3(view_dir).normalize();
            let origin = camera.position;

            let mut hit: Option<(f32, Vec3, Vec3, bool)> = None;
            for sphere in spheres {
                if let Some(t) = intersect_sphere(origin, dir, sphere) {
                    if hit.map_or(true, |(best, ..)| t < best) {
                        let n = (origin + dir * t - sphere.center).normalize();
                        hit = Some((t, n, sphere.albedo, sphere.shiny));
                    }
                }
            }
            if dir.y < 0.0 {
                let t = -origin.y / dir.y;
                if hit.map_or(true, |(best, ..)| t < best) {
                    let p = origin + dir * t;
                    let checker = ((p.x.floor() + p.z.floor()) as i32).rem_euclid(2) as f32;
                    hit = Some((t, Vec3::Y, Vec3::splat(0.35 + 0.3 * checker), false));
                }
            }

            let Some((t, world_normal, albedo, shiny)) = hit else {
                continue;
            };
            let view_pos = view.transform_point3(origin + dir * t);
            if view_pos.z > -camera.projection.near || view_pos.z < -camera.projection.far {
                continue;
            }
            let view_normal = view.transform_vector3(world_normal).normalize();
            depth.set(coord, hardware_depth(view_pos.z, &projection));
            normal.set(coord, encode_normal(view_normal));
            color.set(coord, albedo.extend(if shiny { 1.0 } else { 0.0 }));
        }
    }

    GBuffer::new(depth, normal, color)
}

/// Screen tiles and depth range touched by a view-space bounding sphere.
fn light_bounds(
    center: Vec3,
    radius: f32,
    camera: &Camera,
    size: UVec2,
    grid: UVec2,
    tile_size: u32,
) -> Option<(TileRect, DepthRange)> {
    let near = camera.projection.near;
    let far = camera.projection.far;
    if center.z - radius > -near || center.z + radius < -far {
        return None;
    }
    let projection = camera.projection_matrix();
    let z_near = (center.z + radius).min(-near);
    let z_far = (center.z - radius).max(-far);
    let depth = DepthRange::from_normalized(
        hardware_depth(z_near, &projection),
        hardware_depth(z_far, &projection),
    );

    // Camera inside the sphere: the light can touch any tile
    if center.z + radius > -near {
        return Some((TileRect::FULL, depth));
    }

    let mut min = Vec2::splat(f32::MAX);
    let mut max = Vec2::splat(f32::MIN);
    for corner in 0..8 {
        let offset = Vec3::new(
            if corner & 1 == 0 { -radius } else { radius },
            if corner & 2 == 0 { -radius } else { radius },
            if corner & 4 == 0 { -radius } else { radius },
        );
        let clip = projection * (center + offset).extend(1.0);
        let ndc = clip.xy() / clip.w;
        let pixel = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5) * size.as_vec2();
        min = min.min(pixel);
        max = max.max(pixel);
    }
    let tile = tile_size as f32;
    let lo = (min / tile).floor().max(Vec2::ZERO).as_uvec2();
    let hi = ((max / tile).floor() + Vec2::ONE).max(Vec2::ZERO).as_uvec2().min(grid);
    if lo.x >= hi.x || lo.y >= hi.y {
        return None;
    }
    let rect = TileRect::new(lo.x as u8, hi.x as u8, lo.y as u8, hi.y as u8);
    Some((rect, depth))
}

fn scatter_lights(args: &Args, camera: &Camera, size: UVec2, grid: UVec2) -> Vec<LightRecord> {
    let view = camera.view_matrix();
    let mut rng = Rng(args.seed.max(1));
    let mut records = vec![
        DirectionalLight::new(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 0.95, 0.85), 0.25)
            .to_record(&view),
    ];

    for i in 0..args.lights {
        let position = Vec3::new(rng.range(-7.0, 7.0), rng.range(0.2, 2.5), rng.range(-9.0, 3.0));
        let color = Vec3::new(rng.range(0.2, 1.0), rng.range(0.2, 1.0), rng.range(0.2, 1.0));
        let radius = rng.range(1.0, 3.0);
        let record = if i % 8 == 7 {
            let target = Vec3::new(rng.range(-5.0, 5.0), 0.0, rng.range(-7.0, 2.0));
            let position = position + Vec3::Y * 2.0;
            SpotLight::new(position, target - position, color, 3.0, radius * 2.0, 0.3, 0.5)
                .to_record(&view)
        } else {
            PointLight::new(position, color, 2.0, radius).to_record(&view)
        };

        let view_center = record.position.truncate();
        let bound = if i % 8 == 7 { radius * 2.0 } else { radius };
        match light_bounds(view_center, bound, camera, size, grid, args.tile_size) {
            Some((rect, depth)) => {
                records.push(record.with_tile_rect(rect).with_depth_range(depth))
            }
            None => log::debug!("light {i} is off screen"),
        }
    }
    records
}

/// Red where a tile's bins are full, blue where they are empty.
fn heatmap(
    pipeline: &TiledPipeline,
    tile_depth: &[u32],
    lights: &[LightRecord],
    size: UVec2,
) -> TiledResult<LitImage> {
    let config = pipeline.config();
    let culled = pipeline.cull_lights(tile_depth, lights, size)?;
    let grid = config.tile_grid(size)?;
    let capacity = (config.z_capacity as usize * 3) as f32;
    LitImage::new(
        "heatmap",
        size.x,
        size.y,
        (0..size.y)
            .flat_map(|y| (0..size.x).map(move |x| UVec2::new(x, y)))
            .map(|pixel| {
                let tile = pixel / config.tile_size;
                let count = culled.tiles[(tile.y * grid.x + tile.x) as usize].total();
                let t = (count as f32 / capacity).sqrt().min(1.0);
                Vec4::new(t, 0.2 * (1.0 - t), 1.0 - t, 1.0)
            })
            .collect(),
    )
}

fn main() -> TiledResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    tiled_lighting::init();

    let args = Args::parse();
    let size = UVec2::new(args.width, args.height);
    let config = TiledConfig::default()
        .with_tile_size(args.tile_size)
        .with_backend(match args.backend {
            CliBackend::Serial => BackendType::Serial,
            CliBackend::Parallel => BackendType::Parallel,
        });

    if args.validate_shaders {
        for kernel in KernelShader::ALL {
            let spirv = build_kernel(kernel, &config)?;
            log::info!("{} kernel: {} SPIR-V words", kernel.label(), spirv.len());
        }
    }

    let pipeline = match (args.backend, args.threads) {
        (CliBackend::Parallel, Some(threads)) => TiledPipeline::with_backend(
            config.clone(),
            CpuBackend::Parallel(ParallelBackend::with_threads(threads)?),
        )?,
        _ => TiledPipeline::new(config.clone())?,
    };
    let grid = config.tile_grid(size)?;

    let camera = Camera::new(Vec3::new(0.0, 4.0, 9.0), Vec3::new(0.0, 0.5, -2.0)).with_projection(
        Projection::perspective(60.0, size.x as f32 / size.y as f32, 0.1, 50.0),
    );
    let gbuffer = build_gbuffer(&camera, size, &scene_spheres())?;
    let lights = scatter_lights(&args, &camera, size, grid);
    log::info!("{} lights on a {}x{} tile grid", lights.len(), grid.x, grid.y);

    let params = ShadingParams::from_camera(&camera, size)
        .with_surface_roughness(0.35)
        .with_ambient(Vec3::new(0.02, 0.02, 0.015), Vec3::new(0.04, 0.05, 0.07));
    let frame = pipeline.render(&FrameInputs {
        gbuffer: &gbuffer,
        lights: &lights,
        params: &params,
    })?;

    for dispatch in &frame.dispatches {
        log::info!(
            "{}: {} workgroups in {:.2?}",
            dispatch.label,
            dispatch.workgroups,
            dispatch.elapsed
        );
    }
    frame.image.save_png(&args.output)?;

    if let Some(path) = &args.heatmap {
        heatmap(&pipeline, &frame.tile_depth, &lights, size)?.save_png(path)?;
    }
    Ok(())
}
