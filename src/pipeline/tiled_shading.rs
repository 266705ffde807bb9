//! Fused light culling and shading
//!
//! One workgroup per tile. Each invocation decodes its G-buffer texel while
//! the leader loads the tile depth; the culling phases then fill the tile's
//! bins and finally every invocation shades its pixel against the three bins.

use crate::backend::{ComputeKernel, DispatchSize, Invocation, WorkgroupSize};
use crate::pipeline::brdf::{
    ambient_hemisphere, compose, evaluate_light, Radiance, ShadingParams, SurfacePoint,
};
use crate::pipeline::gbuffer::{
    is_background, linear_depth, pixel_uv, reconstruct_view_position, GBuffer,
};
use crate::pipeline::light_culling::{CullingCounters, CullingStats, LightCuller, TileBins};
use crate::resources::{StorageBuffer, StorageImage};
use crate::scene::{LightRecord, LightType};
use crate::TiledConfig;
use glam::{Vec3, Vec4};

const PHASE_SETUP: usize = 0;
const PHASE_XY: usize = 1;
const PHASE_Z: usize = 2;
const PHASE_SHADE: usize = 3;

/// What an invocation carries from setup to the shading phase.
#[derive(Debug, Clone, Copy, Default)]
pub enum PixelState {
    /// Invocation of a partial tile past the image edge
    #[default]
    Outside,
    /// Nothing was rendered at this pixel
    Background,
    Surface {
        surface: SurfacePoint,
        albedo: Vec3,
        mask: f32,
        ambient: Vec3,
    },
}

/// Culls lights per tile and writes the lit image.
pub struct TiledShadingKernel<'a> {
    culler: LightCuller<'a>,
    gbuffer: &'a GBuffer,
    params: &'a ShadingParams,
    output: &'a StorageImage,
    counters: CullingCounters,
    tile_size: u32,
    xy_capacity: u32,
    z_capacity: u32,
}

impl<'a> TiledShadingKernel<'a> {
    pub fn new(
        gbuffer: &'a GBuffer,
        lights: &'a [LightRecord],
        tile_depth: &'a StorageBuffer,
        params: &'a ShadingParams,
        output: &'a StorageImage,
        config: &TiledConfig,
    ) -> Self {
        Self {
            culler: LightCuller::new(lights, tile_depth),
            gbuffer,
            params,
            output,
            counters: CullingCounters::default(),
            tile_size: config.tile_size,
            xy_capacity: config.xy_capacity,
            z_capacity: config.z_capacity,
        }
    }

    pub fn dispatch_size(&self) -> DispatchSize {
        let size = self.gbuffer.size();
        DispatchSize::covering(size.x, size.y, self.workgroup_size())
    }

    pub fn stats(&self) -> CullingStats {
        self.counters.stats()
    }

    fn setup_pixel(&self, invocation: &Invocation) -> PixelState {
        let coord = invocation.global_id;
        let Some(sample) = self.gbuffer.sample(coord) else {
            return PixelState::Outside;
        };
        let params = self.params;
        if is_background(sample.depth, params.depth_mode) {
            return PixelState::Background;
        }

        let depth = linear_depth(sample.depth, params.depth_mode, params.near, params.far);
        let uv = pixel_uv(coord, params.viewport_size);
        let position = reconstruct_view_position(uv, params.view_scale, depth);

        PixelState::Surface {
            surface: SurfacePoint::new(position, sample.normal, params),
            albedo: sample.albedo,
            mask: sample.mask,
            ambient: ambient_hemisphere(
                sample.normal,
                &params.view_matrix,
                params.ambient_ground,
                params.ambient_sky,
            ),
        }
    }

    fn shade_pixel(&self, invocation: &Invocation, bins: &TileBins, state: &PixelState) {
        let color = match *state {
            PixelState::Outside => return,
            PixelState::Background => Vec3::ZERO,
            PixelState::Surface {
                surface,
                albedo,
                mask,
                ambient,
            } => {
                let mut radiance = Radiance::default();
                for light_type in LightType::ALL {
                    for index in bins.bin(light_type).iter() {
                        let light = self.culler.light(index);
                        if let Some(contribution) =
                            evaluate_light(&surface, light, light_type, self.params)
                        {
                            radiance += contribution;
                        }
                    }
                }
                compose(albedo, mask, ambient, &radiance, surface.fresnel)
            }
        };
        self.output
            .store(invocation.global_id, color.extend(1.0));
    }
}

impl ComputeKernel for TiledShadingKernel<'_> {
    type Shared = TileBins;
    type Local = PixelState;

    fn label(&self) -> &str {
        "Tiled Shading"
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

    fn run_phase(
        &self,
        phase: usize,
        invocation: &Invocation,
        bins: &TileBins,
        state: &mut PixelState,
    ) {
        match phase {
            PHASE_SETUP => {
                *state = self.setup_pixel(invocation);
                self.culler.begin_tile(invocation, bins);
            }
            PHASE_XY => self.culler.cull_xy(invocation, bins),
            PHASE_Z => self.culler.cull_z(invocation, bins),
            PHASE_SHADE => {
                self.shade_pixel(invocation, bins, state);
                if invocation.is_leader() {
                    self.counters.record(bins);
                }
            }
            _ => {}
        }
    }
}

/// Opaque black, written for background pixels.
pub const BACKGROUND_COLOR: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

/// WGSL version of [`TiledShadingKernel`]; specialize with [`crate::shader::specialize`].
pub const TILED_SHADING_SHADER: &str = r#"
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

struct ShadingUniforms {
    view_matrix: mat4x4<f32>,
    ambient_ground: vec4<f32>,
    ambient_sky: vec4<f32>,
    view_scale: vec4<f32>,
    viewport_size: vec4<f32>,
    roughness: vec4<f32>,
    near_far: vec2<f32>,
    light_count: u32,
    depth_mode: u32,
}

struct Surface {
    position: vec3<f32>,
    normal: vec3<f32>,
    view: vec3<f32>,
    dot_vn: f32,
    angle_vn: f32,
    proj_vp: vec3<f32>,
}

struct Radiance {
    diffuse: vec3<f32>,
    specular: vec3<f32>,
}

const SHADING_EPSILON: f32 = 1e-4;

@group(0) @binding(0) var<uniform> shading: ShadingUniforms;
@group(0) @binding(1) var<storage, read> lights: array<LightRecord>;
@group(0) @binding(2) var<storage, read> tile_depth: array<u32>;
@group(0) @binding(3) var gbuffer_depth: texture_2d<f32>;
@group(0) @binding(4) var gbuffer_normal: texture_2d<f32>;
@group(0) @binding(5) var gbuffer_color: texture_2d<f32>;
@group(0) @binding(6) var lit_image: texture_storage_2d<rgba16float, write>;

var<workgroup> tile_min_depth: u32;
var<workgroup> tile_max_depth: u32;
var<workgroup> xy_count: atomic<u32>;
var<workgroup> xy_lights: array<u32, {{XY_CAPACITY}}>;
var<workgroup> z_count: array<atomic<u32>, 3>;
var<workgroup> z_lights: array<array<u32, {{Z_CAPACITY}}>, 3>;

fn safe_normalize(v: vec3<f32>) -> vec3<f32> {
    let len_sq = dot(v, v);
    if len_sq > 0.0 {
        return v * inverseSqrt(len_sq);
    }
    return vec3<f32>(0.0);
}

fn decode_normal(encoded: vec2<f32>) -> vec3<f32> {
    let fenc = encoded * 4.0 - vec2<f32>(2.0);
    let f = dot(fenc, fenc);
    let g = sqrt(max(1.0 - f / 4.0, 0.0));
    return vec3<f32>(fenc * g, 1.0 - f / 2.0);
}

fn linearize_depth(depth: f32, near: f32, far: f32) -> f32 {
    let z_ndc = 2.0 * depth - 1.0;
    return 2.0 * near / ((far + near) - z_ndc * (far - near));
}

fn omni_falloff(sqr_distance: f32, inv_sqr_radius: f32) -> f32 {
    let f = max(1.0 - sqrt(sqr_distance * inv_sqr_radius), 0.0);
    return f * f;
}

fn spot_attenuation(
    sqr_distance: f32,
    inv_sqr_radius: f32,
    axis: vec3<f32>,
    l: vec3<f32>,
    cone: vec2<f32>,
) -> f32 {
    let cos_angle = dot(-l, axis);
    let spot = clamp((cos_angle - cone.y) / max(cone.x - cone.y, SHADING_EPSILON), 0.0, 1.0);
    return omni_falloff(sqr_distance, inv_sqr_radius) * spot;
}

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

fn evaluate_light(surface: Surface, light: LightRecord, light_type: u32) -> Radiance {
    var result = Radiance(vec3<f32>(0.0), vec3<f32>(0.0));

    var to_light = light.position.xyz - surface.position;
    if light_type == 0u {
        to_light = -light.direction.xyz;
    }
    let raw_dot_ln = dot(to_light, surface.normal);
    if !(raw_dot_ln > 0.0) {
        return result;
    }

    let sqr_distance = dot(to_light, to_light);
    let inv_distance = inverseSqrt(sqr_distance);
    let l = to_light * inv_distance;
    let dot_ln = raw_dot_ln * inv_distance;

    // Oren-Nayar
    let angle_ln = acos(clamp(dot_ln, -1.0, 1.0));
    let alpha = max(surface.angle_vn, angle_ln);
    let beta = min(surface.angle_vn, angle_ln);
    let c = sin(alpha) * tan(beta);
    let proj_lp = safe_normalize(l - dot_ln * surface.normal);
    let gamma = max(dot(surface.proj_vp, proj_lp), 0.0);
    let diffuse_term = dot_ln * (shading.roughness.x + shading.roughness.y * c * gamma);

    // Cook-Torrance with a Beckmann distribution
    let h = safe_normalize(l + surface.view);
    let dot_hn = dot(h, surface.normal);
    let dot_hv = dot(h, surface.view);
    let geo = min(2.0 * min(surface.dot_vn, dot_ln) * dot_hn / max(dot_hv, SHADING_EPSILON), 1.0);
    let dot_hn2 = dot_hn * dot_hn;
    let dot_hn4 = dot_hn2 * dot_hn2;
    let m2 = shading.roughness.z;
    let beckmann = exp((dot_hn2 - 1.0) / max(m2 * dot_hn2, SHADING_EPSILON));
    let r = beckmann / max(m2 * dot_hn4, SHADING_EPSILON);
    let specular_term = max(geo * r / max(surface.dot_vn, SHADING_EPSILON), 0.0);

    var attenuation: f32 = 1.0;
    if light_type == 1u {
        attenuation = omni_falloff(sqr_distance, light.value_inv_sqr_radius.w);
    } else if light_type == 2u {
        attenuation = spot_attenuation(
            sqr_distance,
            light.value_inv_sqr_radius.w,
            light.direction.xyz,
            l,
            light.spot_parameters.xy,
        );
    }

    let intensity = light.value_inv_sqr_radius.xyz * attenuation;
    result.diffuse = diffuse_term * intensity;
    result.specular = specular_term * intensity;
    return result;
}

@compute @workgroup_size({{TILE_SIZE}}, {{TILE_SIZE}}, 1)
fn main(
    @builtin(global_invocation_id) global_id: vec3<u32>,
    @builtin(local_invocation_index) local_idx: u32,
    @builtin(workgroup_id) workgroup_id: vec3<u32>,
    @builtin(num_workgroups) num_workgroups: vec3<u32>,
) {
    let tile_id = workgroup_id.x + num_workgroups.x * workgroup_id.y;
    let group_size = {{TILE_SIZE}}u * {{TILE_SIZE}}u;

    let coord = global_id.xy;
    let viewport = vec2<u32>(shading.viewport_size.xy);
    let in_image = all(coord < viewport);
    let texel = vec2<i32>(min(coord, viewport - vec2<u32>(1u)));

    let depth = textureLoad(gbuffer_depth, texel, 0).r;
    let normal = decode_normal(textureLoad(gbuffer_normal, texel, 0).xy);
    let albedo_mask = textureLoad(gbuffer_color, texel, 0);

    var view_depth = depth;
    var background = depth <= 0.0;
    if shading.depth_mode == 0u {
        view_depth = linearize_depth(depth, shading.near_far.x, shading.near_far.y);
        background = depth >= 1.0;
    }

    // Image origin is top-left, view space is y-up
    let uv = (vec2<f32>(coord) + vec2<f32>(0.5)) * shading.viewport_size.zw;
    let ndc = vec2<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let position = vec3<f32>(ndc * shading.view_scale.xy, shading.view_scale.z) * view_depth;

    let view = safe_normalize(-position);
    let dot_vn = dot(view, normal);
    let surface = Surface(
        position,
        normal,
        view,
        dot_vn,
        acos(clamp(dot_vn, -1.0, 1.0)),
        safe_normalize(view - dot_vn * normal),
    );
    let fresnel = mix(1.0, pow(1.0 - clamp(dot_vn, 0.0, 1.0), 5.0), shading.roughness.w);
    let up = shading.view_matrix[1].xyz;
    let ambient = mix(
        shading.ambient_ground.rgb,
        shading.ambient_sky.rgb,
        clamp(dot(normal, up) * 0.5 + 0.5, 0.0, 1.0),
    );

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

    for (var i = local_idx; i < shading.light_count; i = i + group_size) {
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

    var diffuse = vec3<f32>(0.0);
    var specular = vec3<f32>(0.0);
    for (var b = 0u; b < 3u; b = b + 1u) {
        let count = min(atomicLoad(&z_count[b]), {{Z_CAPACITY}}u);
        for (var i = 0u; i < count; i = i + 1u) {
            let radiance = evaluate_light(surface, lights[z_lights[b][i]], b);
            diffuse = diffuse + radiance.diffuse;
            specular = specular + radiance.specular;
        }
    }

    if in_image {
        var lit = vec3<f32>(0.0);
        if !background {
            lit = albedo_mask.rgb * (ambient + diffuse) + albedo_mask.a * specular * fresnel;
        }
        textureStore(lit_image, vec2<i32>(coord), vec4<f32>(lit, 1.0));
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ComputeBackend, SerialBackend};
    use crate::packing::{DepthRange, TileRect};
    use crate::pipeline::gbuffer::encode_normal;
    use crate::resources::{ColorImage, DepthImage, NormalImage};
    use crate::scene::{DirectionalLight, PointLight};
    use crate::DepthMode;
    use glam::{Mat4, UVec2};

    fn flat_gbuffer(size: UVec2, depth: f32) -> GBuffer {
        GBuffer::new(
            DepthImage::filled("depth", size.x, size.y, depth),
            NormalImage::filled("normal", size.x, size.y, encode_normal(Vec3::Z)),
            ColorImage::filled("color", size.x, size.y, Vec4::new(0.5, 0.5, 0.5, 0.0)),
        )
        .unwrap()
    }

    fn shade(
        gbuffer: &GBuffer,
        lights: &[LightRecord],
        tile_depth: &[u32],
        params: &ShadingParams,
        config: &TiledConfig,
    ) -> (crate::resources::LitImage, CullingStats) {
        let tile_depth = StorageBuffer::from_words("tile depth", tile_depth);
        let size = gbuffer.size();
        let output = StorageImage::new("lit", size.x, size.y);
        let kernel = TiledShadingKernel::new(gbuffer, lights, &tile_depth, params, &output, config);
        SerialBackend::new()
            .dispatch(&kernel, kernel.dispatch_size())
            .unwrap();
        (output.to_image(), kernel.stats())
    }

    fn linear_params(size: UVec2) -> ShadingParams {
        ShadingParams {
            viewport_size: size,
            view_matrix: Mat4::IDENTITY,
            ..Default::default()
        }
        .with_depth_mode(DepthMode::Linear)
        .with_ambient(Vec3::ZERO, Vec3::ZERO)
    }

    #[test]
    fn test_lights_only_reach_their_tiles() {
        let config = TiledConfig::default()
            .with_tile_size(4)
            .with_depth_mode(DepthMode::Linear);
        let size = UVec2::new(8, 4);
        let gbuffer = flat_gbuffer(size, 0.1);
        let params = linear_params(size);
        // Camera-facing light covering only the left tile
        let light = DirectionalLight::new(-Vec3::Z, Vec3::ONE, 1.0)
            .to_record(&Mat4::IDENTITY)
            .with_tile_rect(TileRect::new(0, 1, 0, 1));
        let tile_depth = [DepthRange::FULL.pack(); 2];
        let (image, stats) = shade(&gbuffer, &[light], &tile_depth, &params, &config);

        let left = image.load(UVec2::new(1, 1)).unwrap();
        let right = image.load(UVec2::new(5, 1)).unwrap();
        assert!(left.x > 0.0);
        assert_eq!(left.w, 1.0);
        assert_eq!(right, Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(stats, CullingStats::default());
    }

    #[test]
    fn test_background_pixels_are_black() {
        let config = TiledConfig::default().with_tile_size(4);
        let size = UVec2::new(4, 4);
        let gbuffer = flat_gbuffer(size, 1.0);
        let params = ShadingParams {
            viewport_size: size,
            ..Default::default()
        };
        let light = PointLight::default().to_record(&Mat4::IDENTITY);
        let (image, _) = shade(&gbuffer, &[light], &[DepthRange::FULL.pack()], &params, &config);
        assert!(image.texels().iter().all(|&t| t == BACKGROUND_COLOR));
    }

    #[test]
    fn test_partial_tile_leaves_no_stray_writes() {
        let config = TiledConfig::default()
            .with_tile_size(4)
            .with_depth_mode(DepthMode::Linear);
        let size = UVec2::new(5, 3);
        let gbuffer = flat_gbuffer(size, 0.1);
        let params = linear_params(size);
        let light = DirectionalLight::new(-Vec3::Z, Vec3::ONE, 1.0).to_record(&Mat4::IDENTITY);
        let (image, _) = shade(&gbuffer, &[light], &[DepthRange::FULL.pack(); 2], &params, &config);
        assert_eq!(image.size(), size);
        // The column in the second tile is lit too
        assert!(image.load(UVec2::new(4, 2)).unwrap().x > 0.0);
    }

    #[test]
    fn test_shader_rejects_nan_facing() {
        // Must match `evaluate_light`, which drops NaN as well as back-facing lights
        assert!(TILED_SHADING_SHADER.contains("if !(raw_dot_ln > 0.0) {"));
        assert!(!TILED_SHADING_SHADER.contains("raw_dot_ln <= 0.0"));
    }

    #[test]
    fn test_unlit_surface_gets_ambient_only() {
        let config = TiledConfig::default()
            .with_tile_size(2)
            .with_depth_mode(DepthMode::Linear);
        let size = UVec2::new(2, 2);
        let gbuffer = flat_gbuffer(size, 0.1);
        let params = linear_params(size).with_ambient(Vec3::splat(0.2), Vec3::splat(0.2));
        let (image, _) = shade(&gbuffer, &[], &[DepthRange::FULL.pack()], &params, &config);
        for texel in image.texels() {
            assert!((texel.truncate() - Vec3::splat(0.1)).length() < 1e-6);
        }
    }
}
