//! Reflectance model evaluated per pixel by the shading kernel
//!
//! Oren-Nayar diffuse plus a Cook-Torrance specular lobe with a Beckmann
//! distribution. Every division is guarded by [`SHADING_EPSILON`], so any
//! finite input gives a finite color.

use crate::scene::{Camera, LightRecord, LightType};
use crate::DepthMode;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec2, Vec3};
use std::ops::AddAssign;

/// Lower bound for every denominator in the BRDF.
pub const SHADING_EPSILON: f32 = 1e-4;

/// Global shading parameters, constant for one dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct ShadingParams {
    pub ambient_ground: Vec3,
    pub ambient_sky: Vec3,
    /// Oren-Nayar `A`
    pub roughness_a: f32,
    /// Oren-Nayar `B`
    pub roughness_b: f32,
    /// Beckmann `m²`
    pub sqr_roughness: f32,
    /// 0 disables the Fresnel falloff, 1 applies it fully
    pub fresnel_coeff: f32,
    pub viewport_size: UVec2,
    pub view_matrix: Mat4,
    /// View-space top-right corner of the far plane
    pub view_scale: Vec3,
    pub depth_mode: DepthMode,
    pub near: f32,
    pub far: f32,
}

impl Default for ShadingParams {
    fn default() -> Self {
        let camera = Camera::default();
        Self {
            ambient_ground: Vec3::new(0.03, 0.025, 0.02),
            ambient_sky: Vec3::new(0.05, 0.06, 0.08),
            roughness_a: 1.0,
            roughness_b: 0.0,
            sqr_roughness: 0.09,
            fresnel_coeff: 1.0,
            viewport_size: UVec2::new(1280, 720),
            view_matrix: camera.view_matrix(),
            view_scale: camera.projection.view_scale(),
            depth_mode: DepthMode::Hardware,
            near: camera.projection.near,
            far: camera.projection.far,
        }
        .with_surface_roughness(0.3)
    }
}

impl ShadingParams {
    /// Take the view matrix and clip range from a camera.
    pub fn from_camera(camera: &Camera, viewport_size: UVec2) -> Self {
        Self {
            viewport_size,
            view_matrix: camera.view_matrix(),
            view_scale: camera.projection.view_scale(),
            near: camera.projection.near,
            far: camera.projection.far,
            ..Default::default()
        }
    }

    /// Derive the Oren-Nayar and Beckmann coefficients from one roughness
    /// value `sigma`.
    pub fn with_surface_roughness(mut self, sigma: f32) -> Self {
        let s2 = sigma * sigma;
        self.roughness_a = 1.0 - 0.5 * s2 / (s2 + 0.33);
        self.roughness_b = 0.45 * s2 / (s2 + 0.09);
        self.sqr_roughness = s2.max(SHADING_EPSILON);
        self
    }

    pub fn with_ambient(mut self, ground: Vec3, sky: Vec3) -> Self {
        self.ambient_ground = ground;
        self.ambient_sky = sky;
        self
    }

    pub fn with_fresnel(mut self, coeff: f32) -> Self {
        self.fresnel_coeff = coeff;
        self
    }

    pub fn with_depth_mode(mut self, depth_mode: DepthMode) -> Self {
        self.depth_mode = depth_mode;
        self
    }

    /// Uniform block for the WGSL shading kernel.
    pub fn uniform_data(&self, light_count: u32) -> ShadingUniforms {
        let size = self.viewport_size.as_vec2().max(Vec2::ONE);
        ShadingUniforms {
            view_matrix: self.view_matrix.to_cols_array_2d(),
            ambient_ground: self.ambient_ground.extend(1.0).to_array(),
            ambient_sky: self.ambient_sky.extend(1.0).to_array(),
            view_scale: self.view_scale.extend(0.0).to_array(),
            viewport_size: [size.x, size.y, 1.0 / size.x, 1.0 / size.y],
            roughness: [
                self.roughness_a,
                self.roughness_b,
                self.sqr_roughness,
                self.fresnel_coeff,
            ],
            near_far: [self.near, self.far],
            light_count,
            depth_mode: match self.depth_mode {
                DepthMode::Hardware => 0,
                DepthMode::Linear => 1,
            },
        }
    }
}

/// GPU-side layout of [`ShadingParams`] (160 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ShadingUniforms {
    pub view_matrix: [[f32; 4]; 4],
    pub ambient_ground: [f32; 4],
    pub ambient_sky: [f32; 4],
    pub view_scale: [f32; 4],
    /// xy = size, zw = 1 / size
    pub viewport_size: [f32; 4],
    /// x = A, y = B, z = m², w = fresnel coefficient
    pub roughness: [f32; 4],
    pub near_far: [f32; 2],
    pub light_count: u32,
    pub depth_mode: u32,
}

/// Per-pixel terms shared by every light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub position: Vec3,
    pub normal: Vec3,
    pub view: Vec3,
    pub dot_vn: f32,
    pub angle_vn: f32,
    /// View vector projected onto the tangent plane, normalized
    pub proj_vp: Vec3,
    pub fresnel: f32,
}

impl SurfacePoint {
    pub fn new(position: Vec3, normal: Vec3, params: &ShadingParams) -> Self {
        let view = (-position).normalize_or_zero();
        let dot_vn = view.dot(normal);
        Self {
            position,
            normal,
            view,
            dot_vn,
            angle_vn: dot_vn.clamp(-1.0, 1.0).acos(),
            proj_vp: (view - dot_vn * normal).normalize_or_zero(),
            fresnel: fresnel_term(dot_vn, params.fresnel_coeff),
        }
    }
}

/// Diffuse and specular light accumulated at one pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Radiance {
    pub diffuse: Vec3,
    pub specular: Vec3,
}

impl AddAssign for Radiance {
    fn add_assign(&mut self, rhs: Self) {
        self.diffuse += rhs.diffuse;
        self.specular += rhs.specular;
    }
}

/// `mix(1, (1 - saturate(dotVN))^5, coeff)`
pub fn fresnel_term(dot_vn: f32, coeff: f32) -> f32 {
    let p = (1.0 - dot_vn.clamp(0.0, 1.0)).powi(5);
    1.0 + (p - 1.0) * coeff
}

/// Blend ground and sky by how much the normal points at world up.
///
/// Column 1 of the view matrix is world up expressed in view space.
pub fn ambient_hemisphere(normal: Vec3, view_matrix: &Mat4, ground: Vec3, sky: Vec3) -> Vec3 {
    let up = view_matrix.y_axis.truncate();
    let t = (normal.dot(up) * 0.5 + 0.5).clamp(0.0, 1.0);
    ground.lerp(sky, t)
}

/// `max(1 - sqrt(sqrDistance * invSqrRadius), 0)²`
pub fn omni_falloff(sqr_distance: f32, inv_sqr_radius: f32) -> f32 {
    let f = (1.0 - (sqr_distance * inv_sqr_radius).sqrt()).max(0.0);
    f * f
}

/// Distance falloff times the cone term.
///
/// `spot` holds `(cos inner, cos outer)`; `l` points from the surface to the light.
pub fn spot_attenuation(
    sqr_distance: f32,
    inv_sqr_radius: f32,
    direction: Vec3,
    l: Vec3,
    spot: Vec2,
) -> f32 {
    let cos_angle = (-l).dot(direction);
    let cone = ((cos_angle - spot.y) / (spot.x - spot.y).max(SHADING_EPSILON)).clamp(0.0, 1.0);
    omni_falloff(sqr_distance, inv_sqr_radius) * cone
}

fn oren_nayar(surface: &SurfacePoint, l: Vec3, dot_ln: f32, params: &ShadingParams) -> f32 {
    let angle_ln = dot_ln.clamp(-1.0, 1.0).acos();
    let alpha = surface.angle_vn.max(angle_ln);
    let beta = surface.angle_vn.min(angle_ln);
    let c = alpha.sin() * beta.tan();

    let proj_lp = (l - dot_ln * surface.normal).normalize_or_zero();
    let gamma = surface.proj_vp.dot(proj_lp).max(0.0);

    dot_ln * (params.roughness_a + params.roughness_b * c * gamma)
}

fn cook_torrance(surface: &SurfacePoint, l: Vec3, dot_ln: f32, params: &ShadingParams) -> f32 {
    let h = (l + surface.view).normalize_or_zero();
    let dot_hn = h.dot(surface.normal);
    let dot_hv = h.dot(surface.view);

    let geo = surface.dot_vn.min(dot_ln);
    let geo = (2.0 * geo * dot_hn / dot_hv.max(SHADING_EPSILON)).min(1.0);

    let dot_hn2 = dot_hn * dot_hn;
    let dot_hn4 = dot_hn2 * dot_hn2;
    let m2 = params.sqr_roughness;
    let r = ((dot_hn2 - 1.0) / (m2 * dot_hn2).max(SHADING_EPSILON)).exp()
        / (m2 * dot_hn4).max(SHADING_EPSILON);

    (geo * r / surface.dot_vn.max(SHADING_EPSILON)).max(0.0)
}

/// Contribution of one light, or `None` when it faces away from the surface.
pub fn evaluate_light(
    surface: &SurfacePoint,
    light: &LightRecord,
    light_type: LightType,
    params: &ShadingParams,
) -> Option<Radiance> {
    let to_light = match light_type {
        LightType::Directional => -light.direction.truncate(),
        LightType::Point | LightType::Spot => light.position.truncate() - surface.position,
    };

    let dot_ln = to_light.dot(surface.normal);
    // Negated so NaN is rejected as well
    if !(dot_ln > 0.0) {
        return None;
    }

    let sqr_distance = to_light.length_squared();
    let inv_distance = 1.0 / sqr_distance.sqrt();
    let l = to_light * inv_distance;
    let dot_ln = dot_ln * inv_distance;

    let diffuse_term = oren_nayar(surface, l, dot_ln, params);
    let specular_term = cook_torrance(surface, l, dot_ln, params);

    let attenuation = match light_type {
        LightType::Directional => 1.0,
        LightType::Point => omni_falloff(sqr_distance, light.inv_sqr_radius()),
        LightType::Spot => spot_attenuation(
            sqr_distance,
            light.inv_sqr_radius(),
            light.direction.truncate(),
            l,
            light.spot_parameters.truncate().truncate(),
        ),
    };
    let intensity = light.intensity() * attenuation;

    Some(Radiance {
        diffuse: diffuse_term * intensity,
        specular: specular_term * intensity,
    })
}

/// `albedo * (ambient + diffuse) + mask * specular * fresnel`
pub fn compose(
    albedo: Vec3,
    mask: f32,
    ambient: Vec3,
    radiance: &Radiance,
    fresnel: f32,
) -> Vec3 {
    albedo * (ambient + radiance.diffuse) + mask * radiance.specular * fresnel
}
