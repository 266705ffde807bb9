//! Light types for the scene

use crate::error::{TiledError, TiledResult};
use crate::packing::{DepthRange, TileRect};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Light type stored in [`LightRecord::flags`]; also the culling bin index.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

impl LightType {
    pub const COUNT: usize = 3;
    pub const ALL: [LightType; 3] = [LightType::Directional, LightType::Point, LightType::Spot];

    pub fn from_flags(flags: u32) -> Option<Self> {
        match flags {
            0 => Some(LightType::Directional),
            1 => Some(LightType::Point),
            2 => Some(LightType::Spot),
            _ => None,
        }
    }

    pub fn bin(self) -> usize {
        self as usize
    }
}

/// GPU-friendly light record, one per uploaded light.
///
/// std430 layout, 80 bytes. Positions and directions are in view space.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightRecord {
    /// xyz = intensity (rgb), w = 1 / radius²
    pub value_inv_sqr_radius: Vec4,
    /// xyz = position, w = 1
    pub position: Vec4,
    /// xyz = direction the light travels (directional) or cone axis (spot)
    pub direction: Vec4,
    /// x = cos(inner_angle), y = cos(outer_angle), zw = unused
    pub spot_parameters: Vec4,
    /// Packed [`DepthRange`] of the light's screen projection
    pub depth: u32,
    /// [`LightType`] as u32
    pub flags: u32,
    /// Packed [`TileRect`]
    pub quad_id: u32,
    pub _padding: u32,
}

impl LightRecord {
    /// Size of one record in the upload buffer.
    pub const SIZE: usize = std::mem::size_of::<LightRecord>();

    pub fn light_type(&self) -> Option<LightType> {
        LightType::from_flags(self.flags)
    }

    pub fn depth_range(&self) -> DepthRange {
        DepthRange::unpack(self.depth)
    }

    pub fn tile_rect(&self) -> TileRect {
        TileRect::unpack(self.quad_id)
    }

    pub fn intensity(&self) -> Vec3 {
        self.value_inv_sqr_radius.truncate()
    }

    pub fn inv_sqr_radius(&self) -> f32 {
        self.value_inv_sqr_radius.w
    }

    pub fn with_tile_rect(mut self, rect: TileRect) -> Self {
        self.quad_id = rect.pack();
        self
    }

    pub fn with_depth_range(mut self, range: DepthRange) -> Self {
        self.depth = range.pack();
        self
    }

    fn base(light_type: LightType, intensity: Vec3, inv_sqr_radius: f32) -> Self {
        Self {
            value_inv_sqr_radius: intensity.extend(inv_sqr_radius),
            position: Vec4::W,
            direction: Vec4::ZERO,
            spot_parameters: Vec4::ZERO,
            depth: DepthRange::FULL.pack(),
            flags: light_type as u32,
            quad_id: TileRect::FULL.pack(),
            _padding: 0,
        }
    }
}

/// View the records as the raw upload buffer.
pub fn lights_as_bytes(lights: &[LightRecord]) -> &[u8] {
    bytemuck::cast_slice(lights)
}

/// Decode an upload buffer into records.
///
/// The buffer must be a whole number of records; it need not be aligned.
pub fn lights_from_bytes(bytes: &[u8]) -> TiledResult<Vec<LightRecord>> {
    if bytes.len() % LightRecord::SIZE != 0 {
        return Err(TiledError::MalformedLightList(format!(
            "{} bytes is not a multiple of the {}-byte record size",
            bytes.len(),
            LightRecord::SIZE
        )));
    }
    bytes
        .chunks_exact(LightRecord::SIZE)
        .map(|chunk| {
            bytemuck::try_pod_read_unaligned(chunk)
                .map_err(|e| TiledError::MalformedLightList(e.to_string()))
        })
        .collect()
}

/// Directional light (like the sun)
#[derive(Debug, Clone)]
pub struct DirectionalLight {
    /// World-space direction the light travels
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
        }
    }

    /// Convert to a view-space record covering every tile and depth
    pub fn to_record(&self, view: &Mat4) -> LightRecord {
        let value = self.color * self.intensity;
        let mut record = LightRecord::base(LightType::Directional, value, 0.0);
        record.direction = view.transform_vector3(self.direction).extend(0.0);
        record
    }
}

/// Point light
#[derive(Debug, Clone)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            radius,
        }
    }

    /// Convert to a view-space record; quad and depth default to everything
    pub fn to_record(&self, view: &Mat4) -> LightRecord {
        let mut record = LightRecord::base(
            LightType::Point,
            self.color * self.intensity,
            inv_sqr(self.radius),
        );
        record.position = view.transform_point3(self.position).extend(1.0);
        record
    }
}

/// Spot light
#[derive(Debug, Clone)]
pub struct SpotLight {
    pub position: Vec3,
    /// World-space cone axis
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub inner_angle: f32, // radians
    pub outer_angle: f32, // radians
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            direction: -Vec3::Y,
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
            inner_angle: 0.3,
            outer_angle: 0.5,
        }
    }
}

impl SpotLight {
    pub fn new(
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        radius: f32,
        inner_angle: f32,
        outer_angle: f32,
    ) -> Self {
        Self {
            position,
            direction: direction.normalize(),
            color,
            intensity,
            radius,
            inner_angle,
            outer_angle,
        }
    }

    /// Convert to a view-space record; quad and depth default to everything
    pub fn to_record(&self, view: &Mat4) -> LightRecord {
        let mut record = LightRecord::base(
            LightType::Spot,
            self.color * self.intensity,
            inv_sqr(self.radius),
        );
        record.position = view.transform_point3(self.position).extend(1.0);
        record.direction = view
            .transform_vector3(self.direction)
            .normalize_or_zero()
            .extend(0.0);
        record.spot_parameters =
            Vec4::new(self.inner_angle.cos(), self.outer_angle.cos(), 0.0, 0.0);
        record
    }
}

fn inv_sqr(radius: f32) -> f32 {
    if radius > 0.0 {
        1.0 / (radius * radius)
    } else {
        0.0
    }
}
