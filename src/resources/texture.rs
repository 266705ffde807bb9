//! Images consumed and produced by the kernels

use crate::error::{TiledError, TiledResult};
use glam::{UVec2, Vec2, Vec4};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

/// Read-only 2D image, row-major with the origin at the top-left.
#[derive(Debug, Clone, PartialEq)]
pub struct Image2D<T> {
    name: String,
    width: u32,
    height: u32,
    texels: Vec<T>,
}

/// Single-channel depth, normalized or linear depending on the depth mode.
pub type DepthImage = Image2D<f32>;
/// Two-channel encoded view-space normals.
pub type NormalImage = Image2D<Vec2>;
/// RGB albedo with the specular mask in alpha.
pub type ColorImage = Image2D<Vec4>;
/// Lit output color, alpha fixed to 1.
pub type LitImage = Image2D<Vec4>;

impl<T: Copy> Image2D<T> {
    /// Wrap existing texels; `texels.len()` must equal `width * height`.
    pub fn new(name: &str, width: u32, height: u32, texels: Vec<T>) -> TiledResult<Self> {
        let expected = width as usize * height as usize;
        if texels.len() != expected {
            return Err(TiledError::BufferSizeMismatch {
                name: name.to_string(),
                expected,
                actual: texels.len(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            texels,
        })
    }

    pub fn filled(name: &str, width: u32, height: u32, value: T) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            texels: vec![value; width as usize * height as usize],
        }
    }

    /// Build an image by evaluating `f(x, y)` for every texel.
    pub fn from_fn(name: &str, width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut texels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                texels.push(f(x, y));
            }
        }
        Self {
            name: name.to_string(),
            width,
            height,
            texels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    pub fn contains(&self, coord: UVec2) -> bool {
        coord.x < self.width && coord.y < self.height
    }

    /// Texel at `coord`, `None` outside the image.
    pub fn load(&self, coord: UVec2) -> Option<T> {
        if self.contains(coord) {
            Some(self.texels[(coord.y * self.width + coord.x) as usize])
        } else {
            None
        }
    }

    pub fn set(&mut self, coord: UVec2, value: T) {
        if self.contains(coord) {
            self.texels[(coord.y * self.width + coord.x) as usize] = value;
        }
    }

    pub fn texels(&self) -> &[T] {
        &self.texels
    }

    /// Fail unless the image is exactly `expected` texels large.
    pub fn check_size(&self, expected: UVec2) -> TiledResult<()> {
        if self.size() != expected {
            return Err(TiledError::ImageSizeMismatch {
                name: self.name.clone(),
                expected_width: expected.x,
                expected_height: expected.y,
                actual_width: self.width,
                actual_height: self.height,
            });
        }
        Ok(())
    }
}

impl Image2D<Vec4> {
    /// Clamp to `[0, 1]`, encode to sRGB and quantize to 8 bits.
    pub fn to_rgba8(&self) -> image::RgbaImage {
        image::RgbaImage::from_fn(self.width, self.height, |x, y| {
            let texel = self.texels[(y * self.width + x) as usize];
            image::Rgba([
                encode_srgb(texel.x),
                encode_srgb(texel.y),
                encode_srgb(texel.z),
                (texel.w.clamp(0.0, 1.0) * 255.0).round() as u8,
            ])
        })
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> TiledResult<()> {
        let path = path.as_ref();
        self.to_rgba8()
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| TiledError::ImageWrite(format!("{}: {e}", path.display())))?;
        log::info!("wrote '{}' to {}", self.name, path.display());
        Ok(())
    }
}

fn encode_srgb(linear: f32) -> u8 {
    let c = linear.clamp(0.0, 1.0);
    let encoded = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}

/// Write-only RGBA32F image shared by all workgroups of a dispatch.
#[derive(Debug)]
pub struct StorageImage {
    name: String,
    width: u32,
    height: u32,
    texels: Box<[[AtomicU32; 4]]>,
}

impl StorageImage {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        log::trace!("creating storage image '{}' ({}x{})", name, width, height);
        Self {
            name: name.to_string(),
            width,
            height,
            texels: (0..width as usize * height as usize)
                .map(|_| Default::default())
                .collect(),
        }
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Store one texel; stores outside the image are discarded.
    pub fn store(&self, coord: UVec2, value: Vec4) {
        if coord.x >= self.width || coord.y >= self.height {
            return;
        }
        let texel = &self.texels[(coord.y * self.width + coord.x) as usize];
        for (channel, v) in texel.iter().zip(value.to_array()) {
            channel.store(v.to_bits(), Ordering::Relaxed);
        }
    }

    /// Read the stored texels back once the dispatch has completed.
    pub fn to_image(&self) -> LitImage {
        let texels = self
            .texels
            .iter()
            .map(|texel| {
                Vec4::new(
                    f32::from_bits(texel[0].load(Ordering::Relaxed)),
                    f32::from_bits(texel[1].load(Ordering::Relaxed)),
                    f32::from_bits(texel[2].load(Ordering::Relaxed)),
                    f32::from_bits(texel[3].load(Ordering::Relaxed)),
                )
            })
            .collect();
        Image2D {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            texels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_texel_count() {
        assert!(DepthImage::new("depth", 2, 2, vec![0.0; 4]).is_ok());
        assert!(DepthImage::new("depth", 2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_from_fn_is_row_major() {
        let image = Image2D::from_fn("ids", 3, 2, |x, y| y * 3 + x);
        assert_eq!(image.texels(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(image.load(UVec2::new(2, 1)), Some(5));
        assert_eq!(image.load(UVec2::new(3, 0)), None);
    }

    #[test]
    fn test_check_size() {
        let image = DepthImage::filled("depth", 8, 4, 0.5);
        assert!(image.check_size(UVec2::new(8, 4)).is_ok());
        let err = image.check_size(UVec2::new(4, 8)).unwrap_err();
        assert!(matches!(err, TiledError::ImageSizeMismatch { .. }));
    }

    #[test]
    fn test_storage_image_roundtrip() {
        let storage = StorageImage::new("lit", 2, 2);
        storage.store(UVec2::new(1, 0), Vec4::new(0.25, 0.5, 0.75, 1.0));
        storage.store(UVec2::new(5, 5), Vec4::ONE);
        let image = storage.to_image();
        assert_eq!(image.load(UVec2::new(1, 0)), Some(Vec4::new(0.25, 0.5, 0.75, 1.0)));
        assert_eq!(image.load(UVec2::new(0, 0)), Some(Vec4::ZERO));
    }

    #[test]
    fn test_to_rgba8_clamps_and_encodes() {
        let image = LitImage::from_fn("lit", 2, 1, |x, _| {
            if x == 0 {
                Vec4::new(2.0, 0.0, -1.0, 1.0)
            } else {
                Vec4::new(0.5, 0.5, 0.5, 1.0)
            }
        });
        let rgba = image.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0).0, [255, 0, 0, 255]);
        // linear 0.5 is about 188 in sRGB
        assert_eq!(rgba.get_pixel(1, 0).0[0], 188);
    }
}
