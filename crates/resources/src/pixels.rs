//! Pixel buffers and their sources.
//!
//! Uploads always copy [`PixelFormat::Rgba8`] rows. Anything else is
//! converted once, in place, by [`PixelSource::ensure_canonical`].

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage};
use tracing::{debug, info};

use crate::error::{ResourceError, ResourceResult};

/// Layout of one pixel in a [`Pixels`] buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Red, green, blue, alpha; the canonical upload layout
    Rgba8,
    /// Blue, green, red, alpha
    Bgra8,
    /// Red, green, blue
    Rgb8,
    /// Single luminance channel
    Luma8,
    /// Luminance and alpha
    LumaAlpha8,
}

impl PixelFormat {
    /// Size of one pixel in bytes.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::LumaAlpha8 => 2,
            PixelFormat::Luma8 => 1,
        }
    }

    /// Returns true for the layout uploads consume directly.
    pub fn is_canonical(self) -> bool {
        self == PixelFormat::Rgba8
    }
}

/// Tightly packed pixel rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pixels {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Pixels {
    /// Wraps `data` as `width` x `height` pixels of `format`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidData`] if either dimension is zero or
    /// `data` is not exactly `width * height * bytes_per_pixel` long.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> ResourceResult<Self> {
        if width == 0 || height == 0 {
            return Err(ResourceError::InvalidData(format!(
                "{}x{} image has no pixels",
                width, height
            )));
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel() as usize;
        if data.len() != expected {
            return Err(ResourceError::InvalidData(format!(
                "{}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row.
    pub fn pitch(&self) -> u64 {
        u64::from(self.width) * u64::from(self.format.bytes_per_pixel())
    }

    /// Total size in bytes, `pitch * height`.
    pub fn byte_len(&self) -> u64 {
        self.pitch() * u64::from(self.height)
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Converts to RGBA8, consuming the original buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidData`] if the buffer cannot be
    /// interpreted as an image of its declared format.
    pub fn into_rgba8(self) -> ResourceResult<Self> {
        let (width, height) = (self.width, self.height);
        let rgba = match self.format {
            PixelFormat::Rgba8 => return Ok(self),
            PixelFormat::Bgra8 => {
                let mut data = self.data;
                for px in data.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                data
            }
            PixelFormat::Rgb8 => RgbImage::from_raw(width, height, self.data)
                .map(|img| DynamicImage::ImageRgb8(img).to_rgba8().into_raw())
                .ok_or_else(|| raw_mismatch(width, height, PixelFormat::Rgb8))?,
            PixelFormat::Luma8 => GrayImage::from_raw(width, height, self.data)
                .map(|img| DynamicImage::ImageLuma8(img).to_rgba8().into_raw())
                .ok_or_else(|| raw_mismatch(width, height, PixelFormat::Luma8))?,
            PixelFormat::LumaAlpha8 => GrayAlphaImage::from_raw(width, height, self.data)
                .map(|img| DynamicImage::ImageLumaA8(img).to_rgba8().into_raw())
                .ok_or_else(|| raw_mismatch(width, height, PixelFormat::LumaAlpha8))?,
        };
        Self::new(width, height, PixelFormat::Rgba8, rgba)
    }

    /// Decodes an image file into RGBA8 pixels.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::FileNotFound`] if `path` does not exist, or an
    /// image error if decoding fails.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }
        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        info!("Loaded image {:?} ({}x{})", path, width, height);
        Self::new(width, height, PixelFormat::Rgba8, rgba.into_raw())
    }
}

fn raw_mismatch(width: u32, height: u32, format: PixelFormat) -> ResourceError {
    ResourceError::InvalidData(format!(
        "buffer does not hold {}x{} {:?} pixels",
        width, height, format
    ))
}

/// Pixels that are either resident or loaded lazily from a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PixelSource {
    /// Pixels already in memory
    Loaded(Pixels),
    /// Image file decoded on first use
    File(PathBuf),
}

impl PixelSource {
    /// Returns true if the pixels are resident in the canonical layout.
    pub fn is_canonical(&self) -> bool {
        matches!(self, PixelSource::Loaded(pixels) if pixels.format().is_canonical())
    }

    /// Makes the pixels resident as RGBA8 and returns them.
    ///
    /// A file source is decoded; a resident buffer in another layout is
    /// converted. Either way the source is replaced by the converted pixels
    /// and the original is dropped. On error the source is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the pixel data cannot
    /// be converted.
    pub fn ensure_canonical(&mut self) -> ResourceResult<&Pixels> {
        let converted = match self {
            PixelSource::Loaded(pixels) if pixels.format().is_canonical() => None,
            PixelSource::Loaded(pixels) => {
                debug!("Converting {:?} pixels to RGBA8", pixels.format());
                Some(pixels.clone().into_rgba8()?)
            }
            PixelSource::File(path) => Some(Pixels::load(path)?),
        };
        if let Some(pixels) = converted {
            *self = PixelSource::Loaded(pixels);
        }
        match self {
            PixelSource::Loaded(pixels) => Ok(pixels),
            PixelSource::File(path) => Err(ResourceError::InvalidData(format!(
                "{:?} was not loaded",
                path
            ))),
        }
    }
}

impl From<Pixels> for PixelSource {
    fn from(pixels: Pixels) -> Self {
        PixelSource::Loaded(pixels)
    }
}

impl From<PathBuf> for PixelSource {
    fn from(path: PathBuf) -> Self {
        PixelSource::File(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::LumaAlpha8.bytes_per_pixel(), 2);
        assert_eq!(PixelFormat::Luma8.bytes_per_pixel(), 1);
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(matches!(
            Pixels::new(2, 2, PixelFormat::Rgb8, vec![0; 11]),
            Err(ResourceError::InvalidData(_))
        ));
        assert!(Pixels::new(0, 2, PixelFormat::Luma8, Vec::new()).is_err());
    }

    #[test]
    fn test_pitch_and_byte_len() {
        let pixels = Pixels::new(3, 2, PixelFormat::Rgb8, vec![0; 18]).unwrap();
        assert_eq!(pixels.pitch(), 9);
        assert_eq!(pixels.byte_len(), 18);
    }

    #[test]
    fn test_bgra_swizzles_to_rgba() {
        let pixels = Pixels::new(1, 1, PixelFormat::Bgra8, vec![1, 2, 3, 4]).unwrap();
        let rgba = pixels.into_rgba8().unwrap();
        assert_eq!(rgba.format(), PixelFormat::Rgba8);
        assert_eq!(rgba.data(), &[3, 2, 1, 4]);
    }

    #[test]
    fn test_luma_expands_to_opaque_gray() {
        let pixels = Pixels::new(2, 1, PixelFormat::Luma8, vec![10, 200]).unwrap();
        let rgba = pixels.into_rgba8().unwrap();
        assert_eq!(rgba.data(), &[10, 10, 10, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn test_ensure_canonical_replaces_source() {
        let pixels = Pixels::new(1, 1, PixelFormat::Rgb8, vec![7, 8, 9]).unwrap();
        let mut source = PixelSource::from(pixels);
        assert!(!source.is_canonical());

        let converted = source.ensure_canonical().unwrap();
        assert_eq!(converted.data(), &[7, 8, 9, 255]);
        assert!(source.is_canonical());
    }

    #[test]
    fn test_missing_file_leaves_source_untouched() {
        let path = PathBuf::from("does/not/exist.png");
        let mut source = PixelSource::File(path.clone());
        assert!(matches!(
            source.ensure_canonical(),
            Err(ResourceError::FileNotFound(_))
        ));
        assert_eq!(source, PixelSource::File(path));
    }
}
