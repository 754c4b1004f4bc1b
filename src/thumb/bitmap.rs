use image::{codecs::jpeg::JpegEncoder, ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};

use crate::error::DecodeError;

/// A decoded, downscaled bitmap
///
/// Pixels are tightly packed RGB8. Alpha is dropped since grid thumbnails are
/// drawn opaque, which saves a quarter of the memory per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedThumbnail {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl DecodedThumbnail {
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes this bitmap costs in the memory tier
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Copy the pixels out as an `image` buffer for further scaling or cropping
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    /// Compress for the disk tier
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::with_capacity(self.pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut bytes, quality).write_image(
            &self.pixels,
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(bytes)
    }

    /// Decompress a disk entry
    pub fn decode_jpeg(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
        Ok(Self::from_rgb(image.into_rgb8()))
    }
}
