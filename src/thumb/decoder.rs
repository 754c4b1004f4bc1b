/// Two-pass thumbnail decoding
///
/// Pass 1 reads only the image header to learn the source dimensions. From
/// those a power-of-two sample size is chosen so the output never drops below
/// the requested size. Pass 2 decodes and downsamples by that factor. JPEG
/// sources are scaled inside the decoder (up to 1/8), so the full-resolution
/// buffer is never allocated; other formats decode fully and then resize.
use image::{imageops, imageops::FilterType, ImageFormat, ImageReader, RgbImage};
use jpeg_decoder::PixelFormat;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::bitmap::DecodedThumbnail;
use crate::error::DecodeError;

const FILE_SCHEME: &str = "file://";

/// Opaque, cheaply clonable reference to a source image
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(Arc<str>);

impl ResourceHandle {
    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self(uri.into())
    }

    /// `file://` handle for a path on the local filesystem, or `None` if the
    /// path is not valid UTF-8 and so could not be mapped back
    pub fn from_path(path: &Path) -> Option<Self> {
        path.to_str().map(|path| Self::new(format!("{}{}", FILE_SCHEME, path)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The local path behind a `file://` handle
    pub fn to_file_path(&self) -> Option<PathBuf> {
        self.0.strip_prefix(FILE_SCHEME).map(PathBuf::from)
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHandle({})", self.0)
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A seekable byte stream over a source resource
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Opens byte streams for resource handles
pub trait ResourceReader: Send + Sync {
    /// Open a fresh stream positioned at the start of the resource.
    /// A missing resource must be reported as `io::ErrorKind::NotFound`.
    fn open(&self, handle: &ResourceHandle) -> std::io::Result<Box<dyn ReadSeek>>;
}

/// Reads `file://` handles from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsResourceReader;

impl ResourceReader for FsResourceReader {
    fn open(&self, handle: &ResourceHandle) -> std::io::Result<Box<dyn ReadSeek>> {
        let path = handle.to_file_path().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a file handle: {}", handle),
            )
        })?;
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

/// Turns a source resource into a thumbnail no smaller than the requested size
pub trait Decoder: Send + Sync {
    fn decode(
        &self,
        handle: &ResourceHandle,
        target_width: u32,
        target_height: u32,
    ) -> Result<DecodedThumbnail, DecodeError>;
}

/// `Decoder` backed by the `image` crate
#[derive(Clone)]
pub struct ImageDecoder {
    reader: Arc<dyn ResourceReader>,
}

impl ImageDecoder {
    pub fn new(reader: Arc<dyn ResourceReader>) -> Self {
        Self { reader }
    }

    /// Decoder over local `file://` handles
    pub fn filesystem() -> Self {
        Self::new(Arc::new(FsResourceReader))
    }

    fn open(&self, handle: &ResourceHandle) -> Result<Box<dyn ReadSeek>, DecodeError> {
        self.reader
            .open(handle)
            .map_err(|e| DecodeError::from_open(handle.as_str(), e))
    }

    /// Pass 1: header only, no pixel allocation
    fn read_bounds(&self, handle: &ResourceHandle) -> Result<(u32, u32, ImageFormat), DecodeError> {
        let mut stream = self.open(handle)?;
        let len = stream.seek(SeekFrom::End(0)).map_err(DecodeError::Unreadable)?;
        if len == 0 {
            return Err(DecodeError::Empty);
        }
        stream.rewind().map_err(DecodeError::Unreadable)?;

        let reader = ImageReader::new(BufReader::new(stream))
            .with_guessed_format()
            .map_err(DecodeError::Unreadable)?;
        let Some(format) = reader.format() else {
            return Err(DecodeError::UnsupportedFormat);
        };
        let (width, height) = reader.into_dimensions()?;
        Ok((width, height, format))
    }

    /// Full-resolution decode, for formats without scaled decoding
    fn decode_full(&self, handle: &ResourceHandle) -> Result<RgbImage, DecodeError> {
        let image = ImageReader::new(BufReader::new(self.open(handle)?))
            .with_guessed_format()
            .map_err(DecodeError::Unreadable)?
            .decode()?;
        Ok(image.into_rgb8())
    }
}

impl fmt::Debug for ImageDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageDecoder").finish_non_exhaustive()
    }
}

impl Decoder for ImageDecoder {
    fn decode(
        &self,
        handle: &ResourceHandle,
        target_width: u32,
        target_height: u32,
    ) -> Result<DecodedThumbnail, DecodeError> {
        let (src_width, src_height, format) = self.read_bounds(handle)?;
        if src_width == 0 || src_height == 0 {
            return Err(DecodeError::Empty);
        }
        let sample = sample_size(src_width, src_height, target_width, target_height);
        let (out_width, out_height) = sampled_dimensions(src_width, src_height, sample);

        // Pass 2 on a fresh stream
        let scaled = if format == ImageFormat::Jpeg && sample > 1 {
            decode_jpeg_scaled(self.open(handle)?, out_width, out_height)?
        } else {
            None
        };
        let rgb = match scaled {
            Some(rgb) => rgb,
            None => self.decode_full(handle)?,
        };
        let rgb = if rgb.dimensions() == (out_width, out_height) {
            rgb
        } else {
            imageops::resize(&rgb, out_width, out_height, FilterType::Triangle)
        };

        tracing::debug!(
            "Decoded {} from {}x{} at sample {} -> {}x{}",
            handle,
            src_width,
            src_height,
            sample,
            rgb.width(),
            rgb.height()
        );
        Ok(DecodedThumbnail::from_rgb(rgb))
    }
}

/// Decode a JPEG stream scaled in the DCT domain to the smallest of 1/1, 1/2,
/// 1/4 or 1/8 that still covers `width` x `height`.
///
/// Returns `None` for pixel formats without a direct RGB mapping (CMYK,
/// 16-bit luma); the caller falls back to a full decode.
pub fn decode_jpeg_scaled(
    stream: impl Read,
    width: u32,
    height: u32,
) -> Result<Option<RgbImage>, DecodeError> {
    let mut decoder = jpeg_decoder::Decoder::new(BufReader::new(stream));
    let (scaled_width, scaled_height) = decoder.scale(
        u16::try_from(width).unwrap_or(u16::MAX),
        u16::try_from(height).unwrap_or(u16::MAX),
    )?;
    let Some(info) = decoder.info() else {
        return Ok(None);
    };

    let pixels = match info.pixel_format {
        PixelFormat::RGB24 => decoder.decode()?,
        PixelFormat::L8 => decoder
            .decode()?
            .into_iter()
            .flat_map(|luma| [luma, luma, luma])
            .collect(),
        PixelFormat::L16 | PixelFormat::CMYK32 => return Ok(None),
    };
    tracing::trace!("JPEG scaled decode to {}x{}", scaled_width, scaled_height);
    Ok(RgbImage::from_raw(
        u32::from(scaled_width),
        u32::from(scaled_height),
        pixels,
    ))
}

/// Largest power-of-two downsample factor that keeps both axes at or above
/// the requested size
pub fn sample_size(src_width: u32, src_height: u32, req_width: u32, req_height: u32) -> u32 {
    let req_width = req_width.max(1);
    let req_height = req_height.max(1);
    let mut sample = 1;

    if src_height > req_height || src_width > req_width {
        let half_height = src_height / 2;
        let half_width = src_width / 2;
        while half_height / sample >= req_height && half_width / sample >= req_width {
            sample *= 2;
        }
    }
    sample
}

/// Output dimensions for a source decoded at `sample`
pub fn sampled_dimensions(src_width: u32, src_height: u32, sample: u32) -> (u32, u32) {
    ((src_width / sample).max(1), (src_height / sample).max(1))
}
