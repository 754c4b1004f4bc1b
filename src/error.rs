/// Error types for the thumbnail pipeline
///
/// Only decode and configuration failures are modelled as types. Disk cache
/// failures stay `std::io::Error` at the store boundary and are swallowed by
/// the service, since the disk tier is an optimization.
use std::io;
use thiserror::Error;

/// Why a source resource could not be turned into a thumbnail
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The source resource no longer exists
    #[error("resource not found: {0}")]
    InvalidHandle(String),

    /// The byte stream could not be opened or read
    #[error("failed to read resource: {0}")]
    Unreadable(#[source] io::Error),

    /// The resource exists but holds no bytes
    #[error("resource is empty")]
    Empty,

    /// No decoder recognises the encoding
    #[error("unsupported image format")]
    UnsupportedFormat,

    /// The encoding was recognised but the data is damaged
    #[error("corrupt image data: {0}")]
    Corrupt(#[source] image::ImageError),
}

impl DecodeError {
    /// True when the source is gone, so cached derivatives are stale too
    pub fn is_missing(&self) -> bool {
        matches!(self, DecodeError::InvalidHandle(_))
    }

    pub(crate) fn from_open(handle: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            DecodeError::InvalidHandle(handle.to_string())
        } else {
            DecodeError::Unreadable(err)
        }
    }
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(_) => DecodeError::UnsupportedFormat,
            image::ImageError::IoError(io) => DecodeError::Unreadable(io),
            other => DecodeError::Corrupt(other),
        }
    }
}

impl From<jpeg_decoder::Error> for DecodeError {
    fn from(err: jpeg_decoder::Error) -> Self {
        match err {
            jpeg_decoder::Error::Io(io) => DecodeError::Unreadable(io),
            jpeg_decoder::Error::Unsupported(_) => DecodeError::UnsupportedFormat,
            other => DecodeError::Corrupt(image::ImageError::Decoding(
                image::error::DecodingError::new(
                    image::error::ImageFormatHint::Exact(image::ImageFormat::Jpeg),
                    other,
                ),
            )),
        }
    }
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
