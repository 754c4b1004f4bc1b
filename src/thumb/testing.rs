//! Test doubles shared by the pipeline's unit tests

use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, ErrorKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::bitmap::DecodedThumbnail;
use super::decoder::{Decoder, ImageDecoder, ReadSeek, ResourceHandle, ResourceReader};
use crate::error::DecodeError;

/// PNG-encoded gradient of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// JPEG-encoded gradient of the given size
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
    bytes.into_inner()
}

/// Resource reader over in-memory blobs
#[derive(Default)]
pub struct MemoryReader {
    blobs: Mutex<HashMap<ResourceHandle, Vec<u8>>>,
}

impl MemoryReader {
    pub fn with(self, handle: &ResourceHandle, bytes: Vec<u8>) -> Self {
        self.blobs.lock().insert(handle.clone(), bytes);
        self
    }

    pub fn remove(&self, handle: &ResourceHandle) {
        self.blobs.lock().remove(handle);
    }
}

impl ResourceReader for MemoryReader {
    fn open(&self, handle: &ResourceHandle) -> std::io::Result<Box<dyn ReadSeek>> {
        match self.blobs.lock().get(handle) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(std::io::Error::new(ErrorKind::NotFound, handle.to_string())),
        }
    }
}

/// Wraps a real decoder, counting calls and tracking peak concurrency
pub struct CountingDecoder {
    inner: ImageDecoder,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingDecoder {
    pub fn new(reader: Arc<MemoryReader>, delay: Duration) -> Self {
        Self {
            inner: ImageDecoder::new(reader),
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Decoder for CountingDecoder {
    fn decode(
        &self,
        handle: &ResourceHandle,
        target_width: u32,
        target_height: u32,
    ) -> Result<DecodedThumbnail, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        std::thread::sleep(self.delay);
        let result = self.inner.decode(handle, target_width, target_height);

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
