/// Thumbnail pipeline
///
/// This module handles:
/// - Deriving cache keys from (handle, width, height)
/// - Two-pass downsampled decoding of source images
/// - The byte-budgeted in-memory LRU tier
/// - The size-budgeted on-disk tier with mtime-based trimming
/// - Per-key in-flight deduplication and the global decode gate
/// - The service façade tying the tiers together

pub mod bitmap;
pub mod decoder;
pub mod disk;
pub mod inflight;
pub mod key;
pub mod memory;
pub mod service;

pub use bitmap::DecodedThumbnail;
pub use decoder::{Decoder, FsResourceReader, ImageDecoder, ResourceHandle, ResourceReader};
pub use disk::{DiskStore, TrimReport};
pub use inflight::{Admission, InFlight, LoadOutcome};
pub use key::CacheKey;
pub use memory::MemoryStore;
pub use service::ThumbnailService;

#[cfg(test)]
pub(crate) mod testing;
