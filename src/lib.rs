//! Two-tier thumbnail cache and bounded image-decode pipeline.
//!
//! [`ThumbnailService`] is the entry point: it derives a cache key per
//! (handle, width, height), serves hits from the in-memory tier, and funnels
//! misses through a per-key in-flight coordinator and a global decode gate
//! into the on-disk tier and finally the decoder.

pub mod config;
pub mod error;
pub mod media;
pub mod thumb;

pub use config::ThumbnailConfig;
pub use error::{ConfigError, DecodeError};
pub use thumb::{DecodedThumbnail, ResourceHandle, ThumbnailService};
