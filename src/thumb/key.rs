use sha2::{Digest, Sha256};
use std::fmt;

use super::decoder::ResourceHandle;

/// Extension of disk entries
pub const ENTRY_EXTENSION: &str = "jpg";

/// Identity of one cached thumbnail: which source, at which requested size
///
/// Rendered as `{handle_hash:016x}_{width}x{height}`. Every key derived from the
/// same handle shares the `{handle_hash:016x}_` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    handle_hash: u64,
    width: u32,
    height: u32,
}

impl CacheKey {
    pub fn derive(handle: &ResourceHandle, width: u32, height: u32) -> Self {
        Self {
            handle_hash: hash_handle(handle),
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether this key was derived from `handle`
    pub fn belongs_to(&self, handle: &ResourceHandle) -> bool {
        self.handle_hash == hash_handle(handle)
    }

    /// Prefix shared by every key (and disk file name) derived from `handle`
    pub fn handle_prefix(handle: &ResourceHandle) -> String {
        format!("{:016x}_", hash_handle(handle))
    }

    /// Name of the disk entry for this key
    pub fn file_name(&self) -> String {
        format!("{}.{}", self, ENTRY_EXTENSION)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}_{}x{}", self.handle_hash, self.width, self.height)
    }
}

/// First 8 bytes of SHA-256 over the handle URI; stable across runs
fn hash_handle(handle: &ResourceHandle) -> u64 {
    let digest = Sha256::digest(handle.as_str().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
