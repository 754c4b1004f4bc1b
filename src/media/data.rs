/// Shared data structures for the media index
///
/// These structs represent what the index hands to callers:
/// folders for the top-level grid and media records inside a folder.
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

use crate::thumb::ResourceHandle;

/// Files at or below this size are treated as degenerate
pub const DEFAULT_MIN_BYTES: u64 = 1024;

/// Represents a single media item
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    /// Stable ID derived from the file path
    pub id: u64,
    /// Handle used to request thumbnails
    pub handle: ResourceHandle,
    /// Filename only (e.g., "IMG_0001.jpg")
    pub display_name: String,
    /// Full path to the file
    pub path: PathBuf,
    /// ID of the containing folder
    pub folder_id: String,
    /// File size in bytes
    pub size: u64,
    /// Pixel width, 0 if the header could not be read
    pub width: u32,
    /// Pixel height, 0 if the header could not be read
    pub height: u32,
    pub mime_type: Option<String>,
    /// When the file was added (its modification time)
    pub date_added: DateTime<Utc>,
    /// Playback length; only set for video
    pub duration: Option<Duration>,
}

/// Represents a folder holding at least one media item
#[derive(Debug, Clone, PartialEq)]
pub struct FolderSummary {
    pub id: String,
    /// Directory name (e.g., "Camera")
    pub name: String,
    /// Number of media items directly inside the folder
    pub count: usize,
    /// Full path to the folder
    pub path: PathBuf,
    /// Most recently added item, used as the folder's cover
    pub cover: ResourceHandle,
}

/// Excludes records that make no sense in a thumbnail grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFilter {
    /// Records must be strictly larger than this
    pub min_bytes: u64,
}

impl Default for MediaFilter {
    fn default() -> Self {
        Self {
            min_bytes: DEFAULT_MIN_BYTES,
        }
    }
}

impl MediaFilter {
    pub fn accepts(&self, record: &MediaRecord) -> bool {
        record.width > 0 && record.height > 0 && record.size > self.min_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size: u64, width: u32, height: u32) -> MediaRecord {
        MediaRecord {
            id: 1,
            handle: ResourceHandle::new("file:///a.jpg"),
            display_name: "a.jpg".into(),
            path: PathBuf::from("/a.jpg"),
            folder_id: "f".into(),
            size,
            width,
            height,
            mime_type: Some("image/jpeg".into()),
            date_added: Utc::now(),
            duration: None,
        }
    }

    #[test]
    fn test_filter_excludes_degenerate_records() {
        let filter = MediaFilter::default();
        assert!(filter.accepts(&record(2048, 10, 10)));
        assert!(!filter.accepts(&record(1024, 10, 10)));
        assert!(!filter.accepts(&record(2048, 0, 10)));
        assert!(!filter.accepts(&record(2048, 10, 0)));
    }
}
