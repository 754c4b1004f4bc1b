use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::data::{FolderSummary, MediaFilter, MediaRecord};
use crate::thumb::ResourceHandle;

/// Supported still-image extensions and their MIME types
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
];

/// Source of folders and media records, plus deletion of the underlying files
pub trait MediaIndex: Send + Sync {
    /// Folders holding media, most recently updated first
    fn list_folders(&self) -> io::Result<Vec<FolderSummary>>;

    /// Media in one folder passing `filter`, newest first
    fn list_media(&self, folder_id: &str, filter: &MediaFilter) -> io::Result<Vec<MediaRecord>>;

    fn get_by_id(&self, id: u64) -> io::Result<Option<MediaRecord>>;

    /// Delete the resource behind `handle`; false if it was missing or could
    /// not be removed
    fn delete(&self, handle: &ResourceHandle) -> bool;
}

/// Media index over a directory tree.
///
/// Every directory under the root that directly contains images is a folder.
/// Folder counts are memoised; entries are only ever inserted or overwritten.
pub struct FsMediaIndex {
    root: PathBuf,
    folder_counts: Mutex<HashMap<String, usize>>,
}

impl FsMediaIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            folder_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Item count for a folder, computed on first use
    pub fn folder_count(&self, folder_id: &str) -> io::Result<usize> {
        if let Some(count) = self.folder_counts.lock().get(folder_id) {
            return Ok(*count);
        }
        let count = self
            .scan()?
            .iter()
            .filter(|record| record.folder_id == folder_id)
            .count();
        self.folder_counts.lock().insert(folder_id.to_string(), count);
        Ok(count)
    }

    /// Walk the tree and build a record for every supported image
    fn scan(&self) -> io::Result<Vec<MediaRecord>> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("media root not found: {}", self.root.display()),
            ));
        }

        let records = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| media_record(entry.path()))
            .collect();
        Ok(records)
    }
}

impl std::fmt::Debug for FsMediaIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsMediaIndex")
            .field("root", &self.root)
            .finish()
    }
}

impl MediaIndex for FsMediaIndex {
    fn list_folders(&self) -> io::Result<Vec<FolderSummary>> {
        let mut records = self.scan()?;
        records.sort_by(|a, b| b.date_added.cmp(&a.date_added));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in &records {
            *counts.entry(record.folder_id.clone()).or_default() += 1;
        }

        let mut folders: Vec<FolderSummary> = Vec::new();
        for record in &records {
            if folders.iter().any(|folder| folder.id == record.folder_id) {
                continue;
            }
            let path = record.path.parent().map(Path::to_path_buf).unwrap_or_default();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown Folder".to_string());
            folders.push(FolderSummary {
                id: record.folder_id.clone(),
                name,
                count: counts.get(&record.folder_id).copied().unwrap_or(0),
                path,
                cover: record.handle.clone(),
            });
        }

        self.folder_counts.lock().extend(counts);
        tracing::debug!("Found {} folders under {}", folders.len(), self.root.display());
        Ok(folders)
    }

    fn list_media(&self, folder_id: &str, filter: &MediaFilter) -> io::Result<Vec<MediaRecord>> {
        let mut records: Vec<MediaRecord> = self
            .scan()?
            .into_iter()
            .filter(|record| record.folder_id == folder_id && filter.accepts(record))
            .collect();
        records.sort_by(|a, b| b.date_added.cmp(&a.date_added));
        Ok(records)
    }

    fn get_by_id(&self, id: u64) -> io::Result<Option<MediaRecord>> {
        Ok(self.scan()?.into_iter().find(|record| record.id == id))
    }

    fn delete(&self, handle: &ResourceHandle) -> bool {
        let Some(path) = handle.to_file_path() else {
            return false;
        };
        if !path.is_file() {
            return false;
        }
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("Failed to delete {}: {}", path.display(), e);
            return false;
        }

        // Refresh the folder's memoised count
        if let Some(parent) = path.parent() {
            let folder_id = folder_id(parent);
            let count = fs::read_dir(parent)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| media_record(&e.path()).is_some())
                        .count()
                })
                .unwrap_or(0);
            self.folder_counts.lock().insert(folder_id, count);
        }

        tracing::info!("Deleted {}", path.display());
        true
    }
}

/// Build a record for `path`, or `None` if it is not a supported image
fn media_record(path: &Path) -> Option<MediaRecord> {
    let extension = path.extension()?.to_string_lossy().to_lowercase();
    let mime = IMAGE_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| mime.to_string())?;

    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    let parent = path.parent()?;
    // Header-only read; unreadable images stay in the index with 0x0
    let (width, height) = image::image_dimensions(path).unwrap_or((0, 0));
    let date_added = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Some(MediaRecord {
        id: stable_hash(path),
        handle: ResourceHandle::from_path(path)?,
        display_name: path.file_name()?.to_string_lossy().to_string(),
        path: path.to_path_buf(),
        folder_id: folder_id(parent),
        size: metadata.len(),
        width,
        height,
        mime_type: Some(mime),
        date_added,
        duration: None,
    })
}

fn folder_id(dir: &Path) -> String {
    format!("{:016x}", stable_hash(dir))
}

fn stable_hash(path: &Path) -> u64 {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
