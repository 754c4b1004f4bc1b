/// On-disk thumbnail tier
///
/// One file per cache key, named `<key>.jpg`, inside a dedicated directory.
/// A file's mtime doubles as its last-access time and drives trimming.
/// Writes go through a temp file and a rename so readers never observe a
/// partially written entry.
use filetime::FileTime;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::decoder::ResourceHandle;
use super::key::{CacheKey, ENTRY_EXTENSION};

const TEMP_PREFIX: &str = ".tmp";

/// Outcome of one trim pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrimReport {
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub removed: usize,
}

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    len: u64,
    accessed: FileTime,
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
    budget: u64,
    trim_target: u64,
}

impl DiskStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// A directory that cannot be created is logged, not fatal: every later
    /// write fails and is swallowed, leaving a memory-only cache.
    pub fn open(dir: impl Into<PathBuf>, budget: u64, trim_target: u64) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!("Cannot create thumbnail cache dir {}: {}", dir.display(), e);
        }
        Self {
            dir,
            budget,
            trim_target: trim_target.min(budget),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read an entry and mark it as just used
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => {
                if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
                    tracing::debug!("Failed to touch {}: {}", path.display(), e);
                }
                Some(bytes)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!("Failed to read cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Atomically write an entry; overwriting an existing one is fine
    pub fn put(&self, key: &CacheKey, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(key);
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        filetime::set_file_mtime(&path, FileTime::now())?;
        Ok(())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Delete a single entry, returning whether one existed
    pub fn remove(&self, key: &CacheKey) -> bool {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!("Failed to remove cache entry {}: {}", key, e);
                false
            }
        }
    }

    /// Delete every size variant stored for `handle`
    pub fn remove_for(&self, handle: &ResourceHandle) -> io::Result<usize> {
        let prefix = CacheKey::handle_prefix(handle);
        let mut removed = 0;
        for entry in self.entries()? {
            let matches = entry
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix));
            if matches && remove_quietly(&entry.path) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Summed size of all entries
    pub fn total_size(&self) -> io::Result<u64> {
        Ok(self.entries()?.iter().map(|e| e.len).sum())
    }

    /// If the store is over budget, delete least-recently-used entries until
    /// it is at or below the trim target
    pub fn trim(&self) -> io::Result<TrimReport> {
        let mut entries = self.entries()?;
        let bytes_before: u64 = entries.iter().map(|e| e.len).sum();
        let mut report = TrimReport {
            bytes_before,
            bytes_after: bytes_before,
            removed: 0,
        };
        if bytes_before <= self.budget {
            return Ok(report);
        }

        entries.sort_by_key(|e| e.accessed);
        for entry in entries {
            if report.bytes_after <= self.trim_target {
                break;
            }
            if remove_quietly(&entry.path) {
                report.bytes_after -= entry.len;
                report.removed += 1;
            }
        }

        tracing::info!(
            "Trimmed thumbnail cache: removed {} entries, {} -> {} bytes",
            report.removed,
            report.bytes_before,
            report.bytes_after
        );
        Ok(report)
    }

    /// Cache entries currently on disk; temp files and strays are skipped
    fn entries(&self) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            let is_entry = path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
                && !dir_entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX);
            if !is_entry {
                continue;
            }
            // Entries can vanish under a concurrent trim
            let Ok(meta) = dir_entry.metadata() else {
                continue;
            };
            if meta.is_file() {
                entries.push(Entry {
                    path,
                    len: meta.len(),
                    accessed: FileTime::from_last_modification_time(&meta),
                });
            }
        }
        Ok(entries)
    }
}

/// Remove a file, treating "already gone" as success
fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to delete {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(&ResourceHandle::new(name), 150, 150)
    }

    /// Backdate an entry's last access by `secs_ago`
    fn age(store: &DiskStore, key: &CacheKey, secs_ago: i64) {
        let now = FileTime::now();
        let then = FileTime::from_unix_time(now.unix_seconds() - secs_ago, 0);
        filetime::set_file_mtime(store.path_for(key), then).unwrap();
    }

    #[test]
    fn test_put_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path(), 1 << 20, 1 << 19);
        let k = key("a");

        assert!(store.get(&k).is_none());
        store.put(&k, b"jpeg bytes").unwrap();
        store.put(&k, b"jpeg bytes").unwrap();
        assert_eq!(store.get(&k).as_deref(), Some(&b"jpeg bytes"[..]));
        assert_eq!(store.total_size().unwrap(), 10);

        assert!(store.remove(&k));
        assert!(!store.remove(&k));
        assert!(store.get(&k).is_none());
    }

    #[test]
    fn test_get_touches_last_access() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path(), 1 << 20, 1 << 19);
        let k = key("a");
        store.put(&k, b"x").unwrap();
        age(&store, &k, 3600);

        store.get(&k).unwrap();

        let meta = fs::metadata(store.path_for(&k)).unwrap();
        let accessed = FileTime::from_last_modification_time(&meta);
        assert!(FileTime::now().unix_seconds() - accessed.unix_seconds() < 60);
    }

    #[test]
    fn test_trim_evicts_oldest_to_budget() {
        // 1 KiB budget, three 500-byte entries written K1, K2, K3.
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path(), 1024, 1024);
        let keys = [key("K1"), key("K2"), key("K3")];
        for (i, k) in keys.iter().enumerate() {
            store.put(k, &[0u8; 500]).unwrap();
            age(&store, k, 30 - 10 * i as i64);
        }

        let report = store.trim().unwrap();

        assert_eq!(report.removed, 1);
        assert!(!store.contains(&keys[0]));
        assert!(store.contains(&keys[1]));
        assert!(store.contains(&keys[2]));
        assert!(store.total_size().unwrap() <= 1024);
    }

    #[test]
    fn test_trim_hysteresis() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path(), 1000, 800);
        let keys: Vec<_> = (0..4).map(|i| key(&format!("k{}", i))).collect();
        for (i, k) in keys.iter().enumerate() {
            store.put(k, &[0u8; 300]).unwrap();
            age(&store, k, 100 - i as i64);
        }

        let report = store.trim().unwrap();

        assert_eq!(report.bytes_before, 1200);
        assert_eq!(report.bytes_after, 600);
        assert_eq!(report.removed, 2);
        assert!(store.contains(&keys[2]) && store.contains(&keys[3]));

        // Within budget, nothing happens.
        assert_eq!(store.trim().unwrap().removed, 0);
    }

    #[test]
    fn test_trim_honours_access_order() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path(), 1000, 1000);
        let (old, young) = (key("old"), key("young"));
        store.put(&old, &[0u8; 600]).unwrap();
        store.put(&young, &[0u8; 600]).unwrap();
        age(&store, &old, 200);
        age(&store, &young, 100);

        // Reading the older entry makes it the most recent one.
        store.get(&old).unwrap();
        store.trim().unwrap();

        assert!(store.contains(&old));
        assert!(!store.contains(&young));
    }

    #[test]
    fn test_remove_for_and_strays() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::open(dir.path(), 1 << 20, 1 << 19);
        let photo = ResourceHandle::new("file:///a.jpg");
        let other = ResourceHandle::new("file:///b.jpg");
        store.put(&CacheKey::derive(&photo, 100, 100), b"1").unwrap();
        store.put(&CacheKey::derive(&photo, 300, 300), b"2").unwrap();
        store.put(&CacheKey::derive(&other, 100, 100), b"3").unwrap();
        fs::write(dir.path().join(".tmpabc.jpg"), b"partial").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(store.remove_for(&photo).unwrap(), 2);
        assert_eq!(store.total_size().unwrap(), 1);
        assert!(store.contains(&CacheKey::derive(&other, 100, 100)));
    }
}
