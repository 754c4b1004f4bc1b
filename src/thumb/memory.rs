use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;

use super::bitmap::DecodedThumbnail;
use super::decoder::ResourceHandle;
use super::key::CacheKey;

/// Byte-budgeted LRU of decoded thumbnails
///
/// The store owns the cached copy; callers get a shared read-only `Arc`.
/// Both `get` and `put` refresh recency.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    budget: usize,
}

#[derive(Debug)]
struct State {
    entries: LruCache<CacheKey, Arc<DecodedThumbnail>>,
    bytes_used: usize,
}

impl MemoryStore {
    pub fn new(budget: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: LruCache::unbounded(),
                bytes_used: 0,
            }),
            budget,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn bytes_used(&self) -> usize {
        self.state.lock().bytes_used
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<DecodedThumbnail>> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Presence check that does not count as a use
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Insert or replace, then evict least-recently-used entries until the
    /// store is back within budget. Returns the number of evictions.
    ///
    /// A thumbnail larger than the whole budget is not stored.
    pub fn put(&self, key: CacheKey, thumbnail: Arc<DecodedThumbnail>) -> usize {
        let cost = thumbnail.byte_size();
        if cost > self.budget {
            tracing::debug!(
                "Skipping {} for memory tier: {} bytes exceeds budget {}",
                key,
                cost,
                self.budget
            );
            return 0;
        }

        let mut state = self.state.lock();
        if let Some(previous) = state.entries.put(key, thumbnail) {
            state.bytes_used -= previous.byte_size();
        }
        state.bytes_used += cost;

        let mut evicted = 0;
        while state.bytes_used > self.budget {
            // The entry just inserted is most recent and fits on its own,
            // so the loop stops before reaching it.
            match state.entries.pop_lru() {
                Some((_, old)) => {
                    state.bytes_used -= old.byte_size();
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&self, key: &CacheKey) -> Option<Arc<DecodedThumbnail>> {
        let mut state = self.state.lock();
        let removed = state.entries.pop(key);
        if let Some(ref thumbnail) = removed {
            state.bytes_used -= thumbnail.byte_size();
        }
        removed
    }

    /// Drop every size variant cached for `handle`
    pub fn remove_for(&self, handle: &ResourceHandle) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<CacheKey> = state
            .entries
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| key.belongs_to(handle))
            .collect();

        for key in &doomed {
            if let Some(thumbnail) = state.entries.pop(key) {
                state.bytes_used -= thumbnail.byte_size();
            }
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.bytes_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    /// Thumbnail costing exactly `bytes` (must be a multiple of 3)
    fn thumb(bytes: u32) -> Arc<DecodedThumbnail> {
        Arc::new(DecodedThumbnail::from_rgb(RgbImage::new(bytes / 3, 1)))
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(&ResourceHandle::new(name), 100, 100)
    }

    #[test]
    fn test_get_refreshes_recency() {
        // Budget B, three entries of B/2: touching `a` makes `b` the victim.
        let store = MemoryStore::new(600);
        store.put(key("a"), thumb(300));
        store.put(key("b"), thumb(300));
        assert!(store.get(&key("a")).is_some());

        let evicted = store.put(key("c"), thumb(300));

        assert_eq!(evicted, 1);
        assert!(store.contains(&key("a")));
        assert!(!store.contains(&key("b")));
        assert!(store.contains(&key("c")));
        assert_eq!(store.bytes_used(), 600);
    }

    #[test]
    fn test_never_exceeds_budget() {
        let store = MemoryStore::new(1000);
        for i in 0..50u32 {
            store.put(key(&format!("k{}", i)), thumb(3 * (i % 7 + 20)));
            assert!(store.bytes_used() <= store.budget());
        }
        assert!(!store.is_empty());
    }

    #[test]
    fn test_oversized_entry_is_skipped() {
        let store = MemoryStore::new(300);
        store.put(key("small"), thumb(300));
        assert_eq!(store.put(key("huge"), thumb(3000)), 0);

        assert!(store.contains(&key("small")));
        assert!(!store.contains(&key("huge")));
    }

    #[test]
    fn test_replace_accounts_once() {
        let store = MemoryStore::new(1000);
        store.put(key("a"), thumb(300));
        store.put(key("a"), thumb(600));
        assert_eq!(store.len(), 1);
        assert_eq!(store.bytes_used(), 600);

        store.remove(&key("a"));
        assert_eq!(store.bytes_used(), 0);
    }

    #[test]
    fn test_remove_for_handle() {
        let store = MemoryStore::new(10_000);
        let photo = ResourceHandle::new("file:///a.jpg");
        let other = ResourceHandle::new("file:///b.jpg");
        store.put(CacheKey::derive(&photo, 100, 100), thumb(300));
        store.put(CacheKey::derive(&photo, 200, 200), thumb(300));
        store.put(CacheKey::derive(&other, 100, 100), thumb(300));

        assert_eq!(store.remove_for(&photo), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.bytes_used(), 300);
        assert!(store.contains(&CacheKey::derive(&other, 100, 100)));
    }
}
