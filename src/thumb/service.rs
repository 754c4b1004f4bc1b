/// Thumbnail service façade
///
/// Lookup order for a request: memory tier, then (as the key's only Leader,
/// inside the decode gate) memory again, disk tier, and finally a fresh
/// decode that populates both tiers. Failures never surface as errors: the
/// caller gets `None` and falls back to loading the full image.
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::bitmap::DecodedThumbnail;
use super::decoder::{Decoder, ImageDecoder, ResourceHandle};
use super::disk::{DiskStore, TrimReport};
use super::inflight::{Admission, InFlight, LoadOutcome, Ticket};
use super::key::CacheKey;
use super::memory::MemoryStore;
use crate::config::ThumbnailConfig;
use crate::error::{ConfigError, DecodeError};
use crate::media::library::MediaIndex;

/// Long-lived owner of both cache tiers and the decode pipeline.
/// Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct ThumbnailService {
    inner: Arc<Inner>,
}

struct Inner {
    config: ThumbnailConfig,
    memory: MemoryStore,
    disk: DiskStore,
    inflight: InFlight,
    decoder: Arc<dyn Decoder>,
    trimming: AtomicBool,
    /// Invalidation count per handle prefix. A leader only publishes to the
    /// tiers if the count for its handle is unchanged since it started.
    generations: Mutex<HashMap<String, u64>>,
}

impl fmt::Debug for ThumbnailService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailService")
            .field("cache_dir", &self.inner.disk.dir())
            .field("memory_entries", &self.inner.memory.len())
            .field("memory_bytes", &self.inner.memory.bytes_used())
            .field("in_flight", &self.inner.inflight.in_flight())
            .field("permits_available", &self.inner.inflight.available_permits())
            .finish()
    }
}

impl ThumbnailService {
    pub fn new(config: ThumbnailConfig, decoder: Arc<dyn Decoder>) -> Result<Self, ConfigError> {
        config.validate()?;

        let memory_budget = usize::try_from(config.memory_budget_bytes).unwrap_or(usize::MAX);
        let memory = MemoryStore::new(memory_budget);
        let disk = DiskStore::open(
            &config.cache_dir,
            config.disk_budget_bytes,
            config.disk_trim_target(),
        );
        let inflight = InFlight::new(config.max_concurrent_decodes);

        info!(
            "Thumbnail service ready: cache dir {}, memory budget {} bytes, disk budget {} bytes, {} decode slots",
            config.cache_dir.display(),
            memory_budget,
            config.disk_budget_bytes,
            config.max_concurrent_decodes
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                memory,
                disk,
                inflight,
                decoder,
                trimming: AtomicBool::new(false),
                generations: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Service that decodes `file://` handles from the local filesystem
    pub fn filesystem(config: ThumbnailConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(ImageDecoder::filesystem()))
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.inner.config
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner.memory
    }

    pub fn disk(&self) -> &DiskStore {
        &self.inner.disk
    }

    pub fn inflight(&self) -> &InFlight {
        &self.inner.inflight
    }

    /// Thumbnail of `handle` no smaller than `width` x `height`, or `None`
    /// if the source cannot be decoded
    pub async fn get_thumbnail(
        &self,
        handle: &ResourceHandle,
        width: u32,
        height: u32,
    ) -> Option<Arc<DecodedThumbnail>> {
        let key = CacheKey::derive(handle, width, height);
        loop {
            if let Some(thumbnail) = self.inner.memory.get(&key) {
                debug!("Memory hit for {}", key);
                return Some(thumbnail);
            }

            match self.inner.inflight.begin(key) {
                Admission::Leader(ticket) => {
                    // Runs detached so a caller that gives up does not cancel
                    // the load other callers are waiting on.
                    let inner = Arc::clone(&self.inner);
                    let handle = handle.clone();
                    let task = tokio::spawn(async move { inner.lead(ticket, handle).await });
                    return match task.await {
                        Ok(thumbnail) => thumbnail,
                        Err(e) => {
                            warn!("Thumbnail load for {} aborted: {}", key, e);
                            None
                        }
                    };
                }
                Admission::Follower(waiter) => match waiter.wait().await {
                    Some(LoadOutcome::Loaded(thumbnail)) => return Some(thumbnail),
                    Some(LoadOutcome::Failed) => return None,
                    // Leader vanished without an answer; try again
                    None => continue,
                },
            }
        }
    }

    /// Thumbnails for many handles, keyed by handle. Handles are processed in
    /// chunks of `batch_chunk_size`, with at most `max_concurrent_decodes`
    /// chunks running at once.
    pub async fn get_thumbnail_batch(
        &self,
        handles: &[ResourceHandle],
        width: u32,
        height: u32,
    ) -> HashMap<ResourceHandle, Option<Arc<DecodedThumbnail>>> {
        let config = &self.inner.config;
        stream::iter(handles.chunks(config.batch_chunk_size))
            .map(|chunk| async move {
                let mut found = Vec::with_capacity(chunk.len());
                for handle in chunk {
                    found.push((handle.clone(), self.get_thumbnail(handle, width, height).await));
                }
                found
            })
            .buffer_unordered(config.max_concurrent_decodes)
            .flat_map(stream::iter)
            .collect()
            .await
    }

    /// Drop every cached derivative of `handle` from both tiers.
    /// Returns the number of entries removed.
    pub async fn invalidate(&self, handle: &ResourceHandle) -> usize {
        let inner = Arc::clone(&self.inner);
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || inner.invalidate_blocking(&handle))
            .await
            .unwrap_or_else(|e| {
                warn!("Invalidation task failed: {}", e);
                0
            })
    }

    /// Delete a source resource through the media index, then its cache
    /// entries. Returns whether the resource was deleted.
    pub async fn delete_media(&self, index: Arc<dyn MediaIndex>, handle: &ResourceHandle) -> bool {
        let target = handle.clone();
        let deleted = tokio::task::spawn_blocking(move || index.delete(&target))
            .await
            .unwrap_or(false);
        if deleted {
            self.invalidate(handle).await;
        }
        deleted
    }

    /// Delete several resources, returning the ones that could not be deleted
    pub async fn delete_many(
        &self,
        index: Arc<dyn MediaIndex>,
        handles: &[ResourceHandle],
    ) -> Vec<ResourceHandle> {
        let mut failed = Vec::new();
        for handle in handles {
            if !self.delete_media(Arc::clone(&index), handle).await {
                failed.push(handle.clone());
            }
        }
        failed
    }

    /// Run a disk trim pass now
    pub async fn trim_disk(&self) -> io::Result<TrimReport> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.disk.trim())
            .await
            .map_err(io::Error::other)?
    }
}

impl Inner {
    /// Leader path for one key; the ticket is released on every return
    async fn lead(self: Arc<Self>, ticket: Ticket, handle: ResourceHandle) -> Option<Arc<DecodedThumbnail>> {
        let key = *ticket.key();
        let Some(permit) = ticket.admit().await else {
            ticket.finish(LoadOutcome::Failed);
            return None;
        };

        // Another Leader may have filled the key while we queued for a slot.
        let thumbnail = match self.memory.get(&key) {
            Some(thumbnail) => Some(thumbnail),
            None => {
                let generation = self.generation(&handle);
                let inner = Arc::clone(&self);
                let source = handle.clone();
                let filled = tokio::task::spawn_blocking(move || {
                    let thumbnail = inner.fill_blocking(&key, &source)?;
                    if !inner.publish_if_current(key, &source, generation, &thumbnail) {
                        // Invalidated mid-load; the entry we may have written is stale
                        inner.disk.remove(&key);
                    }
                    Ok::<_, DecodeError>(thumbnail)
                })
                .await;
                match filled {
                    Ok(Ok(thumbnail)) => Some(thumbnail),
                    Ok(Err(e)) => {
                        warn!("Failed to create thumbnail for {}: {}", handle, e);
                        None
                    }
                    Err(e) => {
                        warn!("Decode task for {} failed: {}", key, e);
                        None
                    }
                }
            }
        };
        drop(permit);

        match &thumbnail {
            Some(t) => ticket.finish(LoadOutcome::Loaded(Arc::clone(t))),
            None => ticket.finish(LoadOutcome::Failed),
        }
        self.maybe_trim();
        thumbnail
    }

    /// Disk tier, then decoder. Blocking.
    fn fill_blocking(&self, key: &CacheKey, handle: &ResourceHandle) -> Result<Arc<DecodedThumbnail>, DecodeError> {
        if let Some(bytes) = self.disk.get(key) {
            match DecodedThumbnail::decode_jpeg(&bytes) {
                Ok(thumbnail) => {
                    debug!("Disk hit for {}", key);
                    return Ok(Arc::new(thumbnail));
                }
                Err(e) => {
                    warn!("Discarding unreadable cache entry {}: {}", key, e);
                    self.disk.remove(key);
                }
            }
        }

        debug!("Cache miss for {}, decoding {}", key, handle);
        let decoded = match self.decoder.decode(handle, key.width(), key.height()) {
            Ok(decoded) => decoded,
            Err(e) => {
                if e.is_missing() {
                    self.invalidate_blocking(handle);
                }
                return Err(e);
            }
        };

        let bytes = match decoded.encode_jpeg(self.config.jpeg_quality) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to compress thumbnail {}: {}", key, e);
                return Ok(Arc::new(decoded));
            }
        };
        if let Err(e) = self.disk.put(key, &bytes) {
            warn!("Failed to write cache entry {}: {}", key, e);
        }

        // Keep what a later disk hit would produce, so both tiers agree.
        Ok(Arc::new(DecodedThumbnail::decode_jpeg(&bytes).unwrap_or(decoded)))
    }

    fn generation(&self, handle: &ResourceHandle) -> u64 {
        self.generations
            .lock()
            .get(&CacheKey::handle_prefix(handle))
            .copied()
            .unwrap_or(0)
    }

    /// Store a fresh result in memory unless `handle` was invalidated after
    /// `generation` was read. The check and the insert share the generations
    /// lock, so a concurrent invalidation either is seen here or clears the
    /// entry afterwards.
    fn publish_if_current(
        &self,
        key: CacheKey,
        handle: &ResourceHandle,
        generation: u64,
        thumbnail: &Arc<DecodedThumbnail>,
    ) -> bool {
        let generations = self.generations.lock();
        let current = generations
            .get(&CacheKey::handle_prefix(handle))
            .copied()
            .unwrap_or(0);
        if current != generation {
            debug!("Dropping result for {}: invalidated during load", key);
            return false;
        }
        self.memory.put(key, Arc::clone(thumbnail));
        true
    }

    fn invalidate_blocking(&self, handle: &ResourceHandle) -> usize {
        *self
            .generations
            .lock()
            .entry(CacheKey::handle_prefix(handle))
            .or_insert(0) += 1;
        let from_memory = self.memory.remove_for(handle);
        let from_disk = self.disk.remove_for(handle).unwrap_or_else(|e| {
            warn!("Failed to clear disk entries for {}: {}", handle, e);
            0
        });
        debug!(
            "Invalidated {}: {} memory, {} disk entries",
            handle, from_memory, from_disk
        );
        from_memory + from_disk
    }

    /// Occasionally trim the disk tier in the background
    fn maybe_trim(self: &Arc<Self>) {
        if fastrand::f64() >= self.config.trim_probability {
            return;
        }
        if self.trimming.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = inner.disk.trim() {
                warn!("Disk trim failed: {}", e);
            }
            inner.trimming.store(false, Ordering::Release);
        });
    }
}
