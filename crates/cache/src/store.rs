//! Bounded artifact cache with score-based eviction
//!
//! The store owns every entry; callers only ever receive clones of payloads.
//! Entry bookkeeping and statistics sit behind separate locks so that stat
//! readers never wait on a long eviction pass.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::compression::{self, CompressionLevel};
use crate::config::{CacheConfig, CompressionSettings, MIN_MEMORY_BYTES};
use crate::entry::{CacheEntry, CachePriority, EntryInfo, Payload, StoredData};
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, CacheListener};
use crate::eviction::{self, PriorityWeights};
use crate::key::{CacheKey, ContentType};
use crate::persist::{self, ExportedEntry};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of entries currently cached
    pub item_count: usize,

    /// Bytes used by the current entry representations
    pub memory_used: usize,

    /// Memory limit in bytes
    pub memory_limit: usize,

    /// Entry count limit
    pub max_items: usize,

    pub hits: u64,
    pub misses: u64,

    /// Entries dropped by eviction, sweeps or corruption
    pub evictions: u64,

    /// Inserts rejected because nothing could be evicted
    pub insert_failures: u64,

    /// Entries currently held in compressed form
    pub compressed_items: usize,

    /// Bytes saved by compression since the last reset
    pub bytes_saved: u64,

    pub items_by_type: BTreeMap<ContentType, usize>,
    pub bytes_by_type: BTreeMap<ContentType, usize>,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        crate::pressure::utilization(self.memory_used, self.memory_limit)
    }
}

/// Counts removed by a [`CacheStore::maintenance`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub stale: usize,
    pub evicted: usize,
}

impl MaintenanceReport {
    pub fn total(&self) -> usize {
        self.expired + self.stale + self.evicted
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    insert_failures: u64,
    bytes_saved: u64,
}

enum Lookup {
    Hit(Payload),
    Miss,
    Corrupt(Option<CacheEntry>, CacheError),
}

struct StoreState {
    entries: HashMap<CacheKey, CacheEntry>,
    config: CacheConfig,
    memory_used: usize,
    next_sequence: u64,
}

impl StoreState {
    fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            memory_used: 0,
            next_sequence: 0,
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn remove_where<F>(&mut self, pred: F) -> Vec<CacheEntry>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let keys: Vec<CacheKey> = self
            .entries
            .values()
            .filter(|entry| pred(entry))
            .map(|entry| entry.key.clone())
            .collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    fn evict_lowest(&mut self, now_ms: u64, count: usize) -> Vec<CacheEntry> {
        let victims = eviction::select_victims(
            self.entries.values(),
            &self.config.priority_weights,
            now_ms,
            count,
        );
        victims.iter().filter_map(|key| self.remove(key)).collect()
    }

    fn over_limits(&self) -> bool {
        self.memory_used > self.config.max_memory_bytes || self.entries.len() > self.config.max_items
    }

    fn enforce_limits(&mut self, now_ms: u64) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();
        while self.over_limits() {
            let victims = self.evict_lowest(now_ms, 1);
            if victims.is_empty() {
                break;
            }
            evicted.extend(victims);
        }
        evicted
    }

    /// Admit a prepared entry, evicting one victim at a time to make room
    #[allow(clippy::too_many_arguments)]
    fn admit(
        &mut self,
        key: &CacheKey,
        data: StoredData,
        size: usize,
        content_type: ContentType,
        priority: CachePriority,
        page: Option<u32>,
        now_ms: u64,
        evicted: &mut Vec<CacheEntry>,
    ) -> bool {
        if size > self.config.max_memory_bytes {
            return false;
        }

        // An overwrite competes for room like a new entry; the old value is
        // put back if the new one cannot fit
        let previous = self.remove(key);
        while self.memory_used + size > self.config.max_memory_bytes
            || self.entries.len() >= self.config.max_items
        {
            let victims = self.evict_lowest(now_ms, 1);
            if victims.is_empty() {
                if let Some(entry) = previous {
                    self.memory_used += entry.size_bytes;
                    self.entries.insert(key.clone(), entry);
                }
                return false;
            }
            evicted.extend(victims);
        }

        let (sequence, access_count) = match previous {
            Some(entry) => (entry.sequence, entry.access_count),
            None => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                (sequence, 0)
            }
        };
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                data,
                content_type,
                priority,
                page,
                size_bytes: size,
                created_at_ms: now_ms,
                last_accessed_ms: now_ms,
                access_count,
                sequence,
            },
        );
        self.memory_used += size;
        true
    }

    fn read(&mut self, key: &CacheKey, now_ms: u64) -> Lookup {
        let Some(entry) = self.entries.get_mut(key) else {
            return Lookup::Miss;
        };
        entry.access_count += 1;
        entry.last_accessed_ms = now_ms;

        let restored = match &entry.data {
            StoredData::Raw(payload) => return Lookup::Hit(payload.clone()),
            StoredData::Compressed { bytes, kind, .. } => compression::decompress(bytes)
                .and_then(|raw| Payload::from_bytes(*kind, raw, key)),
        };

        match restored {
            Ok(payload) => {
                let old_size = entry.size_bytes;
                let new_size = payload.memory_size();
                entry.data = StoredData::Raw(payload.clone());
                entry.size_bytes = new_size;
                self.memory_used = self.memory_used.saturating_sub(old_size) + new_size;
                Lookup::Hit(payload)
            }
            Err(err) => Lookup::Corrupt(self.remove(key), err),
        }
    }

    /// Compress one raw entry in place; returns the bytes saved
    fn compress_entry(&mut self, key: &CacheKey) -> Option<usize> {
        let settings = self.config.compression;
        let entry = self.entries.get_mut(key)?;
        let StoredData::Raw(payload) = &entry.data else {
            return None;
        };
        let (bytes, level) = try_compress(key, payload, entry.size_bytes, entry.content_type, &settings)?;
        let kind = payload.kind();

        let old_size = entry.size_bytes;
        let new_size = bytes.len();
        entry.data = StoredData::Compressed { bytes, kind, level };
        entry.size_bytes = new_size;
        self.memory_used = self.memory_used.saturating_sub(old_size) + new_size;
        Some(old_size.saturating_sub(new_size))
    }
}

/// Compress a payload when it is eligible and the result is worth keeping
fn try_compress(
    key: &CacheKey,
    payload: &Payload,
    size: usize,
    content_type: ContentType,
    settings: &CompressionSettings,
) -> Option<(Vec<u8>, CompressionLevel)> {
    if !settings.is_active()
        || !compression::should_compress(size, content_type, settings.threshold_bytes)
    {
        return None;
    }

    let raw = payload.to_bytes();
    match compression::compress(&raw, settings.level) {
        Ok(packed) if compression::worth_committing(raw.len(), packed.len()) => {
            Some((packed, settings.level))
        }
        Ok(_) => None,
        Err(err) => {
            warn!(key = %key, error = %err, "compression failed, keeping raw payload");
            None
        }
    }
}

/// Bounded key to artifact cache
///
/// Entries are admitted while they fit both the memory and the item limit.
/// When they do not, the lowest scoring non-Critical entry is evicted, one
/// at a time, until the new entry fits. If only Critical entries remain the
/// insert is refused.
///
/// # Example
///
/// ```
/// use pdf_editor_cache::{CacheConfig, CacheKey, CachePriority, CacheStore, ContentType, Payload};
///
/// let store = CacheStore::new(CacheConfig::default());
/// let key = CacheKey::text(3);
///
/// assert!(store.insert(
///     key.clone(),
///     Payload::Text("hello".into()),
///     ContentType::TextContent,
///     CachePriority::Normal,
///     Some(3),
/// ));
/// assert_eq!(store.get(&key), Some(Payload::Text("hello".into())));
/// assert_eq!(store.stats().hits, 1);
/// ```
pub struct CacheStore {
    state: Mutex<StoreState>,
    counters: Mutex<Counters>,
    listeners: Mutex<Vec<CacheListener>>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a store that timestamps entries with the given clock
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::new(config.normalized())),
            counters: Mutex::new(Counters::default()),
            listeners: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Register a callback for cache events
    pub fn add_listener(&self, listener: CacheListener) {
        lock(&self.listeners).push(listener);
    }

    /// Current time on the store's clock
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Store an artifact
    ///
    /// Replaces an existing entry under the same key. Returns false when the
    /// entry cannot be admitted; the artifact is then simply not cached and
    /// any previous value stays in place.
    pub fn insert(
        &self,
        key: CacheKey,
        payload: Payload,
        content_type: ContentType,
        priority: CachePriority,
        page: Option<u32>,
    ) -> bool {
        let settings = lock(&self.state).config.compression;
        let raw_size = payload.memory_size();

        let (data, size, saved) = match try_compress(&key, &payload, raw_size, content_type, &settings) {
            Some((bytes, level)) => {
                let size = bytes.len();
                let data = StoredData::Compressed {
                    bytes,
                    kind: payload.kind(),
                    level,
                };
                (data, size, Some(raw_size.saturating_sub(size)))
            }
            None => (StoredData::Raw(payload), raw_size, None),
        };

        self.insert_prepared(key, data, size, saved, content_type, priority, page)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_prepared(
        &self,
        key: CacheKey,
        data: StoredData,
        size: usize,
        saved: Option<usize>,
        content_type: ContentType,
        priority: CachePriority,
        page: Option<u32>,
    ) -> bool {
        let now = self.clock.now_ms();
        let mut evicted = Vec::new();
        let admitted = lock(&self.state).admit(
            &key,
            data,
            size,
            content_type,
            priority,
            page,
            now,
            &mut evicted,
        );

        let mut events = Vec::new();
        self.record_evictions(&evicted, &mut events);

        if admitted {
            debug!(key = %key, size, ?priority, "cached entry");
            if let Some(saved) = saved {
                lock(&self.counters).bytes_saved += saved as u64;
                events.push(CacheEvent::Compressed {
                    key,
                    saved_bytes: saved,
                });
            }
        } else {
            warn!(key = %key, size, "cache insert refused, not enough evictable room");
            lock(&self.counters).insert_failures += 1;
        }

        self.dispatch(events);
        admitted
    }

    /// Look up an artifact
    ///
    /// A compressed entry is decompressed on the first read and kept
    /// decompressed. An entry whose bytes cannot be decoded is evicted and
    /// the read counts as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Payload> {
        let started = Instant::now();
        let now = self.clock.now_ms();
        let lookup = lock(&self.state).read(key, now);

        let mut events = Vec::new();
        let result = match lookup {
            Lookup::Hit(payload) => {
                lock(&self.counters).hits += 1;
                events.push(CacheEvent::Hit {
                    key: key.clone(),
                    latency: started.elapsed(),
                });
                Some(payload)
            }
            Lookup::Miss => {
                lock(&self.counters).misses += 1;
                events.push(CacheEvent::Miss { key: key.clone() });
                None
            }
            Lookup::Corrupt(removed, err) => {
                warn!(key = %key, error = %err, "dropping corrupt cache entry");
                lock(&self.counters).misses += 1;
                events.push(CacheEvent::Corrupted { key: key.clone() });
                if let Some(entry) = removed {
                    self.record_evictions(std::slice::from_ref(&entry), &mut events);
                }
                events.push(CacheEvent::Miss { key: key.clone() });
                None
            }
        };

        self.dispatch(events);
        result
    }

    /// Existence check without telemetry
    pub fn contains(&self, key: &CacheKey) -> bool {
        lock(&self.state).entries.contains_key(key)
    }

    /// Bookkeeping snapshot of one entry
    pub fn entry_info(&self, key: &CacheKey) -> Option<EntryInfo> {
        lock(&self.state).entries.get(key).map(CacheEntry::info)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = lock(&self.state).remove(key);
        match removed {
            Some(entry) => {
                self.dispatch(vec![CacheEvent::Evicted {
                    key: entry.key,
                    content_type: entry.content_type,
                }]);
                true
            }
            None => false,
        }
    }

    /// Remove every entry
    pub fn clear(&self) {
        let removed = lock(&self.state).remove_where(|_| true);
        debug!(count = removed.len(), "cache cleared");
        self.dispatch(removal_events(removed));
    }

    /// Remove every entry of one content type
    pub fn clear_type(&self, content_type: ContentType) -> usize {
        let removed = lock(&self.state).remove_where(|entry| entry.content_type == content_type);
        let count = removed.len();
        self.dispatch(removal_events(removed));
        count
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        lock(&self.state).entries.keys().cloned().collect()
    }

    pub fn keys_for_type(&self, content_type: ContentType) -> Vec<CacheKey> {
        lock(&self.state)
            .entries
            .values()
            .filter(|entry| entry.content_type == content_type)
            .map(|entry| entry.key.clone())
            .collect()
    }

    pub fn keys_for_priority(&self, priority: CachePriority) -> Vec<CacheKey> {
        lock(&self.state)
            .entries
            .values()
            .filter(|entry| entry.priority == priority)
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Sorted page numbers that have at least one rendered page cached
    pub fn cached_pages(&self) -> Vec<u32> {
        let pages: BTreeSet<u32> = lock(&self.state)
            .entries
            .values()
            .filter(|entry| entry.content_type == ContentType::RenderedPage)
            .filter_map(|entry| entry.page)
            .collect();
        pages.into_iter().collect()
    }

    pub fn item_count_for_type(&self, content_type: ContentType) -> usize {
        lock(&self.state)
            .entries
            .values()
            .filter(|entry| entry.content_type == content_type)
            .count()
    }

    pub fn memory_for_type(&self, content_type: ContentType) -> usize {
        lock(&self.state)
            .entries
            .values()
            .filter(|entry| entry.content_type == content_type)
            .map(|entry| entry.size_bytes)
            .sum()
    }

    pub fn set_priority(&self, key: &CacheKey, priority: CachePriority) -> bool {
        match lock(&self.state).entries.get_mut(key) {
            Some(entry) => {
                entry.priority = priority;
                true
            }
            None => false,
        }
    }

    /// Raise an entry to High unless it already ranks at least that high
    pub fn promote_to_high_priority(&self, key: &CacheKey) -> bool {
        match lock(&self.state).entries.get_mut(key) {
            Some(entry) => {
                if entry.priority < CachePriority::High {
                    entry.priority = CachePriority::High;
                }
                true
            }
            None => false,
        }
    }

    /// Mark an entry as recently used without counting a hit
    pub fn refresh(&self, key: &CacheKey) -> bool {
        let now = self.clock.now_ms();
        match lock(&self.state).entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed_ms = now;
                true
            }
            None => false,
        }
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        let mut stats = {
            let state = lock(&self.state);
            let mut stats = CacheStats {
                item_count: state.entries.len(),
                memory_used: state.memory_used,
                memory_limit: state.config.max_memory_bytes,
                max_items: state.config.max_items,
                ..Default::default()
            };
            for entry in state.entries.values() {
                *stats.items_by_type.entry(entry.content_type).or_default() += 1;
                *stats.bytes_by_type.entry(entry.content_type).or_default() += entry.size_bytes;
                if entry.is_compressed() {
                    stats.compressed_items += 1;
                }
            }
            stats
        };

        let counters = lock(&self.counters);
        stats.hits = counters.hits;
        stats.misses = counters.misses;
        stats.evictions = counters.evictions;
        stats.insert_failures = counters.insert_failures;
        stats.bytes_saved = counters.bytes_saved;
        stats
    }

    pub fn reset_stats(&self) {
        *lock(&self.counters) = Counters::default();
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_used(&self) -> usize {
        lock(&self.state).memory_used
    }

    pub fn max_memory(&self) -> usize {
        lock(&self.state).config.max_memory_bytes
    }

    pub fn config(&self) -> CacheConfig {
        lock(&self.state).config.clone()
    }

    /// Evict up to `count` of the lowest scoring non-Critical entries
    pub fn evict(&self, count: usize) -> usize {
        let now = self.clock.now_ms();
        let evicted = lock(&self.state).evict_lowest(now, count);
        self.finish_removal(evicted)
    }

    /// Remove entries older than the configured item max age
    ///
    /// Critical entries are kept. A zero max age disables the sweep.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let evicted = {
            let mut state = lock(&self.state);
            let max_age = state.config.item_max_age.as_millis() as u64;
            if max_age == 0 {
                return 0;
            }
            state.remove_where(|entry| {
                entry.priority != CachePriority::Critical
                    && now.saturating_sub(entry.created_at_ms) > max_age
            })
        };
        self.finish_removal(evicted)
    }

    /// Remove Low and Background entries older than the stale age
    pub fn sweep_stale_low_priority(&self) -> usize {
        let now = self.clock.now_ms();
        let evicted = {
            let mut state = lock(&self.state);
            let stale_age = state.config.stale_low_priority_age.as_millis() as u64;
            state.remove_where(|entry| {
                entry.priority <= CachePriority::Low
                    && now.saturating_sub(entry.created_at_ms) > stale_age
            })
        };
        self.finish_removal(evicted)
    }

    /// Run both sweeps, then bring the store back within its limits
    pub fn maintenance(&self) -> MaintenanceReport {
        let expired = self.cleanup_expired();
        let stale = self.sweep_stale_low_priority();
        let evicted = self.enforce_limits();
        let report = MaintenanceReport {
            expired,
            stale,
            evicted,
        };
        if report.total() > 0 {
            debug!(?report, "cache maintenance");
        }
        report
    }

    /// Compress every raw entry that qualifies for compression
    pub fn compress_eligible(&self) -> usize {
        let compressed: Vec<(CacheKey, usize)> = {
            let mut state = lock(&self.state);
            if !state.config.compression.is_active() {
                return 0;
            }
            let keys: Vec<CacheKey> = state
                .entries
                .values()
                .filter(|entry| !entry.is_compressed())
                .map(|entry| entry.key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| state.compress_entry(&key).map(|saved| (key, saved)))
                .collect()
        };

        let saved_total: usize = compressed.iter().map(|(_, saved)| saved).sum();
        lock(&self.counters).bytes_saved += saved_total as u64;
        let count = compressed.len();
        if count > 0 {
            debug!(count, saved_total, "compressed cache entries");
        }
        self.dispatch(
            compressed
                .into_iter()
                .map(|(key, saved_bytes)| CacheEvent::Compressed { key, saved_bytes })
                .collect(),
        );
        count
    }

    /// Remove non-Critical entries not accessed within `threshold`
    pub fn collect_idle(&self, threshold: Duration) -> usize {
        let now = self.clock.now_ms();
        let threshold = threshold.as_millis() as u64;
        let evicted = lock(&self.state).remove_where(|entry| {
            entry.priority != CachePriority::Critical
                && now.saturating_sub(entry.last_accessed_ms) > threshold
        });
        self.finish_removal(evicted)
    }

    /// Evict lowest scoring entries until memory use is at most `target_bytes`
    pub fn evict_to_target(&self, target_bytes: usize) -> usize {
        let now = self.clock.now_ms();
        let evicted = {
            let mut state = lock(&self.state);
            let mut evicted = Vec::new();
            while state.memory_used > target_bytes {
                let victims = state.evict_lowest(now, 1);
                if victims.is_empty() {
                    break;
                }
                evicted.extend(victims);
            }
            evicted
        };
        self.finish_removal(evicted)
    }

    /// Release spare table capacity
    pub fn compact(&self) {
        let mut state = lock(&self.state);
        let before = state.entries.capacity();
        state.entries.shrink_to_fit();
        debug!(before, after = state.entries.capacity(), "compacted cache table");
    }

    pub fn set_max_memory(&self, bytes: usize) {
        lock(&self.state).config.max_memory_bytes = bytes.max(MIN_MEMORY_BYTES);
        self.enforce_limits();
    }

    pub fn set_max_items(&self, max_items: usize) {
        lock(&self.state).config.max_items = max_items.max(1);
        self.enforce_limits();
    }

    pub fn set_item_max_age(&self, age: Duration) {
        lock(&self.state).config.item_max_age = age;
        self.enforce_limits();
    }

    pub fn set_priority_weights(&self, weights: PriorityWeights) {
        lock(&self.state).config.priority_weights = weights;
        self.enforce_limits();
    }

    pub fn set_compression(&self, settings: CompressionSettings) {
        lock(&self.state).config.compression = settings;
        self.enforce_limits();
    }

    /// Replace every knob at once
    pub fn set_config(&self, config: CacheConfig) {
        lock(&self.state).config = config.normalized();
        self.enforce_limits();
    }

    fn enforce_limits(&self) -> usize {
        let now = self.clock.now_ms();
        let evicted = lock(&self.state).enforce_limits(now);
        self.finish_removal(evicted)
    }

    /// Write every entry, in its current representation, to a JSON file
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> CacheResult<usize> {
        let entries: Vec<ExportedEntry> = lock(&self.state)
            .entries
            .values()
            .map(|entry| {
                let (kind, compression, bytes) = match &entry.data {
                    StoredData::Raw(payload) => (payload.kind(), CompressionLevel::None, payload.to_bytes()),
                    StoredData::Compressed { bytes, kind, level } => (*kind, *level, bytes.clone()),
                };
                ExportedEntry {
                    key: entry.key.clone(),
                    content_type: entry.content_type,
                    priority: entry.priority,
                    page: entry.page,
                    kind,
                    compression,
                    data: ExportedEntry::encode(&bytes),
                }
            })
            .collect();

        let count = entries.len();
        persist::write(path.as_ref(), entries)?;
        debug!(count, path = %path.as_ref().display(), "exported cache");
        Ok(count)
    }

    /// Insert every entry of an export file; returns how many were admitted
    ///
    /// Compressed entries are admitted as-is and validated on first read.
    pub fn import_from_file(&self, path: impl AsRef<Path>) -> CacheResult<usize> {
        let records = persist::read(path.as_ref())?;
        let mut admitted = 0;

        for record in records {
            let bytes = record.decode()?;
            let inserted = if record.compression == CompressionLevel::None {
                let payload = Payload::from_bytes(record.kind, bytes, &record.key)?;
                self.insert(record.key, payload, record.content_type, record.priority, record.page)
            } else {
                let size = bytes.len();
                let data = StoredData::Compressed {
                    bytes,
                    kind: record.kind,
                    level: record.compression,
                };
                self.insert_prepared(
                    record.key,
                    data,
                    size,
                    None,
                    record.content_type,
                    record.priority,
                    record.page,
                )
            };
            if inserted {
                admitted += 1;
            }
        }

        debug!(admitted, path = %path.as_ref().display(), "imported cache");
        Ok(admitted)
    }

    fn record_evictions(&self, evicted: &[CacheEntry], events: &mut Vec<CacheEvent>) {
        if evicted.is_empty() {
            return;
        }
        lock(&self.counters).evictions += evicted.len() as u64;
        for entry in evicted {
            debug!(key = %entry.key, size = entry.size_bytes, "evicted entry");
            events.push(CacheEvent::Evicted {
                key: entry.key.clone(),
                content_type: entry.content_type,
            });
        }
    }

    fn finish_removal(&self, evicted: Vec<CacheEntry>) -> usize {
        let mut events = Vec::new();
        self.record_evictions(&evicted, &mut events);
        self.dispatch(events);
        evicted.len()
    }

    fn dispatch(&self, events: Vec<CacheEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners = lock(&self.listeners).clone();
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn removal_events(removed: Vec<CacheEntry>) -> Vec<CacheEvent> {
    removed
        .into_iter()
        .map(|entry| CacheEvent::Evicted {
            key: entry.key,
            content_type: entry.content_type,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pdf_editor_render::RasterImage;
    use rand::{Rng, SeedableRng};

    fn uncompressed_config() -> CacheConfig {
        CacheConfig::default().with_compression(CompressionSettings {
            enabled: false,
            ..Default::default()
        })
    }

    fn bytes(len: usize) -> Payload {
        Payload::Bytes(vec![7; len])
    }

    fn put(store: &CacheStore, name: &str, priority: CachePriority) -> bool {
        store.insert(
            CacheKey::from_raw(name),
            bytes(16),
            ContentType::Metadata,
            priority,
            None,
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = CacheStore::new(uncompressed_config());
        let key = CacheKey::rendered_page(3, 1.0, 0, None);
        let image = Payload::Image(RasterImage::filled(8, 8, [1, 2, 3, 255]));

        assert!(store.insert(key.clone(), image.clone(), ContentType::RenderedPage, CachePriority::Normal, Some(3)));
        assert!(store.contains(&key));
        assert_eq!(store.get(&key), Some(image));
        assert_eq!(store.memory_used(), 8 * 8 * 4);
        assert_eq!(store.entry_info(&key).unwrap().access_count, 1);
    }

    #[test]
    fn test_miss_is_not_an_error() {
        let store = CacheStore::default();
        assert_eq!(store.get(&CacheKey::text(1)), None);
        let stats = store.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_contains_has_no_telemetry() {
        let store = CacheStore::new(uncompressed_config());
        put(&store, "a", CachePriority::Normal);
        assert!(store.contains(&CacheKey::from_raw("a")));
        assert!(!store.contains(&CacheKey::from_raw("b")));
        let stats = store.stats();
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(store.entry_info(&CacheKey::from_raw("a")).unwrap().access_count, 0);
    }

    #[test]
    fn test_hit_miss_accounting() {
        let store = CacheStore::new(uncompressed_config());
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for page in 0..10 {
            store.insert(CacheKey::text(page), Payload::Text("x".into()), ContentType::TextContent, CachePriority::Normal, Some(page));
        }

        let mut expected_hits = 0;
        let total = 200;
        for _ in 0..total {
            let page = rng.gen_range(0..20);
            if store.get(&CacheKey::text(page)).is_some() {
                expected_hits += 1;
            }
        }

        let stats = store.stats();
        assert_eq!(stats.hits + stats.misses, total);
        assert_eq!(stats.hits, expected_hits);
        assert!((stats.hit_rate() - expected_hits as f64 / total as f64).abs() < 1e-12);
    }

    #[test]
    fn test_overwrite_updates_in_place() {
        let store = CacheStore::new(uncompressed_config());
        let key = CacheKey::from_raw("a");
        store.insert(key.clone(), bytes(10), ContentType::Metadata, CachePriority::Low, None);
        store.get(&key);
        assert!(store.insert(key.clone(), bytes(30), ContentType::Metadata, CachePriority::High, None));

        let info = store.entry_info(&key).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(info.size_bytes, 30);
        assert_eq!(info.priority, CachePriority::High);
        assert_eq!(store.memory_used(), 30);
    }

    #[test]
    fn test_oversize_overwrite_keeps_previous_value() {
        let store = CacheStore::new(uncompressed_config().with_memory_bytes(1024 * 1024));
        let key = CacheKey::from_raw("k");
        assert!(store.insert(key.clone(), bytes(16), ContentType::Metadata, CachePriority::Normal, None));

        assert!(!store.insert(key.clone(), bytes(2 * 1024 * 1024), ContentType::Metadata, CachePriority::Normal, None));
        assert_eq!(store.entry_info(&key).unwrap().size_bytes, 16);
        assert_eq!(store.memory_used(), 16);
        assert_eq!(store.stats().insert_failures, 1);
    }

    #[test]
    fn test_overwrite_that_cannot_make_room_is_refused() {
        let store = CacheStore::new(uncompressed_config().with_memory_bytes(1024 * 1024));
        let pinned = CacheKey::from_raw("pinned");
        let key = CacheKey::from_raw("k");
        assert!(store.insert(pinned.clone(), bytes(700 * 1024), ContentType::Metadata, CachePriority::Critical, None));
        assert!(store.insert(key.clone(), bytes(100 * 1024), ContentType::Metadata, CachePriority::Normal, None));

        assert!(!store.insert(key.clone(), bytes(500 * 1024), ContentType::Metadata, CachePriority::Normal, None));
        assert!(store.memory_used() <= store.max_memory());
        assert_eq!(store.entry_info(&key).unwrap().size_bytes, 100 * 1024);
        assert!(store.contains(&pinned));

        // A smaller replacement still fits
        assert!(store.insert(key.clone(), bytes(200 * 1024), ContentType::Metadata, CachePriority::Normal, None));
        assert_eq!(store.memory_used(), 900 * 1024);
    }

    #[test]
    fn test_item_limit_evicts_one_before_admitting() {
        let store = CacheStore::new(uncompressed_config().with_max_items(2));
        assert!(put(&store, "a", CachePriority::Normal));
        assert!(put(&store, "b", CachePriority::Normal));
        assert!(put(&store, "c", CachePriority::Normal));

        assert_eq!(store.len(), 2);
        assert!(store.contains(&CacheKey::from_raw("c")));
        let survivors = ["a", "b"]
            .iter()
            .filter(|name| store.contains(&CacheKey::from_raw(**name)))
            .count();
        assert_eq!(survivors, 1);
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_ties_evict_earliest_inserted() {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::with_clock(uncompressed_config().with_max_items(2), clock);
        put(&store, "first", CachePriority::Normal);
        put(&store, "second", CachePriority::Normal);
        put(&store, "third", CachePriority::Normal);
        assert!(!store.contains(&CacheKey::from_raw("first")));
        assert!(store.contains(&CacheKey::from_raw("second")));
    }

    #[test]
    fn test_critical_entries_are_never_evicted() {
        let store = CacheStore::new(uncompressed_config().with_max_items(1));
        assert!(put(&store, "pinned", CachePriority::Critical));
        assert!(!put(&store, "other", CachePriority::High));

        assert!(store.contains(&CacheKey::from_raw("pinned")));
        assert!(!store.contains(&CacheKey::from_raw("other")));
        assert_eq!(store.evict(10), 0);
        assert_eq!(store.stats().insert_failures, 1);
    }

    #[test]
    fn test_memory_limit_is_respected() {
        let store = CacheStore::new(uncompressed_config().with_memory_bytes(MIN_MEMORY_BYTES));
        let chunk = MIN_MEMORY_BYTES / 3;
        for i in 0..5 {
            assert!(store.insert(
                CacheKey::from_raw(format!("blob-{}", i)),
                bytes(chunk),
                ContentType::Metadata,
                CachePriority::Normal,
                None,
            ));
            assert!(store.memory_used() <= store.max_memory());
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_oversized_insert_fails_without_evicting() {
        let store = CacheStore::new(uncompressed_config().with_memory_bytes(MIN_MEMORY_BYTES));
        put(&store, "small", CachePriority::Normal);
        assert!(!store.insert(
            CacheKey::from_raw("huge"),
            bytes(MIN_MEMORY_BYTES + 1),
            ContentType::Metadata,
            CachePriority::Normal,
            None,
        ));
        assert!(store.contains(&CacheKey::from_raw("small")));
    }

    #[test]
    fn test_lower_score_goes_first() {
        let store = CacheStore::new(uncompressed_config().with_max_items(3));
        put(&store, "low", CachePriority::Low);
        put(&store, "high", CachePriority::High);
        put(&store, "normal", CachePriority::Normal);
        store.get(&CacheKey::from_raw("normal"));

        assert_eq!(store.evict(1), 1);
        assert!(!store.contains(&CacheKey::from_raw("low")));
        assert_eq!(store.evict(1), 1);
        assert!(!store.contains(&CacheKey::from_raw("high")));
    }

    #[test]
    fn test_compressed_on_insert_and_restored_on_read() {
        let store = CacheStore::default();
        let key = CacheKey::text(2);
        let text = "the quick brown fox ".repeat(500);
        assert!(store.insert(key.clone(), Payload::Text(text.clone()), ContentType::TextContent, CachePriority::Normal, Some(2)));

        let info = store.entry_info(&key).unwrap();
        assert!(info.is_compressed);
        assert_eq!(info.compression_level, CompressionLevel::Balanced);
        assert!(info.size_bytes < text.len());
        assert!(store.stats().bytes_saved > 0);

        assert_eq!(store.get(&key), Some(Payload::Text(text.clone())));
        let info = store.entry_info(&key).unwrap();
        assert!(!info.is_compressed);
        assert_eq!(info.size_bytes, text.len() * 2);
        assert_eq!(store.memory_used(), text.len() * 2);
    }

    #[test]
    fn test_round_trip_at_every_level() {
        let raster = RasterImage::new(64, 64, (0..64 * 64 * 4).map(|i| (i / 64) as u8).collect());
        for level in [CompressionLevel::Fast, CompressionLevel::Balanced, CompressionLevel::Maximum] {
            let store = CacheStore::new(CacheConfig::default().with_compression(CompressionSettings {
                enabled: true,
                level,
                threshold_bytes: 0,
            }));
            let key = CacheKey::rendered_page(1, 1.0, 0, None);
            store.insert(key.clone(), Payload::Image(raster.clone()), ContentType::RenderedPage, CachePriority::Normal, Some(1));
            assert_eq!(store.entry_info(&key).unwrap().compression_level, level);
            assert_eq!(store.get(&key), Some(Payload::Image(raster.clone())));
        }
    }

    #[test]
    fn test_incompressible_payload_stays_raw() {
        let store = CacheStore::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let noise: Vec<u8> = (0..200 * 1024).map(|_| rng.gen()).collect();
        let key = CacheKey::from_raw("noise");
        store.insert(key.clone(), Payload::Bytes(noise), ContentType::RenderedPage, CachePriority::Normal, None);
        assert!(!store.entry_info(&key).unwrap().is_compressed);
    }

    #[test]
    fn test_corrupt_entry_is_evicted_and_missed() {
        let store = CacheStore::default();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        store.add_listener(Arc::new(move |event: &CacheEvent| sink.lock().unwrap().push(event.clone())));

        let key = CacheKey::text(5);
        store.insert(key.clone(), Payload::Text("a".repeat(4096)), ContentType::TextContent, CachePriority::Normal, Some(5));
        if let Some(entry) = store.state.lock().unwrap().entries.get_mut(&key) {
            entry.data = StoredData::Compressed {
                bytes: b"garbage".to_vec(),
                kind: crate::entry::PayloadKind::Text,
                level: CompressionLevel::Fast,
            };
        }

        assert_eq!(store.get(&key), None);
        assert!(!store.contains(&key));
        assert_eq!(store.stats().misses, 1);
        assert!(events
            .lock()
            .unwrap()
            .contains(&CacheEvent::Corrupted { key: key.clone() }));
    }

    #[test]
    fn test_compress_eligible_skips_small_thumbnails() {
        let store = CacheStore::new(uncompressed_config());
        let text_key = CacheKey::text(1);
        let thumb_key = CacheKey::thumbnail(1, 16, 16);
        store.insert(text_key.clone(), Payload::Text("abc".repeat(2000)), ContentType::TextContent, CachePriority::Normal, Some(1));
        store.insert(thumb_key.clone(), Payload::Image(RasterImage::filled(16, 16, [0; 4])), ContentType::Thumbnail, CachePriority::Normal, Some(1));

        assert_eq!(store.compress_eligible(), 0);
        store.set_compression(CompressionSettings::default());
        assert_eq!(store.compress_eligible(), 1);
        assert!(store.entry_info(&text_key).unwrap().is_compressed);
        assert!(!store.entry_info(&thumb_key).unwrap().is_compressed);
    }

    #[test]
    fn test_cleanup_expired_keeps_critical() {
        let clock = Arc::new(ManualClock::new());
        let config = uncompressed_config().with_item_max_age(Duration::from_secs(60));
        let store = CacheStore::with_clock(config, clock.clone());
        put(&store, "critical", CachePriority::Critical);
        put(&store, "high", CachePriority::High);

        clock.advance(Duration::from_secs(30));
        put(&store, "young", CachePriority::Low);
        clock.advance(Duration::from_secs(31));

        assert_eq!(store.cleanup_expired(), 1);
        assert!(store.contains(&CacheKey::from_raw("critical")));
        assert!(!store.contains(&CacheKey::from_raw("high")));
        assert!(store.contains(&CacheKey::from_raw("young")));

        store.set_item_max_age(Duration::ZERO);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(store.cleanup_expired(), 0);
    }

    #[test]
    fn test_stale_sweep_only_touches_low_priorities() {
        let clock = Arc::new(ManualClock::new());
        let config = uncompressed_config().with_item_max_age(Duration::ZERO);
        let store = CacheStore::with_clock(config, clock.clone());
        put(&store, "background", CachePriority::Background);
        put(&store, "low", CachePriority::Low);
        put(&store, "normal", CachePriority::Normal);

        clock.advance(Duration::from_secs(24 * 3600 + 1));
        assert_eq!(store.sweep_stale_low_priority(), 2);
        assert_eq!(store.keys(), vec![CacheKey::from_raw("normal")]);
    }

    #[test]
    fn test_collect_idle() {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::with_clock(uncompressed_config(), clock.clone());
        put(&store, "idle", CachePriority::High);
        put(&store, "busy", CachePriority::Normal);
        put(&store, "pinned", CachePriority::Critical);

        clock.advance(Duration::from_secs(400));
        store.refresh(&CacheKey::from_raw("busy"));
        assert_eq!(store.collect_idle(Duration::from_secs(300)), 1);
        assert!(!store.contains(&CacheKey::from_raw("idle")));
        assert!(store.contains(&CacheKey::from_raw("pinned")));
    }

    #[test]
    fn test_evict_to_target() {
        let store = CacheStore::new(uncompressed_config());
        for i in 0..10 {
            store.insert(CacheKey::from_raw(format!("k{}", i)), bytes(1000), ContentType::Metadata, CachePriority::Normal, None);
        }
        store.evict_to_target(4500);
        assert!(store.memory_used() <= 4500);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_setters_reenforce_limits() {
        let store = CacheStore::new(uncompressed_config());
        for name in ["a", "b", "c", "d"] {
            put(&store, name, CachePriority::Normal);
        }
        store.set_max_items(2);
        assert_eq!(store.len(), 2);

        store.set_max_memory(0);
        assert_eq!(store.max_memory(), MIN_MEMORY_BYTES);
    }

    #[test]
    fn test_type_queries_and_clear_type() {
        let store = CacheStore::new(uncompressed_config());
        for page in [4, 1, 4] {
            let key = CacheKey::rendered_page(page, if page == 4 { 1.0 } else { 2.0 }, 0, None);
            store.insert(key, bytes(10), ContentType::RenderedPage, CachePriority::Normal, Some(page));
        }
        store.insert(CacheKey::rendered_page(4, 3.0, 0, None), bytes(10), ContentType::RenderedPage, CachePriority::High, Some(4));
        store.insert(CacheKey::text(9), Payload::Text("hi".into()), ContentType::TextContent, CachePriority::Normal, Some(9));

        assert_eq!(store.cached_pages(), vec![1, 4]);
        assert_eq!(store.item_count_for_type(ContentType::RenderedPage), 3);
        assert_eq!(store.memory_for_type(ContentType::TextContent), 4);
        assert_eq!(store.keys_for_priority(CachePriority::High).len(), 1);
        assert_eq!(store.stats().items_by_type.get(&ContentType::RenderedPage), Some(&3));

        assert_eq!(store.clear_type(ContentType::RenderedPage), 3);
        assert_eq!(store.keys_for_type(ContentType::TextContent), vec![CacheKey::text(9)]);
    }

    #[test]
    fn test_priority_changes() {
        let store = CacheStore::new(uncompressed_config());
        put(&store, "a", CachePriority::Low);
        let key = CacheKey::from_raw("a");
        assert!(store.promote_to_high_priority(&key));
        assert_eq!(store.entry_info(&key).unwrap().priority, CachePriority::High);
        assert!(store.set_priority(&key, CachePriority::Critical));
        assert!(store.promote_to_high_priority(&key));
        assert_eq!(store.entry_info(&key).unwrap().priority, CachePriority::Critical);
        assert!(!store.set_priority(&CacheKey::from_raw("missing"), CachePriority::Low));
    }

    #[test]
    fn test_listeners_see_committed_state() {
        let store = Arc::new(CacheStore::new(uncompressed_config().with_max_items(1)));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&store);
        let sink = Arc::clone(&observed);
        store.add_listener(Arc::new(move |event: &CacheEvent| {
            if let (CacheEvent::Evicted { key, .. }, Some(store)) = (event, weak.upgrade()) {
                sink.lock().unwrap().push((key.clone(), store.contains(key)));
            }
        }));

        put(&store, "a", CachePriority::Normal);
        put(&store, "b", CachePriority::Normal);
        assert_eq!(
            *observed.lock().unwrap(),
            vec![(CacheKey::from_raw("a"), false)]
        );
    }

    #[test]
    fn test_clear_emits_evictions_and_reset_stats() {
        let store = CacheStore::new(uncompressed_config());
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        store.add_listener(Arc::new(move |event: &CacheEvent| {
            if matches!(event, CacheEvent::Evicted { .. }) {
                *sink.lock().unwrap() += 1;
            }
        }));
        put(&store, "a", CachePriority::Normal);
        put(&store, "b", CachePriority::Critical);
        store.get(&CacheKey::from_raw("a"));

        store.clear();
        assert!(store.is_empty());
        assert_eq!(*count.lock().unwrap(), 2);

        store.reset_stats();
        assert_eq!(store.stats().hits, 0);
    }

    #[test]
    fn test_export_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let source = CacheStore::default();
        let text_key = CacheKey::text(1);
        let text = "lorem ipsum ".repeat(300);
        let image_key = CacheKey::thumbnail(2, 4, 4);
        let image = RasterImage::filled(4, 4, [9, 9, 9, 255]);
        source.insert(text_key.clone(), Payload::Text(text.clone()), ContentType::TextContent, CachePriority::High, Some(1));
        source.insert(image_key.clone(), Payload::Image(image.clone()), ContentType::Thumbnail, CachePriority::Low, Some(2));
        assert!(source.entry_info(&text_key).unwrap().is_compressed);

        assert_eq!(source.export_to_file(&path).unwrap(), 2);

        let target = CacheStore::default();
        assert_eq!(target.import_from_file(&path).unwrap(), 2);
        assert!(target.entry_info(&text_key).unwrap().is_compressed);
        assert_eq!(target.entry_info(&image_key).unwrap().priority, CachePriority::Low);
        assert_eq!(target.get(&text_key), Some(Payload::Text(text)));
        assert_eq!(target.get(&image_key), Some(Payload::Image(image)));
    }

    #[test]
    fn test_maintenance_report() {
        let clock = Arc::new(ManualClock::new());
        let config = uncompressed_config().with_item_max_age(Duration::from_secs(10));
        let store = CacheStore::with_clock(config, clock.clone());
        put(&store, "old", CachePriority::Normal);
        clock.advance(Duration::from_secs(11));
        put(&store, "new", CachePriority::Normal);

        let report = store.maintenance();
        assert_eq!(report.expired, 1);
        assert_eq!(report.total(), 1);
        store.compact();
        assert_eq!(store.len(), 1);
    }
}
