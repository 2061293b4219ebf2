//! The concurrent hash trie map.

use crate::config::MapConfig;
use crate::error::{CoreError, CoreResult};
use crate::expire::{Evictor, ExpirePolicy};
use crate::listener::ModificationListener;
use crate::segment::{RemoveMode, Segment, WriteMode, WriteOutcome};
use hashtrie_codec::Codec;
use hashtrie_store::{HeapStore, RecordStore};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Loader invoked on a `get` miss. The produced value is inserted into
/// the map and returned to the caller, so the map acts as a
/// read-through cache.
pub type ValueLoader<K, V> = Arc<dyn Fn(&K) -> V + Send + Sync>;

/// Hash distribution diagnostic, produced by
/// [`HashTrieMap::calculate_collision_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollisionStats {
    /// Entries sharing their full 32-bit hash with an earlier entry.
    pub collision_count: u64,
    /// Total live entries walked.
    pub entry_count: u64,
}

/// State shared between map handles and the background evictor.
pub(crate) struct MapInner<K: 'static, V: 'static> {
    config: MapConfig,
    /// Per-instance hash seed, drawn once at assembly so distinct map
    /// instances do not share collision patterns.
    reseed: u32,
    key_codec: Arc<dyn Codec<K>>,
    segments: Vec<Segment<K, V>>,
    listeners: Vec<Arc<dyn ModificationListener<K, V>>>,
    value_loader: Option<ValueLoader<K, V>>,
    is_open: RwLock<bool>,
}

impl<K: 'static, V: 'static> MapInner<K, V> {
    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }

    fn hash_key(&self, key: &K) -> u32 {
        self.key_codec.hash(key, self.reseed)
    }

    fn segment_for(&self, hash: u32) -> &Segment<K, V> {
        let mask = (1usize << self.config.conc_shift) - 1;
        &self.segments[hash as usize & mask]
    }

    fn live_size(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Distinct backing stores, deduplicated by identity. Segments may
    /// share one store or own one each.
    fn unique_stores(&self) -> Vec<&Arc<dyn RecordStore>> {
        let mut unique: Vec<&Arc<dyn RecordStore>> = Vec::new();
        for segment in &self.segments {
            let store = segment.store();
            if !unique.iter().any(|known| Arc::ptr_eq(known, store)) {
                unique.push(store);
            }
        }
        unique
    }

    fn stores_footprint(&self) -> CoreResult<u64> {
        let mut total = 0u64;
        for store in self.unique_stores() {
            total += store.storage_size()?;
        }
        Ok(total)
    }

    /// One full eviction pass: TTL deadlines first, then the entry
    /// count bound, then the store size bound. Runs on the background
    /// thread, piggybacked on queue-touching operations, or via an
    /// explicit call.
    pub(crate) fn run_eviction_pass(&self) -> CoreResult<()> {
        if !*self.is_open.read() {
            return Ok(());
        }
        let now = Instant::now();
        let mut evicted = 0u64;
        for segment in &self.segments {
            evicted += segment.evict_due(now, &self.listeners)?;
        }
        if let Some(bound) = self.config.expire_max_size {
            evicted += self.shrink_to_count(bound)?;
        }
        if let Some(bound) = self.config.expire_store_size {
            evicted += self.shrink_stores(bound)?;
        }
        if evicted > 0 {
            debug!(evicted, "eviction pass removed entries");
        }
        Ok(())
    }

    /// Evicts oldest-stamped entries, round-robin across segments,
    /// until at most `bound` entries remain.
    fn shrink_to_count(&self, bound: u64) -> CoreResult<u64> {
        let mut evicted = 0;
        while self.live_size() > bound {
            let mut any = false;
            for segment in &self.segments {
                if self.live_size() <= bound {
                    break;
                }
                if segment.evict_oldest(&self.listeners)? {
                    any = true;
                    evicted += 1;
                }
            }
            if !any {
                break;
            }
        }
        Ok(evicted)
    }

    /// Once the combined store footprint exceeds `bound`, evicts down
    /// to `bound * store_size_trigger` so successive passes do not
    /// thrash at the boundary.
    fn shrink_stores(&self, bound: u64) -> CoreResult<u64> {
        if self.stores_footprint()? <= bound {
            return Ok(0);
        }
        let target = (bound as f64 * self.config.store_size_trigger) as u64;
        let mut evicted = 0;
        loop {
            if self.stores_footprint()? <= target {
                break;
            }
            let mut any = false;
            for segment in &self.segments {
                if self.stores_footprint()? <= target {
                    break;
                }
                if segment.evict_oldest(&self.listeners)? {
                    any = true;
                    evicted += 1;
                }
            }
            if !any {
                break;
            }
        }
        Ok(evicted)
    }

    fn piggyback_enabled(&self) -> bool {
        self.config.expire_enabled() && self.config.eviction_interval.is_none()
    }

    /// Opportunistic eviction after an operation that touched the
    /// expiration queues. Failures are logged and retried on a later
    /// pass rather than failing the operation that triggered them.
    fn maybe_piggyback(&self) {
        if !self.piggyback_enabled() {
            return;
        }
        if let Err(error) = self.run_eviction_pass() {
            warn!(%error, "piggybacked eviction failed");
        }
    }
}

/// Concurrent hash map whose entries live in record stores.
///
/// Keys are hashed through the key codec; the low
/// [`conc_shift`](MapConfig::conc_shift) bits select one of the
/// independently locked segments and the remaining bits route through
/// that segment's directory trie. All operations take `&self` and may
/// be called from any thread.
///
/// ```
/// use hashtrie_codec::{StringCodec, U32Codec};
/// use hashtrie_core::HashTrieMap;
/// use std::sync::Arc;
///
/// # fn main() -> hashtrie_core::CoreResult<()> {
/// let map = HashTrieMap::new(Arc::new(StringCodec), Arc::new(U32Codec))?;
/// map.put(&"alpha".to_owned(), &1)?;
/// assert_eq!(map.get(&"alpha".to_owned())?, Some(1));
/// assert_eq!(map.remove(&"alpha".to_owned())?, Some(1));
/// assert!(map.is_empty()?);
/// # Ok(())
/// # }
/// ```
pub struct HashTrieMap<K: 'static, V: 'static> {
    inner: Arc<MapInner<K, V>>,
    evictor: Mutex<Option<Evictor>>,
}

impl<K: 'static, V: 'static> HashTrieMap<K, V> {
    /// Creates a map with default configuration over a fresh in-memory
    /// store.
    pub fn new(key_codec: Arc<dyn Codec<K>>, value_codec: Arc<dyn Codec<V>>) -> CoreResult<Self> {
        Self::with_config(key_codec, value_codec, MapConfig::default())
    }

    /// Creates a map with the given configuration over a fresh
    /// in-memory store.
    pub fn with_config(
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
        config: MapConfig,
    ) -> CoreResult<Self> {
        let store: Arc<dyn RecordStore> = Arc::new(HeapStore::new());
        Self::assemble(vec![store], key_codec, value_codec, config, Vec::new(), None)
    }

    /// Assembles a map from its collaborator parts.
    ///
    /// `stores` must hold either one store shared by every segment or
    /// exactly one store per segment. Listeners and the value loader
    /// are fixed for the life of the map.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] when the configuration
    /// fails [`MapConfig::validate`] or the store count matches neither
    /// arrangement, and propagates store errors from allocating the
    /// per-segment root records.
    pub fn assemble(
        stores: Vec<Arc<dyn RecordStore>>,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
        config: MapConfig,
        listeners: Vec<Arc<dyn ModificationListener<K, V>>>,
        value_loader: Option<ValueLoader<K, V>>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let segment_count = 1usize << config.conc_shift;
        if stores.len() != 1 && stores.len() != segment_count {
            return Err(CoreError::invalid_config(format!(
                "expected 1 or {segment_count} stores, got {}",
                stores.len()
            )));
        }
        let reseed: u32 = rand::random();
        let policy = ExpirePolicy::from_config(&config);
        let mut segments = Vec::with_capacity(segment_count);
        for index in 0..segment_count {
            let store = if stores.len() == 1 {
                Arc::clone(&stores[0])
            } else {
                Arc::clone(&stores[index])
            };
            segments.push(Segment::new(
                store,
                Arc::clone(&key_codec),
                Arc::clone(&value_codec),
                policy,
                config.leaf_split_threshold,
                u32::from(config.conc_shift),
            )?);
        }
        let inner = Arc::new(MapInner {
            config,
            reseed,
            key_codec,
            segments,
            listeners,
            value_loader,
            is_open: RwLock::new(true),
        });
        let evictor = match inner.config.eviction_interval {
            Some(interval) if inner.config.expire_enabled() => {
                Some(Evictor::start(&inner, interval))
            }
            _ => None,
        };
        debug!(
            segments = segment_count,
            background = evictor.is_some(),
            "hash trie map assembled"
        );
        Ok(Self {
            inner,
            evictor: Mutex::new(evictor),
        })
    }

    /// Looks up the value for `key`.
    ///
    /// Under an access TTL the hit re-stamps the entry. With a value
    /// loader configured, a miss invokes the loader and inserts its
    /// result, so this never returns `Ok(None)` on a loader-equipped
    /// map.
    pub fn get(&self, key: &K) -> CoreResult<Option<V>> {
        self.inner.ensure_open()?;
        let hash = self.inner.hash_key(key);
        let segment = self.inner.segment_for(hash);
        let touch = self.inner.config.expire_access_ttl.is_some();
        let found = if touch {
            segment.get_touch(hash, key)?
        } else {
            segment.get(hash, key)?
        };
        if let Some(value) = found {
            if touch {
                self.inner.maybe_piggyback();
            }
            return Ok(Some(value));
        }
        let Some(loader) = &self.inner.value_loader else {
            return Ok(None);
        };
        let (value, loaded) = segment.get_or_load(hash, key, loader, &self.inner.listeners)?;
        if loaded {
            self.inner.maybe_piggyback();
        }
        Ok(Some(value))
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn put(&self, key: &K, value: &V) -> CoreResult<Option<V>> {
        Ok(self.write(key, value, WriteMode::Put)?.previous)
    }

    /// Inserts only when `key` is absent. Returns the value that was
    /// already present, if any.
    pub fn put_if_absent(&self, key: &K, value: &V) -> CoreResult<Option<V>> {
        Ok(self.write(key, value, WriteMode::PutIfAbsent)?.previous)
    }

    /// Overwrites only when `key` is present, returning the replaced
    /// value.
    pub fn replace(&self, key: &K, value: &V) -> CoreResult<Option<V>> {
        Ok(self.write(key, value, WriteMode::Replace)?.previous)
    }

    /// Overwrites only when the current value equals `expected`.
    /// Returns whether the replacement happened.
    pub fn replace_if_equals(&self, key: &K, expected: &V, value: &V) -> CoreResult<bool> {
        Ok(self
            .write(key, value, WriteMode::ReplaceIfEquals(expected))?
            .changed)
    }

    fn write(&self, key: &K, value: &V, mode: WriteMode<'_, V>) -> CoreResult<WriteOutcome<V>> {
        self.inner.ensure_open()?;
        let hash = self.inner.hash_key(key);
        let outcome = self
            .inner
            .segment_for(hash)
            .insert(hash, key, value, mode, &self.inner.listeners)?;
        if outcome.changed {
            self.inner.maybe_piggyback();
        }
        Ok(outcome)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &K) -> CoreResult<Option<V>> {
        self.inner.ensure_open()?;
        let hash = self.inner.hash_key(key);
        let outcome = self.inner.segment_for(hash).remove(
            hash,
            key,
            RemoveMode::Always,
            &self.inner.listeners,
        )?;
        if outcome.changed {
            self.inner.maybe_piggyback();
        }
        Ok(outcome.previous)
    }

    /// Removes `key` only when its value equals `expected`. Returns
    /// whether the removal happened.
    pub fn remove_if_equals(&self, key: &K, expected: &V) -> CoreResult<bool> {
        self.inner.ensure_open()?;
        let hash = self.inner.hash_key(key);
        let outcome = self.inner.segment_for(hash).remove(
            hash,
            key,
            RemoveMode::IfEquals(expected),
            &self.inner.listeners,
        )?;
        if outcome.changed {
            self.inner.maybe_piggyback();
        }
        Ok(outcome.changed)
    }

    /// Whether `key` is present. Re-stamps the entry under an access
    /// TTL but never invokes the value loader.
    pub fn contains_key(&self, key: &K) -> CoreResult<bool> {
        self.inner.ensure_open()?;
        let hash = self.inner.hash_key(key);
        let segment = self.inner.segment_for(hash);
        if self.inner.config.expire_access_ttl.is_some() {
            let present = segment.get_touch(hash, key)?.is_some();
            if present {
                self.inner.maybe_piggyback();
            }
            Ok(present)
        } else {
            segment.contains(hash, key)
        }
    }

    /// Number of live entries across all segments.
    pub fn size(&self) -> CoreResult<u64> {
        self.inner.ensure_open()?;
        Ok(self.inner.live_size())
    }

    /// Whether the map has no live entries.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Removes every entry, returning each segment to its pristine
    /// single-record state. Listeners observe one removal per entry.
    pub fn clear(&self) -> CoreResult<()> {
        self.inner.ensure_open()?;
        for segment in &self.inner.segments {
            segment.clear(&self.inner.listeners)?;
        }
        debug!("map cleared");
        Ok(())
    }

    /// Runs one synchronous eviction pass, regardless of whether a
    /// background evictor is configured.
    pub fn expire_evict(&self) -> CoreResult<()> {
        self.inner.ensure_open()?;
        self.inner.run_eviction_pass()
    }

    /// Walks every leaf and reports how many entries share a full hash
    /// with another entry, along with the total entry count.
    pub fn calculate_collision_size(&self) -> CoreResult<CollisionStats> {
        self.inner.ensure_open()?;
        let mut stats = CollisionStats::default();
        for segment in &self.inner.segments {
            segment.collision_stats(&mut stats)?;
        }
        Ok(stats)
    }

    /// Calls `f` for every live entry. Iteration order is unspecified.
    /// Holds each segment's read lock in turn, so `f` must not call
    /// back into the map.
    pub fn for_each<F>(&self, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&K, &V),
    {
        self.inner.ensure_open()?;
        for segment in &self.inner.segments {
            segment.for_each_entry(&mut f)?;
        }
        Ok(())
    }

    /// Structural audit: every record in every backing store must be
    /// reachable from exactly one segment root.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] when a store holds records the
    /// directory does not reference, or vice versa.
    pub fn verify(&self) -> CoreResult<()> {
        self.inner.ensure_open()?;
        let mut groups: Vec<(&Arc<dyn RecordStore>, Vec<&Segment<K, V>>)> = Vec::new();
        for segment in &self.inner.segments {
            let store = segment.store();
            match groups.iter_mut().find(|(known, _)| Arc::ptr_eq(known, store)) {
                Some((_, members)) => members.push(segment),
                None => groups.push((store, vec![segment])),
            }
        }
        for (store, members) in groups {
            let mut reachable = Vec::new();
            for segment in members {
                segment.collect_reachable(&mut reachable)?;
            }
            reachable.sort_unstable();
            let mut allocated = store.all_recids()?;
            allocated.sort_unstable();
            if reachable != allocated {
                return Err(CoreError::corrupted(format!(
                    "store holds {} records but {} are reachable from segment roots",
                    allocated.len(),
                    reachable.len()
                )));
            }
        }
        Ok(())
    }

    /// Closes the map: stops the background evictor and rejects every
    /// subsequent operation with [`CoreError::Closed`]. Idempotent.
    pub fn close(&self) -> CoreResult<()> {
        {
            let mut is_open = self.inner.is_open.write();
            if !*is_open {
                return Ok(());
            }
            *is_open = false;
        }
        if let Some(mut evictor) = self.evictor.lock().take() {
            evictor.stop();
        }
        debug!("map closed");
        Ok(())
    }
}

impl<K: 'static, V: 'static> Drop for HashTrieMap<K, V> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl<K: 'static, V: 'static> std::fmt::Debug for HashTrieMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashTrieMap")
            .field("segments", &self.inner.segments.len())
            .field("size", &self.inner.live_size())
            .field("open", &*self.inner.is_open.read())
            .finish_non_exhaustive()
    }
}
