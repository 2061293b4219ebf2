//! One lock-protected slice of the map.
//!
//! A segment owns an independent trie rooted at a record that is
//! allocated when the segment is created and never moves. Splitting a
//! leaf or collapsing a directory rewrites records in place from the
//! leaves toward the root, so a reader that loses the lock race never
//! follows a dangling recid; failed operations can at worst strand
//! unreferenced records.
//!
//! Hash bits are consumed from least significant to most: the low
//! `conc_shift` bits picked this segment, and each directory level then
//! consumes the next [`BITS_PER_LEVEL`] bits of the remaining routing
//! hash.

use crate::error::{CoreError, CoreResult};
use crate::expire::{ExpirePolicy, ExpireQueues};
use crate::listener::ModificationListener;
use crate::map::{CollisionStats, ValueLoader};
use crate::node::{
    decode_node, encode_dir, encode_leaf, is_leaf_record, BITS_PER_LEVEL, DirNode, FANOUT,
    LeafEntry, Node,
};
use hashtrie_codec::{ByteReader, Codec};
use hashtrie_store::{Recid, RecordStore};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// How a write treats an existing entry.
#[derive(Clone, Copy)]
pub(crate) enum WriteMode<'a, V> {
    /// Insert or overwrite unconditionally.
    Put,
    /// Insert only when the key is absent.
    PutIfAbsent,
    /// Overwrite only when the key is present.
    Replace,
    /// Overwrite only when the current value equals the expected one.
    ReplaceIfEquals(&'a V),
}

/// How a removal treats the existing value.
#[derive(Clone, Copy)]
pub(crate) enum RemoveMode<'a, V> {
    Always,
    IfEquals(&'a V),
}

/// Result of a write or removal.
#[derive(Debug)]
pub(crate) struct WriteOutcome<V> {
    /// Value previously associated with the key, when there was one and
    /// the operation cares about it.
    pub(crate) previous: Option<V>,
    /// Whether the map was modified.
    pub(crate) changed: bool,
}

impl<V> WriteOutcome<V> {
    fn inserted() -> Self {
        Self {
            previous: None,
            changed: true,
        }
    }

    fn changed(previous: V) -> Self {
        Self {
            previous: Some(previous),
            changed: true,
        }
    }

    fn unchanged(previous: Option<V>) -> Self {
        Self {
            previous,
            changed: false,
        }
    }
}

fn dispatch<K, V>(
    listeners: &[Arc<dyn ModificationListener<K, V>>],
    key: &K,
    old_value: Option<&V>,
    new_value: Option<&V>,
    expired: bool,
) {
    for listener in listeners {
        listener.modify(key, old_value, new_value, expired);
    }
}

/// Routing slice consumed by a directory at `depth`.
fn slice_at(routing: u32, depth: u32) -> u8 {
    ((routing >> (BITS_PER_LEVEL * depth)) & (FANOUT as u32 - 1)) as u8
}

/// Mutable per-segment state guarded by the segment lock.
#[derive(Debug, Default)]
pub(crate) struct SegmentState {
    pub(crate) queues: ExpireQueues,
}

/// A directory on the path from the root to a leaf, kept while a
/// removal decides how far structural collapse propagates.
struct PathFrame {
    recid: Recid,
    dir: DirNode,
    slot: u8,
}

/// Structural fix a collapse applies to the parent directory.
enum Fix {
    /// The child subtree vanished.
    Remove,
    /// The child directory was replaced by a promoted leaf.
    Replace(Recid),
}

pub(crate) struct Segment<K: 'static, V: 'static> {
    store: Arc<dyn RecordStore>,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    /// Root record, an empty leaf at creation. The recid never changes.
    root: Recid,
    conc_shift: u32,
    /// Directory levels stop once the routing hash is exhausted.
    max_depth: u32,
    split_threshold: usize,
    policy: ExpirePolicy,
    state: RwLock<SegmentState>,
    count: AtomicU64,
}

impl<K: 'static, V: 'static> Segment<K, V> {
    pub(crate) fn new(
        store: Arc<dyn RecordStore>,
        key_codec: Arc<dyn Codec<K>>,
        value_codec: Arc<dyn Codec<V>>,
        policy: ExpirePolicy,
        split_threshold: usize,
        conc_shift: u32,
    ) -> CoreResult<Self> {
        let empty = encode_leaf::<K, V>(&[], None, &*key_codec, &*value_codec)?;
        let root = store.put(&empty)?;
        let max_depth = (32 - conc_shift).div_ceil(BITS_PER_LEVEL);
        Ok(Self {
            store,
            key_codec,
            value_codec,
            root,
            conc_shift,
            max_depth,
            split_threshold,
            policy,
            state: RwLock::new(SegmentState::default()),
            count: AtomicU64::new(0),
        })
    }

    /// Live entry count, maintained outside the lock.
    pub(crate) fn len(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub(crate) fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// True while some thread holds this segment's write lock. Used by
    /// tests to observe listener locking.
    #[cfg(test)]
    pub(crate) fn write_locked(&self) -> bool {
        self.state.try_read().is_none()
    }

    fn read_node(&self, recid: Recid) -> CoreResult<Node<K, V>> {
        let bytes = self.store.get(recid)?;
        decode_node(&bytes, &*self.key_codec, &*self.value_codec)
    }

    fn serialize_key(&self, key: &K) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.key_codec.serialize(key, &mut buf)?;
        Ok(buf)
    }

    /// Produces an owned key without a `Clone` bound, by a serialize
    /// and deserialize round trip.
    fn owned_key(&self, key: &K) -> CoreResult<K> {
        let bytes = self.serialize_key(key)?;
        Ok(self.key_codec.deserialize(&mut ByteReader::new(&bytes))?)
    }

    fn owned_value(&self, value: &V) -> CoreResult<V> {
        let mut buf = Vec::new();
        self.value_codec.serialize(value, &mut buf)?;
        Ok(self.value_codec.deserialize(&mut ByteReader::new(&buf))?)
    }

    /// Walks to the leaf for `hash` and extracts the matching value.
    /// Caller must hold the segment lock in either mode.
    fn find(&self, hash: u32, key: &K) -> CoreResult<Option<V>> {
        let routing = hash >> self.conc_shift;
        let mut recid = self.root;
        let mut depth = 0u32;
        loop {
            match self.read_node(recid)? {
                Node::Dir(dir) => match dir.child_at(slice_at(routing, depth)) {
                    Some(child) => {
                        recid = child;
                        depth += 1;
                    }
                    None => return Ok(None),
                },
                Node::Leaf(mut entries) => {
                    let position = entries
                        .iter()
                        .position(|entry| entry.hash == hash && self.key_codec.equals(&entry.key, key));
                    return Ok(position.map(|i| entries.swap_remove(i).value));
                }
            }
        }
    }

    pub(crate) fn get(&self, hash: u32, key: &K) -> CoreResult<Option<V>> {
        let _guard = self.state.read();
        self.find(hash, key)
    }

    /// Lookup that re-stamps the key's access time on a hit. Takes the
    /// write lock because the stamp queues are mutated.
    pub(crate) fn get_touch(&self, hash: u32, key: &K) -> CoreResult<Option<V>> {
        let mut state = self.state.write();
        let found = self.find(hash, key)?;
        if found.is_some() {
            let key_bytes = self.serialize_key(key)?;
            state
                .queues
                .on_access(hash, key_bytes, Instant::now(), &self.policy);
        }
        Ok(found)
    }

    /// Lookup that invokes `loader` and inserts the produced value when
    /// the key is absent. Returns the value and whether it was loaded.
    pub(crate) fn get_or_load(
        &self,
        hash: u32,
        key: &K,
        loader: &ValueLoader<K, V>,
        listeners: &[Arc<dyn ModificationListener<K, V>>],
    ) -> CoreResult<(V, bool)> {
        let mut state = self.state.write();
        if let Some(found) = self.find(hash, key)? {
            if self.policy.access_ttl.is_some() {
                let key_bytes = self.serialize_key(key)?;
                state
                    .queues
                    .on_access(hash, key_bytes, Instant::now(), &self.policy);
            }
            return Ok((found, false));
        }
        let value = loader(key);
        self.insert_locked(&mut state, hash, key, &value, WriteMode::PutIfAbsent, listeners)?;
        Ok((value, true))
    }

    pub(crate) fn contains(&self, hash: u32, key: &K) -> CoreResult<bool> {
        Ok(self.get(hash, key)?.is_some())
    }

    pub(crate) fn insert(
        &self,
        hash: u32,
        key: &K,
        value: &V,
        mode: WriteMode<'_, V>,
        listeners: &[Arc<dyn ModificationListener<K, V>>],
    ) -> CoreResult<WriteOutcome<V>> {
        let mut state = self.state.write();
        self.insert_locked(&mut state, hash, key, value, mode, listeners)
    }

    fn insert_locked(
        &self,
        state: &mut SegmentState,
        hash: u32,
        key: &K,
        value: &V,
        mode: WriteMode<'_, V>,
        listeners: &[Arc<dyn ModificationListener<K, V>>],
    ) -> CoreResult<WriteOutcome<V>> {
        let routing = hash >> self.conc_shift;
        let mut recid = self.root;
        let mut depth = 0u32;
        loop {
            match self.read_node(recid)? {
                Node::Dir(mut dir) => {
                    let slot = slice_at(routing, depth);
                    if let Some(child) = dir.child_at(slot) {
                        recid = child;
                        depth += 1;
                        continue;
                    }
                    if matches!(mode, WriteMode::Replace | WriteMode::ReplaceIfEquals(_)) {
                        return Ok(WriteOutcome::unchanged(None));
                    }
                    let leaf = encode_leaf(
                        &[],
                        Some((hash, key, value)),
                        &*self.key_codec,
                        &*self.value_codec,
                    )?;
                    let child = self.store.put(&leaf)?;
                    dir.insert(slot, child);
                    self.store.update(recid, &encode_dir(&dir))?;
                    self.note_insert(state, hash, key)?;
                    dispatch(listeners, key, None, Some(value), false);
                    return Ok(WriteOutcome::inserted());
                }
                Node::Leaf(mut entries) => {
                    let mut found = None;
                    for (i, entry) in entries.iter().enumerate() {
                        if self.key_codec.equals(&entry.key, key) {
                            if entry.hash != hash {
                                return Err(CoreError::hash_inconsistent(entry.hash, hash));
                            }
                            found = Some(i);
                            break;
                        }
                    }
                    if let Some(i) = found {
                        if matches!(mode, WriteMode::PutIfAbsent) {
                            let existing = entries.swap_remove(i);
                            return Ok(WriteOutcome::unchanged(Some(existing.value)));
                        }
                        if let WriteMode::ReplaceIfEquals(expected) = mode {
                            if !self.value_codec.equals(&entries[i].value, expected) {
                                return Ok(WriteOutcome::unchanged(None));
                            }
                        }
                        let replacement = self.owned_value(value)?;
                        let old = std::mem::replace(&mut entries[i].value, replacement);
                        let leaf =
                            encode_leaf(&entries, None, &*self.key_codec, &*self.value_codec)?;
                        self.store.update(recid, &leaf)?;
                        self.note_update(state, hash, key)?;
                        dispatch(listeners, key, Some(&old), Some(value), false);
                        return Ok(WriteOutcome::changed(old));
                    }
                    if matches!(mode, WriteMode::Replace | WriteMode::ReplaceIfEquals(_)) {
                        return Ok(WriteOutcome::unchanged(None));
                    }
                    let splittable = entries.len() >= self.split_threshold
                        && depth < self.max_depth
                        && !self.degenerate_split(&entries, routing, depth);
                    if splittable {
                        let mut all = entries;
                        all.push(LeafEntry {
                            hash,
                            key: self.owned_key(key)?,
                            value: self.owned_value(value)?,
                        });
                        self.split_leaf(recid, all, depth)?;
                    } else {
                        let leaf = encode_leaf(
                            &entries,
                            Some((hash, key, value)),
                            &*self.key_codec,
                            &*self.value_codec,
                        )?;
                        self.store.update(recid, &leaf)?;
                    }
                    self.note_insert(state, hash, key)?;
                    dispatch(listeners, key, None, Some(value), false);
                    return Ok(WriteOutcome::inserted());
                }
            }
        }
    }

    /// True when every current entry routes to the same slot as the
    /// newcomer, so a split would recreate one full leaf under a
    /// single-child directory. The leaf grows instead.
    fn degenerate_split(&self, entries: &[LeafEntry<K, V>], routing: u32, depth: u32) -> bool {
        let slot = slice_at(routing, depth);
        entries
            .iter()
            .all(|entry| slice_at(entry.hash >> self.conc_shift, depth) == slot)
    }

    fn all_one_slot(&self, entries: &[LeafEntry<K, V>], depth: u32) -> bool {
        let Some(first) = entries.first() else {
            return true;
        };
        let slot = slice_at(first.hash >> self.conc_shift, depth);
        entries
            .iter()
            .all(|entry| slice_at(entry.hash >> self.conc_shift, depth) == slot)
    }

    /// Rewrites an overflowing leaf as a directory. New child records
    /// are written before the directory that references them.
    fn split_leaf(
        &self,
        recid: Recid,
        entries: Vec<LeafEntry<K, V>>,
        depth: u32,
    ) -> CoreResult<()> {
        let dir = self.build_dir(entries, depth)?;
        self.store.update(recid, &encode_dir(&dir))?;
        Ok(())
    }

    fn build_dir(&self, entries: Vec<LeafEntry<K, V>>, depth: u32) -> CoreResult<DirNode> {
        let mut buckets: Vec<Vec<LeafEntry<K, V>>> = Vec::with_capacity(FANOUT);
        buckets.resize_with(FANOUT, Vec::new);
        for entry in entries {
            let slot = slice_at(entry.hash >> self.conc_shift, depth) as usize;
            buckets[slot].push(entry);
        }
        let mut dir = DirNode::new();
        for (slot, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let child = self.write_subtree(bucket, depth + 1)?;
            dir.insert(slot as u8, child);
        }
        Ok(dir)
    }

    fn write_subtree(&self, entries: Vec<LeafEntry<K, V>>, depth: u32) -> CoreResult<Recid> {
        if entries.len() <= self.split_threshold
            || depth >= self.max_depth
            || self.all_one_slot(&entries, depth)
        {
            let leaf = encode_leaf(&entries, None, &*self.key_codec, &*self.value_codec)?;
            return Ok(self.store.put(&leaf)?);
        }
        let dir = self.build_dir(entries, depth)?;
        Ok(self.store.put(&encode_dir(&dir))?)
    }

    pub(crate) fn remove(
        &self,
        hash: u32,
        key: &K,
        mode: RemoveMode<'_, V>,
        listeners: &[Arc<dyn ModificationListener<K, V>>],
    ) -> CoreResult<WriteOutcome<V>> {
        let mut state = self.state.write();
        self.remove_locked(&mut state, hash, key, mode, listeners, false)
    }

    fn remove_locked(
        &self,
        state: &mut SegmentState,
        hash: u32,
        key: &K,
        mode: RemoveMode<'_, V>,
        listeners: &[Arc<dyn ModificationListener<K, V>>],
        expired: bool,
    ) -> CoreResult<WriteOutcome<V>> {
        let routing = hash >> self.conc_shift;
        let mut recid = self.root;
        let mut depth = 0u32;
        let mut path: Vec<PathFrame> = Vec::new();
        let mut entries = loop {
            match self.read_node(recid)? {
                Node::Dir(dir) => {
                    let slot = slice_at(routing, depth);
                    let Some(child) = dir.child_at(slot) else {
                        return Ok(WriteOutcome::unchanged(None));
                    };
                    path.push(PathFrame { recid, dir, slot });
                    recid = child;
                    depth += 1;
                }
                Node::Leaf(entries) => break entries,
            }
        };

        let index = entries
            .iter()
            .position(|entry| entry.hash == hash && self.key_codec.equals(&entry.key, key));
        let Some(i) = index else {
            return Ok(WriteOutcome::unchanged(None));
        };
        if let RemoveMode::IfEquals(expected) = mode {
            if !self.value_codec.equals(&entries[i].value, expected) {
                return Ok(WriteOutcome::unchanged(None));
            }
        }

        let removed = entries.remove(i);
        if !entries.is_empty() {
            let leaf = encode_leaf(&entries, None, &*self.key_codec, &*self.value_codec)?;
            self.store.update(recid, &leaf)?;
        } else if path.is_empty() {
            // the root stays an empty leaf
            let leaf = encode_leaf::<K, V>(&[], None, &*self.key_codec, &*self.value_codec)?;
            self.store.update(recid, &leaf)?;
        } else {
            self.collapse_upward(path, recid)?;
        }
        self.note_remove(state, key)?;
        dispatch(listeners, key, Some(&removed.value), None, expired);
        Ok(WriteOutcome::changed(removed.value))
    }

    /// Propagates the disappearance of an emptied leaf up the path.
    /// Directories left with a single leaf child are replaced by that
    /// leaf; a directory left with a single directory child stays.
    /// Parents are rewritten before any record is deleted, so readers
    /// never observe a dangling recid.
    fn collapse_upward(&self, mut path: Vec<PathFrame>, emptied_leaf: Recid) -> CoreResult<()> {
        let mut doomed = vec![emptied_leaf];
        let mut action = Fix::Remove;
        while let Some(PathFrame {
            recid,
            mut dir,
            slot,
        }) = path.pop()
        {
            match action {
                Fix::Remove => dir.remove(slot),
                Fix::Replace(child) => dir.replace(slot, child),
            }
            let at_root = path.is_empty();
            match dir.child_count() {
                0 => {
                    if at_root {
                        let leaf = encode_leaf::<K, V>(
                            &[],
                            None,
                            &*self.key_codec,
                            &*self.value_codec,
                        )?;
                        self.store.update(recid, &leaf)?;
                        break;
                    }
                    doomed.push(recid);
                    action = Fix::Remove;
                }
                1 => {
                    let only = dir.children()[0];
                    let child_bytes = self.store.get(only)?;
                    if is_leaf_record(&child_bytes)? {
                        if at_root {
                            // promote the leaf into the stable root record
                            self.store.update(recid, &child_bytes)?;
                            doomed.push(only);
                            break;
                        }
                        doomed.push(recid);
                        action = Fix::Replace(only);
                    } else {
                        self.store.update(recid, &encode_dir(&dir))?;
                        break;
                    }
                }
                _ => {
                    self.store.update(recid, &encode_dir(&dir))?;
                    break;
                }
            }
        }
        for recid in doomed {
            self.store.delete(recid)?;
        }
        Ok(())
    }

    fn note_insert(&self, state: &mut SegmentState, hash: u32, key: &K) -> CoreResult<()> {
        self.count.fetch_add(1, Ordering::Relaxed);
        if self.policy.enabled() {
            let key_bytes = self.serialize_key(key)?;
            state
                .queues
                .on_insert(hash, key_bytes, Instant::now(), &self.policy);
        }
        Ok(())
    }

    fn note_update(&self, state: &mut SegmentState, hash: u32, key: &K) -> CoreResult<()> {
        if self.policy.enabled() {
            let key_bytes = self.serialize_key(key)?;
            state
                .queues
                .on_update(hash, key_bytes, Instant::now(), &self.policy);
        }
        Ok(())
    }

    fn note_remove(&self, state: &mut SegmentState, key: &K) -> CoreResult<()> {
        self.count.fetch_sub(1, Ordering::Relaxed);
        if self.policy.enabled() {
            let key_bytes = self.serialize_key(key)?;
            state.queues.on_remove(&key_bytes);
        }
        Ok(())
    }

    /// Removes every entry whose TTL deadline has passed. Runs under
    /// one continuous hold of the write lock. Stamps are consumed only
    /// once their entry is gone, so a removal that fails mid-pass
    /// leaves the entry tracked and the next pass retries it.
    pub(crate) fn evict_due(
        &self,
        now: Instant,
        listeners: &[Arc<dyn ModificationListener<K, V>>],
    ) -> CoreResult<u64> {
        if !self.policy.enabled() {
            return Ok(0);
        }
        let mut state = self.state.write();
        let mut evicted = 0;
        while let Some((hash, key_bytes)) = state.queues.peek_due(now) {
            let key = self.key_codec.deserialize(&mut ByteReader::new(&key_bytes))?;
            let outcome =
                self.remove_locked(&mut state, hash, &key, RemoveMode::Always, listeners, true)?;
            // confirm with the peeked bytes so the stamp cannot outlive
            // the removal, even for a key the trie no longer held
            state.queues.on_remove(&key_bytes);
            if outcome.changed {
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Evicts the entry with the oldest governing stamp, if any.
    pub(crate) fn evict_oldest(
        &self,
        listeners: &[Arc<dyn ModificationListener<K, V>>],
    ) -> CoreResult<bool> {
        let mut state = self.state.write();
        let Some((hash, key_bytes)) = state.queues.peek_oldest() else {
            return Ok(false);
        };
        let key = self.key_codec.deserialize(&mut ByteReader::new(&key_bytes))?;
        let outcome =
            self.remove_locked(&mut state, hash, &key, RemoveMode::Always, listeners, true)?;
        state.queues.on_remove(&key_bytes);
        Ok(outcome.changed)
    }

    /// Removes every entry. The root is rewritten as an empty leaf
    /// before any subtree record is deleted.
    pub(crate) fn clear(
        &self,
        listeners: &[Arc<dyn ModificationListener<K, V>>],
    ) -> CoreResult<()> {
        let mut state = self.state.write();
        let mut doomed = Vec::new();
        let mut entries = Vec::new();
        self.collect_subtree(self.root, &mut doomed, &mut entries)?;
        let empty = encode_leaf::<K, V>(&[], None, &*self.key_codec, &*self.value_codec)?;
        self.store.update(self.root, &empty)?;
        for recid in doomed {
            self.store.delete(recid)?;
        }
        self.count.store(0, Ordering::Relaxed);
        state.queues.clear();
        for entry in &entries {
            dispatch(listeners, &entry.key, Some(&entry.value), None, false);
        }
        Ok(())
    }

    fn collect_subtree(
        &self,
        recid: Recid,
        doomed: &mut Vec<Recid>,
        entries: &mut Vec<LeafEntry<K, V>>,
    ) -> CoreResult<()> {
        match self.read_node(recid)? {
            Node::Leaf(mut leaf_entries) => entries.append(&mut leaf_entries),
            Node::Dir(dir) => {
                for child in dir.children() {
                    doomed.push(*child);
                    self.collect_subtree(*child, doomed, entries)?;
                }
            }
        }
        Ok(())
    }

    /// Calls `f` for every entry while holding the read lock.
    pub(crate) fn for_each_entry(&self, f: &mut dyn FnMut(&K, &V)) -> CoreResult<()> {
        let _guard = self.state.read();
        self.visit_subtree(self.root, f)
    }

    fn visit_subtree(&self, recid: Recid, f: &mut dyn FnMut(&K, &V)) -> CoreResult<()> {
        match self.read_node(recid)? {
            Node::Leaf(entries) => {
                for entry in &entries {
                    f(&entry.key, &entry.value);
                }
            }
            Node::Dir(dir) => {
                for child in dir.children() {
                    self.visit_subtree(*child, f)?;
                }
            }
        }
        Ok(())
    }

    /// Appends every recid reachable from the root, the root included.
    pub(crate) fn collect_reachable(&self, out: &mut Vec<Recid>) -> CoreResult<()> {
        let _guard = self.state.read();
        out.push(self.root);
        self.reachable_subtree(self.root, out)
    }

    fn reachable_subtree(&self, recid: Recid, out: &mut Vec<Recid>) -> CoreResult<()> {
        if let Node::Dir(dir) = self.read_node(recid)? {
            for child in dir.children() {
                out.push(*child);
                self.reachable_subtree(*child, out)?;
            }
        }
        Ok(())
    }

    /// Accumulates hash collision statistics across this segment.
    pub(crate) fn collision_stats(&self, stats: &mut CollisionStats) -> CoreResult<()> {
        let _guard = self.state.read();
        self.collision_subtree(self.root, stats)
    }

    fn collision_subtree(&self, recid: Recid, stats: &mut CollisionStats) -> CoreResult<()> {
        match self.read_node(recid)? {
            Node::Leaf(entries) => {
                stats.entry_count += entries.len() as u64;
                let mut hashes: Vec<u32> = entries.iter().map(|entry| entry.hash).collect();
                hashes.sort_unstable();
                let mut i = 0;
                while i < hashes.len() {
                    let mut j = i + 1;
                    while j < hashes.len() && hashes[j] == hashes[i] {
                        j += 1;
                    }
                    stats.collision_count += (j - i - 1) as u64;
                    i = j;
                }
            }
            Node::Dir(dir) => {
                for child in dir.children() {
                    self.collision_subtree(*child, stats)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{IdentityCodec, MaskCodec};
    use hashtrie_store::HeapStore;

    fn no_policy() -> ExpirePolicy {
        ExpirePolicy {
            create_ttl: None,
            update_ttl: None,
            access_ttl: None,
            bounded: false,
        }
    }

    fn test_segment(
        store: &Arc<HeapStore>,
        split_threshold: usize,
        conc_shift: u32,
    ) -> Segment<u32, u32> {
        Segment::new(
            Arc::clone(store) as Arc<dyn RecordStore>,
            Arc::new(IdentityCodec),
            Arc::new(IdentityCodec),
            no_policy(),
            split_threshold,
            conc_shift,
        )
        .unwrap()
    }

    fn masked_segment(
        store: &Arc<HeapStore>,
        mask: u32,
        split_threshold: usize,
    ) -> Segment<u32, u32> {
        Segment::new(
            Arc::clone(store) as Arc<dyn RecordStore>,
            Arc::new(MaskCodec { mask }),
            Arc::new(IdentityCodec),
            no_policy(),
            split_threshold,
            0,
        )
        .unwrap()
    }

    fn put(segment: &Segment<u32, u32>, key: u32, value: u32) {
        let outcome = segment
            .insert(key, &key, &value, WriteMode::Put, &[])
            .unwrap();
        assert!(outcome.changed);
    }

    #[test]
    fn split_and_collapse_record_counts() {
        let store = Arc::new(HeapStore::new());
        let segment = test_segment(&store, 1, 0);
        // empty root leaf
        assert_eq!(store.record_count(), 1);

        put(&segment, 0x2, 100);
        assert_eq!(store.record_count(), 1);

        // second entry splits the root: dir + two leaves
        put(&segment, 0x21, 101);
        assert_eq!(store.record_count(), 3);

        // shares slot 1 with 0x21, splits that leaf one level down
        put(&segment, 0x111, 102);
        assert_eq!(store.record_count(), 5);

        // shares slots 1 and 1 with 0x111, splits at depth 2
        put(&segment, 0x211, 103);
        assert_eq!(store.record_count(), 7);

        for (key, value) in [(0x2, 100), (0x21, 101), (0x111, 102), (0x211, 103)] {
            assert_eq!(segment.get(key, &key).unwrap(), Some(value));
        }
        assert_eq!(segment.len(), 4);

        // leaf empties but its parent keeps a directory child, so
        // only the leaf record goes away
        let outcome = segment.remove(0x21, &0x21, RemoveMode::Always, &[]).unwrap();
        assert_eq!(outcome.previous, Some(101));
        assert_eq!(store.record_count(), 6);

        // removing 0x111 leaves a chain of single-leaf directories
        // that collapses two levels in one pass
        segment.remove(0x111, &0x111, RemoveMode::Always, &[]).unwrap();
        assert_eq!(store.record_count(), 3);
        assert_eq!(segment.get(0x211, &0x211).unwrap(), Some(103));

        // root directory down to one leaf child: promoted into the
        // stable root record
        segment.remove(0x211, &0x211, RemoveMode::Always, &[]).unwrap();
        assert_eq!(store.record_count(), 1);
        assert_eq!(segment.get(0x2, &0x2).unwrap(), Some(100));

        segment.remove(0x2, &0x2, RemoveMode::Always, &[]).unwrap();
        assert_eq!(store.record_count(), 1);
        assert_eq!(segment.len(), 0);
    }

    #[test]
    fn degenerate_split_grows_leaf_in_place() {
        let store = Arc::new(HeapStore::new());
        // every key hashes to zero, so no amount of hash bits can
        // separate the entries
        let segment = masked_segment(&store, 0, 1);

        for key in 0..5u32 {
            let outcome = segment.insert(0, &key, &(key * 10), WriteMode::Put, &[]).unwrap();
            assert!(outcome.changed);
        }
        assert_eq!(store.record_count(), 1);
        assert_eq!(segment.len(), 5);
        for key in 0..5u32 {
            assert_eq!(segment.get(0, &key).unwrap(), Some(key * 10));
        }

        for key in 0..5u32 {
            let outcome = segment.remove(0, &key, RemoveMode::Always, &[]).unwrap();
            assert_eq!(outcome.previous, Some(key * 10));
        }
        assert_eq!(store.record_count(), 1);
        assert_eq!(segment.len(), 0);
    }

    #[test]
    fn routing_ignores_segment_selector_bits() {
        let store = Arc::new(HeapStore::new());
        // conc_shift 3: low three bits pick the segment and must not
        // influence routing inside it
        let segment = test_segment(&store, 1, 3);

        // 0x08 and 0x10 differ only above the selector: routing 1 and 2
        put(&segment, 0x08, 1);
        put(&segment, 0x10, 2);
        assert_eq!(store.record_count(), 3);
        assert_eq!(segment.get(0x08, &0x08).unwrap(), Some(1));
        assert_eq!(segment.get(0x10, &0x10).unwrap(), Some(2));
    }

    #[test]
    fn conditional_writes_respect_current_value() {
        let store = Arc::new(HeapStore::new());
        let segment = test_segment(&store, 8, 0);

        // replace on an absent key is a no-op
        let outcome = segment.insert(7, &7, &1, WriteMode::Replace, &[]).unwrap();
        assert!(!outcome.changed);
        assert_eq!(segment.get(7, &7).unwrap(), None);

        put(&segment, 7, 1);

        let outcome = segment.insert(7, &7, &2, WriteMode::PutIfAbsent, &[]).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.previous, Some(1));

        let outcome = segment
            .insert(7, &7, &2, WriteMode::ReplaceIfEquals(&9), &[])
            .unwrap();
        assert!(!outcome.changed);
        assert_eq!(segment.get(7, &7).unwrap(), Some(1));

        let outcome = segment
            .insert(7, &7, &2, WriteMode::ReplaceIfEquals(&1), &[])
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(segment.get(7, &7).unwrap(), Some(2));

        let outcome = segment.remove(7, &7, RemoveMode::IfEquals(&9), &[]).unwrap();
        assert!(!outcome.changed);
        let outcome = segment.remove(7, &7, RemoveMode::IfEquals(&2), &[]).unwrap();
        assert!(outcome.changed);
        assert_eq!(segment.get(7, &7).unwrap(), None);
    }

    #[test]
    fn oversized_leaf_from_collisions_splits_lazily() {
        let store = Arc::new(HeapStore::new());
        let segment = test_segment(&store, 2, 0);

        // three entries share slot 3 at depth 0, so the threshold is
        // exceeded without a split
        for key in [0x03, 0x13, 0x23] {
            put(&segment, key, key);
        }
        assert_eq!(store.record_count(), 1);

        // a fourth entry with a different slot forces the split; the
        // collided group lands in one child and splits further since
        // its members separate at depth 1
        put(&segment, 0x04, 0x04);
        for key in [0x03, 0x13, 0x23, 0x04] {
            assert_eq!(segment.get(key, &key).unwrap(), Some(key));
        }
        // root dir + leaf(4) + dir(3) + three leaves
        assert_eq!(store.record_count(), 6);
    }

    #[test]
    fn collision_stats_group_by_hash() {
        let store = Arc::new(HeapStore::new());
        // hash keeps only the high byte: 0x01xx keys collide with each
        // other, 0x02xx keys form a second group
        let segment = masked_segment(&store, 0xFF00, 8);

        for key in [0x0101u32, 0x0102, 0x0103, 0x0201, 0x0202, 0x0301] {
            let hash = key & 0xFF00;
            segment.insert(hash, &key, &key, WriteMode::Put, &[]).unwrap();
        }

        let mut stats = CollisionStats::default();
        segment.collision_stats(&mut stats).unwrap();
        assert_eq!(stats.entry_count, 6);
        // two excess entries in the 0x0100 group, one in 0x0200
        assert_eq!(stats.collision_count, 3);
    }
}
