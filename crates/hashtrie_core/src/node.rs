//! Trie node model and record encoding.
//!
//! Every node lives in its own record. A record's first byte is a tag
//! distinguishing the two node kinds:
//!
//! * leaf, tag `0`: `[count: u32 LE]` then `count` entries of
//!   `[hash: u32 LE][key bytes][value bytes]`, key and value encoded by
//!   the map codecs
//! * directory, tag `1`: `[present: u16 LE]` then one `[recid: u64 LE]`
//!   per set bit of `present`, in ascending slot order
//!
//! Directory nodes store only the children that exist. A child's
//! position in the recid array is the number of set `present` bits
//! below its slot, so lookup is a mask and a popcount.

use crate::error::{CoreError, CoreResult};
use hashtrie_codec::{ByteReader, Codec, CodecError};
use hashtrie_store::Recid;

/// Hash bits consumed per directory level.
pub(crate) const BITS_PER_LEVEL: u32 = 4;
/// Child slots per directory node.
pub(crate) const FANOUT: usize = 1 << BITS_PER_LEVEL;

const TAG_LEAF: u8 = 0;
const TAG_DIR: u8 = 1;

/// One key/value pair stored in a leaf, with the key's full hash.
#[derive(Debug)]
pub(crate) struct LeafEntry<K, V> {
    pub(crate) hash: u32,
    pub(crate) key: K,
    pub(crate) value: V,
}

/// Directory node: a bitmap of occupied slots plus the child recids in
/// slot order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirNode {
    present: u16,
    children: Vec<Recid>,
}

impl DirNode {
    pub(crate) fn new() -> Self {
        Self {
            present: 0,
            children: Vec::new(),
        }
    }

    fn index_of(&self, slot: u8) -> usize {
        let below = self.present & ((1u16 << slot) - 1);
        below.count_ones() as usize
    }

    /// Returns the child recid for `slot`, if one exists.
    pub(crate) fn child_at(&self, slot: u8) -> Option<Recid> {
        if self.present & (1u16 << slot) == 0 {
            None
        } else {
            Some(self.children[self.index_of(slot)])
        }
    }

    /// Adds a child at an empty slot.
    pub(crate) fn insert(&mut self, slot: u8, child: Recid) {
        let index = self.index_of(slot);
        self.children.insert(index, child);
        self.present |= 1u16 << slot;
    }

    /// Removes the child at an occupied slot.
    pub(crate) fn remove(&mut self, slot: u8) {
        let index = self.index_of(slot);
        self.children.remove(index);
        self.present &= !(1u16 << slot);
    }

    /// Swaps the child at an occupied slot.
    pub(crate) fn replace(&mut self, slot: u8, child: Recid) {
        let index = self.index_of(slot);
        self.children[index] = child;
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn children(&self) -> &[Recid] {
        &self.children
    }
}

/// A decoded node record.
#[derive(Debug)]
pub(crate) enum Node<K, V> {
    Leaf(Vec<LeafEntry<K, V>>),
    Dir(DirNode),
}

/// Encodes a leaf record from existing entries plus an optional
/// appended entry. The append form spares callers from materializing
/// an owned copy of a borrowed key and value.
pub(crate) fn encode_leaf<K, V>(
    entries: &[LeafEntry<K, V>],
    extra: Option<(u32, &K, &V)>,
    key_codec: &dyn Codec<K>,
    value_codec: &dyn Codec<V>,
) -> CoreResult<Vec<u8>> {
    let count = u32::try_from(entries.len() + usize::from(extra.is_some()))
        .map_err(|_| CodecError::encoding_failed("leaf entry count exceeds u32 range"))?;
    let mut out = Vec::with_capacity(5 + entries.len() * 16);
    out.push(TAG_LEAF);
    out.extend_from_slice(&count.to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.hash.to_le_bytes());
        key_codec.serialize(&entry.key, &mut out)?;
        value_codec.serialize(&entry.value, &mut out)?;
    }
    if let Some((hash, key, value)) = extra {
        out.extend_from_slice(&hash.to_le_bytes());
        key_codec.serialize(key, &mut out)?;
        value_codec.serialize(value, &mut out)?;
    }
    Ok(out)
}

/// Encodes a directory record.
pub(crate) fn encode_dir(dir: &DirNode) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + dir.children.len() * 8);
    out.push(TAG_DIR);
    out.extend_from_slice(&dir.present.to_le_bytes());
    for child in &dir.children {
        out.extend_from_slice(&child.as_u64().to_le_bytes());
    }
    out
}

/// Decodes a node record, validating its structure.
pub(crate) fn decode_node<K, V>(
    bytes: &[u8],
    key_codec: &dyn Codec<K>,
    value_codec: &dyn Codec<V>,
) -> CoreResult<Node<K, V>> {
    let mut reader = ByteReader::new(bytes);
    let tag = reader.read_u8()?;
    let node = match tag {
        TAG_LEAF => {
            let count = reader.read_u32()? as usize;
            let mut entries = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let hash = reader.read_u32()?;
                let key = key_codec.deserialize(&mut reader)?;
                let value = value_codec.deserialize(&mut reader)?;
                entries.push(LeafEntry { hash, key, value });
            }
            Node::Leaf(entries)
        }
        TAG_DIR => {
            let present = reader.read_u16()?;
            if present == 0 {
                return Err(CoreError::corrupted("directory node with no children"));
            }
            let count = present.count_ones() as usize;
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                let raw = reader.read_u64()?;
                if raw == 0 {
                    return Err(CoreError::corrupted("zero recid in directory node"));
                }
                children.push(Recid::new(raw));
            }
            Node::Dir(DirNode { present, children })
        }
        other => {
            return Err(CoreError::corrupted(format!("unknown node tag {other}")));
        }
    };
    if !reader.is_empty() {
        return Err(CoreError::corrupted(format!(
            "{} trailing bytes after node",
            reader.remaining()
        )));
    }
    Ok(node)
}

/// Peeks at a record's tag without decoding entries.
pub(crate) fn is_leaf_record(bytes: &[u8]) -> CoreResult<bool> {
    match bytes.first() {
        Some(&TAG_LEAF) => Ok(true),
        Some(&TAG_DIR) => Ok(false),
        Some(&other) => Err(CoreError::corrupted(format!("unknown node tag {other}"))),
        None => Err(CoreError::corrupted("empty node record")),
    }
}
