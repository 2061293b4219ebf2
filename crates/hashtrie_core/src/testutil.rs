//! Codecs with controllable hashing, shared across test modules.

use hashtrie_codec::{ByteReader, Codec, CodecResult};
use std::sync::atomic::{AtomicBool, Ordering};

/// `u32` codec whose hash is the value itself, giving tests exact
/// control over trie routing.
pub(crate) struct IdentityCodec;

impl Codec<u32> for IdentityCodec {
    fn serialize(&self, value: &u32, out: &mut Vec<u8>) -> CodecResult<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn deserialize(&self, input: &mut ByteReader<'_>) -> CodecResult<u32> {
        input.read_u32()
    }

    fn hash(&self, value: &u32, _seed: u32) -> u32 {
        *value
    }

    fn equals(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

/// `u32` codec hashing through a bitmask, so distinct keys collide on
/// demand.
pub(crate) struct MaskCodec {
    pub(crate) mask: u32,
}

impl Codec<u32> for MaskCodec {
    fn serialize(&self, value: &u32, out: &mut Vec<u8>) -> CodecResult<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn deserialize(&self, input: &mut ByteReader<'_>) -> CodecResult<u32> {
        input.read_u32()
    }

    fn hash(&self, value: &u32, _seed: u32) -> u32 {
        *value & self.mask
    }

    fn equals(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

/// `u32` codec whose hash function can be changed out from under a live
/// map, emulating a key type whose hash is not a pure function of its
/// value.
pub(crate) struct FlipCodec {
    flipped: AtomicBool,
}

impl FlipCodec {
    pub(crate) fn new() -> Self {
        Self {
            flipped: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent hash differ from earlier ones.
    pub(crate) fn flip(&self) {
        self.flipped.store(true, Ordering::SeqCst);
    }
}

impl Codec<u32> for FlipCodec {
    fn serialize(&self, value: &u32, out: &mut Vec<u8>) -> CodecResult<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn deserialize(&self, input: &mut ByteReader<'_>) -> CodecResult<u32> {
        input.read_u32()
    }

    fn hash(&self, value: &u32, _seed: u32) -> u32 {
        if self.flipped.load(Ordering::SeqCst) {
            !*value
        } else {
            *value
        }
    }

    fn equals(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}
