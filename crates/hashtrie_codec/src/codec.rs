//! Codec trait and primitive codecs.

use crate::error::{CodecError, CodecResult};
use crate::reader::ByteReader;

/// Mixes a 32-bit value with a seed through an avalanche finalizer.
///
/// The seed is folded in up front (scaled by the golden-ratio constant)
/// so that different seeds produce unrelated collision patterns over the
/// same inputs. The finalizer is the standard murmur-style sequence.
#[must_use]
pub fn mix32(value: u32, seed: u32) -> u32 {
    let mut h = value ^ seed.wrapping_mul(0x9E37_79B9);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    h = h.wrapping_mul(0xC2B2_AE35);
    h ^= h >> 16;
    h
}

/// Seeded FNV-1a over a byte slice, finalized through [`mix32`].
fn hash_bytes(bytes: &[u8], seed: u32) -> u32 {
    let mut h = 0x811C_9DC5u32 ^ seed;
    for &byte in bytes {
        h ^= u32::from(byte);
        h = h.wrapping_mul(0x0100_0193);
    }
    mix32(h, seed)
}

/// Per-type capability object consumed by the hash trie engine.
///
/// A map instance takes one codec for its key type and one for its value
/// type. The engine relies on three properties:
///
/// - `deserialize(serialize(v))` reproduces a value `equals`-equal to `v`
///   and consumes exactly the bytes `serialize` wrote, so that several
///   encodings can be concatenated inside one node record
/// - `hash` is a pure function of `(value, seed)`; the engine detects
///   violations at insert time and rejects the operation rather than
///   corrupting its directory
/// - `equals` is an equivalence relation and defines key identity
pub trait Codec<T>: Send + Sync {
    /// Appends the encoding of `value` to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    fn serialize(&self, value: &T, out: &mut Vec<u8>) -> CodecResult<()>;

    /// Decodes one value, consuming exactly its encoding from `input`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated or malformed.
    fn deserialize(&self, input: &mut ByteReader<'_>) -> CodecResult<T>;

    /// Hashes `value` under `seed`.
    fn hash(&self, value: &T, seed: u32) -> u32;

    /// Whether `a` and `b` are the same value.
    fn equals(&self, a: &T, b: &T) -> bool;
}

/// Codec for `u32` keys or values (little-endian, fixed width).
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Codec;

impl Codec<u32> for U32Codec {
    fn serialize(&self, value: &u32, out: &mut Vec<u8>) -> CodecResult<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn deserialize(&self, input: &mut ByteReader<'_>) -> CodecResult<u32> {
        input.read_u32()
    }

    fn hash(&self, value: &u32, seed: u32) -> u32 {
        mix32(*value, seed)
    }

    fn equals(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

/// Codec for `i64` keys or values (little-endian, fixed width).
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl Codec<i64> for I64Codec {
    fn serialize(&self, value: &i64, out: &mut Vec<u8>) -> CodecResult<()> {
        out.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn deserialize(&self, input: &mut ByteReader<'_>) -> CodecResult<i64> {
        input.read_i64()
    }

    fn hash(&self, value: &i64, seed: u32) -> u32 {
        let v = *value as u64;
        mix32((v ^ (v >> 32)) as u32, seed)
    }

    fn equals(&self, a: &i64, b: &i64) -> bool {
        a == b
    }
}

/// Codec for `String` keys or values (u32 length prefix + UTF-8 bytes).
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn serialize(&self, value: &String, out: &mut Vec<u8>) -> CodecResult<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| CodecError::encoding_failed("string longer than u32::MAX bytes"))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn deserialize(&self, input: &mut ByteReader<'_>) -> CodecResult<String> {
        let len = input.read_u32()? as usize;
        let bytes = input.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn hash(&self, value: &String, seed: u32) -> u32 {
        hash_bytes(value.as_bytes(), seed)
    }

    fn equals(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

/// Codec for raw `Vec<u8>` keys or values (u32 length prefix + bytes).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn serialize(&self, value: &Vec<u8>, out: &mut Vec<u8>) -> CodecResult<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| CodecError::encoding_failed("byte string longer than u32::MAX"))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(value);
        Ok(())
    }

    fn deserialize(&self, input: &mut ByteReader<'_>) -> CodecResult<Vec<u8>> {
        let len = input.read_u32()? as usize;
        Ok(input.read_bytes(len)?.to_vec())
    }

    fn hash(&self, value: &Vec<u8>, seed: u32) -> u32 {
        hash_bytes(value, seed)
    }

    fn equals(&self, a: &Vec<u8>, b: &Vec<u8>) -> bool {
        a == b
    }
}
