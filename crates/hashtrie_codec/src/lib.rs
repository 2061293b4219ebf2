//! # hashtrie Codec
//!
//! Key/value codec trait and primitive codecs for hashtrie.
//!
//! The hash trie engine stores keys and values as bytes behind its record
//! store and never inspects them directly. Everything type-specific -
//! serialization, seeded hashing, and equality - is supplied through a
//! [`Codec`] capability object, one per key type and one per value type.
//!
//! ## Contract
//!
//! - `serialize` followed by `deserialize` must reproduce an equal value
//! - `deserialize` must consume exactly the bytes `serialize` produced,
//!   so codec output can be concatenated inside node records
//! - `hash` must be a pure function of the value and the seed; a hash
//!   that varies between calls corrupts routing and is rejected by the
//!   engine at insert time
//! - `equals` defines the map's key identity
//!
//! ## Usage
//!
//! ```
//! use hashtrie_codec::{Codec, StringCodec};
//!
//! let codec = StringCodec;
//! let mut buf = Vec::new();
//! codec.serialize(&"alpha".to_string(), &mut buf).unwrap();
//!
//! let mut reader = hashtrie_codec::ByteReader::new(&buf);
//! let back = codec.deserialize(&mut reader).unwrap();
//! assert_eq!(back, "alpha");
//! assert!(reader.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod reader;

pub use codec::{mix32, BytesCodec, Codec, I64Codec, StringCodec, U32Codec};
pub use error::{CodecError, CodecResult};
pub use reader::ByteReader;
