//! # hashtrie Core
//!
//! A concurrent, record-oriented hash map built on pluggable storage.
//!
//! [`HashTrieMap`] hashes keys through a [`Codec`](hashtrie_codec::Codec)
//! and distributes entries over independently locked segments, selected
//! by the low bits of the hash. Within a segment the remaining hash bits
//! route through a trie of bitmap-compressed directory nodes down to
//! leaf records holding `(hash, key, value)` triples. Nodes are records
//! in a [`RecordStore`](hashtrie_store::RecordStore), so a map can live
//! in memory, in a file-backed store, or across one store per segment.
//!
//! ## Features
//!
//! - Atomic conditional operations: `put_if_absent`, `replace`,
//!   `replace_if_equals`, `remove_if_equals`
//! - Expiration by create, update, or access TTL, and eviction by entry
//!   count or store footprint, run by a background thread or piggybacked
//!   on queue-touching operations ([`MapConfig`])
//! - Modification listeners observing every entry transition, including
//!   evictions ([`ModificationListener`])
//! - A read-through value loader filling misses ([`ValueLoader`])
//! - Structural self-checks: hash stability violations surface as
//!   [`CoreError::HashInconsistent`], record leaks via
//!   [`HashTrieMap::verify`]
//!
//! ## Example
//!
//! ```
//! use hashtrie_codec::{StringCodec, U32Codec};
//! use hashtrie_core::{HashTrieMap, MapConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> hashtrie_core::CoreResult<()> {
//! let map = HashTrieMap::with_config(
//!     Arc::new(StringCodec),
//!     Arc::new(U32Codec),
//!     MapConfig::default().conc_shift(4),
//! )?;
//!
//! map.put(&"visits".to_owned(), &1)?;
//! assert_eq!(map.put(&"visits".to_owned(), &2)?, Some(1));
//! assert_eq!(map.get(&"visits".to_owned())?, Some(2));
//! assert!(map.put_if_absent(&"visits".to_owned(), &9)?.is_some());
//! assert_eq!(map.size()?, 1);
//! map.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod expire;
mod listener;
mod map;
mod node;
mod segment;
#[cfg(test)]
pub(crate) mod testutil;

pub use config::{MapConfig, MAX_CONC_SHIFT};
pub use error::{CoreError, CoreResult};
pub use listener::ModificationListener;
pub use map::{CollisionStats, HashTrieMap, ValueLoader};
