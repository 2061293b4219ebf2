//! # hashtrie Store
//!
//! Record store trait and in-memory backend for hashtrie.
//!
//! This crate provides the lowest-level storage abstraction for the hash
//! trie engine. Record stores are **opaque byte stores** addressed by
//! recid - they do not interpret the data they store.
//!
//! ## Design Principles
//!
//! - Records are byte blobs addressed by an opaque [`Recid`]
//! - Recids are never zero and never reused within a store's lifetime
//! - No knowledge of directory nodes, leaves, or codecs
//! - Implementations must be internally synchronized (`Send + Sync`),
//!   since one store handle may be shared by several map segments
//!
//! ## Available Stores
//!
//! - [`HeapStore`] - In-memory reference store for tests and ephemeral maps
//!
//! ## Example
//!
//! ```rust
//! use hashtrie_store::{HeapStore, RecordStore};
//!
//! let store = HeapStore::new();
//! let recid = store.put(b"hello world").unwrap();
//! let data = store.get(recid).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod heap;
mod store;

pub use error::{StoreError, StoreResult};
pub use heap::HeapStore;
pub use store::{Recid, RecordStore};
