//! Error types for the map engine.

use hashtrie_codec::CodecError;
use hashtrie_store::StoreError;
use thiserror::Error;

/// Convenience alias for engine results.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by map operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// A stored entry hashed to a different value than the live codec
    /// produces for the same key. The key codec or its seed changed
    /// between writes, or the hash function is not deterministic.
    #[error("hash inconsistency: stored hash {stored:#010x} does not match computed hash {computed:#010x}")]
    HashInconsistent {
        /// Hash persisted alongside the entry.
        stored: u32,
        /// Hash computed from the entry key just now.
        computed: u32,
    },

    /// Key or value serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The underlying record store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A persisted node could not be interpreted.
    #[error("corrupted map structure: {message}")]
    Corrupted {
        /// Description of the structural violation.
        message: String,
    },

    /// The map was closed and can no longer serve operations.
    #[error("map is closed")]
    Closed,

    /// The supplied configuration is unusable.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the rejected setting.
        message: String,
    },
}

impl CoreError {
    /// Creates a [`CoreError::HashInconsistent`] error.
    pub fn hash_inconsistent(stored: u32, computed: u32) -> Self {
        Self::HashInconsistent { stored, computed }
    }

    /// Creates a [`CoreError::Corrupted`] error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a [`CoreError::InvalidConfig`] error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
