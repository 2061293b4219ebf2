//! Error types for record store operations.

use std::io;
use thiserror::Error;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The recid was never allocated by this store.
    #[error("recid {recid} was never allocated")]
    RecidNotFound {
        /// The offending recid value.
        recid: u64,
    },

    /// The recid was allocated but has since been deleted.
    #[error("recid {recid} was deleted")]
    RecidDeleted {
        /// The offending recid value.
        recid: u64,
    },

    /// The store is closed.
    #[error("store is closed")]
    Closed,
}
