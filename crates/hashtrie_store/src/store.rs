//! Record store trait definition.

use crate::error::StoreResult;
use std::fmt;

/// Identifies a record's physical location within a store.
///
/// Recids are opaque handles: callers must not assume they are contiguous,
/// ordered by allocation, or ever reused. Zero is never returned by an
/// allocation, leaving it free as a "no record" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Recid(u64);

impl Recid {
    /// Creates a recid from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Recid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recid-addressed record store.
///
/// Record stores hold **opaque byte records**. They provide allocation,
/// lookup, in-place update, and deletion by recid. The hash trie engine
/// owns all record format interpretation - stores do not understand
/// directory nodes or leaves.
///
/// # Invariants
///
/// - `put` returns a recid that is nonzero and never handed out before
/// - `get` returns exactly the bytes most recently written for that recid
/// - A deleted recid stays invalid forever (no reuse)
/// - Implementations are internally synchronized; one handle may serve
///   several threads and several map segments concurrently
pub trait RecordStore: Send + Sync {
    /// Allocates a new record holding `data` and returns its recid.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot allocate or write.
    fn put(&self, data: &[u8]) -> StoreResult<Recid>;

    /// Reads the record addressed by `recid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the recid was never allocated, was deleted,
    /// or the read fails.
    fn get(&self, recid: Recid) -> StoreResult<Vec<u8>>;

    /// Replaces the record addressed by `recid` with `data`.
    ///
    /// The recid remains valid; only the record's contents change.
    ///
    /// # Errors
    ///
    /// Returns an error if the recid is not live or the write fails.
    fn update(&self, recid: Recid, data: &[u8]) -> StoreResult<()>;

    /// Deletes the record addressed by `recid`.
    ///
    /// The recid becomes permanently invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if the recid is not live or the delete fails.
    fn delete(&self, recid: Recid) -> StoreResult<()>;

    /// Atomically replaces the record if its current contents equal
    /// `expected`.
    ///
    /// Returns `true` if the swap was performed, `false` if the current
    /// contents differed.
    ///
    /// # Errors
    ///
    /// Returns an error if the recid is not live or the access fails.
    fn compare_and_swap(&self, recid: Recid, expected: &[u8], new: &[u8]) -> StoreResult<bool>;

    /// Returns the recids of all live records, in unspecified order.
    ///
    /// Used for structural verification and bulk teardown.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn all_recids(&self) -> StoreResult<Vec<Recid>>;

    /// Returns the store's current footprint in bytes.
    ///
    /// For persistent stores this is the on-disk/off-heap size; for the
    /// reference heap store it is the sum of live record lengths. Drives
    /// the store-size eviction policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn storage_size(&self) -> StoreResult<u64>;
}
