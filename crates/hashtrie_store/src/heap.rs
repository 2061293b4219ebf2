//! In-memory record store for tests and ephemeral maps.

use crate::error::{StoreError, StoreResult};
use crate::store::{Recid, RecordStore};
use parking_lot::RwLock;
use std::fmt;

/// One allocation slot. Deleted records leave a tombstone so their recid
/// is never handed out again.
#[derive(Debug)]
enum Slot {
    Live(Vec<u8>),
    Free,
}

/// An in-memory record store.
///
/// Records live in a slot vector guarded by a read-write lock. Recids are
/// `slot index + 1`, so recid zero is never allocated, and deleted slots
/// are tombstoned rather than reclaimed.
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral maps that don't need persistence
///
/// # Thread Safety
///
/// The store is internally synchronized and can be shared across threads
/// (and across map segments) behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use hashtrie_store::{HeapStore, RecordStore};
///
/// let store = HeapStore::new();
/// let recid = store.put(b"payload").unwrap();
/// store.update(recid, b"new payload").unwrap();
/// assert_eq!(store.get(recid).unwrap(), b"new payload");
/// ```
#[derive(Default)]
pub struct HeapStore {
    slots: RwLock<Vec<Slot>>,
}

impl HeapStore {
    /// Creates a new empty heap store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live records.
    ///
    /// Useful for record-accounting assertions in tests.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    /// Looks up a slot index, distinguishing never-allocated from deleted.
    fn check_live(slots: &[Slot], recid: Recid) -> StoreResult<usize> {
        let raw = recid.as_u64();
        if raw == 0 || raw as usize > slots.len() {
            return Err(StoreError::RecidNotFound { recid: raw });
        }
        let index = (raw - 1) as usize;
        match slots[index] {
            Slot::Live(_) => Ok(index),
            Slot::Free => Err(StoreError::RecidDeleted { recid: raw }),
        }
    }
}

impl RecordStore for HeapStore {
    fn put(&self, data: &[u8]) -> StoreResult<Recid> {
        let mut slots = self.slots.write();
        slots.push(Slot::Live(data.to_vec()));
        Ok(Recid::new(slots.len() as u64))
    }

    fn get(&self, recid: Recid) -> StoreResult<Vec<u8>> {
        let slots = self.slots.read();
        let index = Self::check_live(&slots, recid)?;
        match &slots[index] {
            Slot::Live(data) => Ok(data.clone()),
            Slot::Free => Err(StoreError::RecidDeleted {
                recid: recid.as_u64(),
            }),
        }
    }

    fn update(&self, recid: Recid, data: &[u8]) -> StoreResult<()> {
        let mut slots = self.slots.write();
        let index = Self::check_live(&slots, recid)?;
        slots[index] = Slot::Live(data.to_vec());
        Ok(())
    }

    fn delete(&self, recid: Recid) -> StoreResult<()> {
        let mut slots = self.slots.write();
        let index = Self::check_live(&slots, recid)?;
        slots[index] = Slot::Free;
        Ok(())
    }

    fn compare_and_swap(&self, recid: Recid, expected: &[u8], new: &[u8]) -> StoreResult<bool> {
        let mut slots = self.slots.write();
        let index = Self::check_live(&slots, recid)?;
        match &slots[index] {
            Slot::Live(data) if data.as_slice() == expected => {
                slots[index] = Slot::Live(new.to_vec());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn all_recids(&self) -> StoreResult<Vec<Recid>> {
        let slots = self.slots.read();
        Ok(slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(index, _)| Recid::new(index as u64 + 1))
            .collect())
    }

    fn storage_size(&self) -> StoreResult<u64> {
        let slots = self.slots.read();
        Ok(slots
            .iter()
            .map(|slot| match slot {
                Slot::Live(data) => data.len() as u64,
                Slot::Free => 0,
            })
            .sum())
    }
}

impl fmt::Debug for HeapStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapStore")
            .field("records", &self.record_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn heap_new_is_empty() {
        let store = HeapStore::new();
        assert_eq!(store.record_count(), 0);
        assert!(store.all_recids().unwrap().is_empty());
        assert_eq!(store.storage_size().unwrap(), 0);
    }

    #[test]
    fn heap_put_get_roundtrip() {
        let store = HeapStore::new();
        let recid = store.put(b"hello world").unwrap();
        assert_eq!(store.get(recid).unwrap(), b"hello world");
    }

    #[test]
    fn heap_recids_start_at_one() {
        let store = HeapStore::new();
        let recid = store.put(b"first").unwrap();
        assert_eq!(recid.as_u64(), 1);
    }

    #[test]
    fn heap_put_returns_distinct_recids() {
        let store = HeapStore::new();
        let a = store.put(b"a").unwrap();
        let b = store.put(b"b").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.get(a).unwrap(), b"a");
        assert_eq!(store.get(b).unwrap(), b"b");
    }

    #[test]
    fn heap_get_unknown_recid_fails() {
        let store = HeapStore::new();
        let result = store.get(Recid::new(99));
        assert!(matches!(result, Err(StoreError::RecidNotFound { recid: 99 })));
    }

    #[test]
    fn heap_get_zero_recid_fails() {
        let store = HeapStore::new();
        store.put(b"data").unwrap();
        let result = store.get(Recid::new(0));
        assert!(matches!(result, Err(StoreError::RecidNotFound { recid: 0 })));
    }

    #[test]
    fn heap_update_replaces_contents() {
        let store = HeapStore::new();
        let recid = store.put(b"old").unwrap();
        store.update(recid, b"new").unwrap();
        assert_eq!(store.get(recid).unwrap(), b"new");
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn heap_delete_tombstones() {
        let store = HeapStore::new();
        let recid = store.put(b"doomed").unwrap();
        store.delete(recid).unwrap();

        assert_eq!(store.record_count(), 0);
        let result = store.get(recid);
        assert!(matches!(result, Err(StoreError::RecidDeleted { .. })));
    }

    #[test]
    fn heap_delete_twice_fails() {
        let store = HeapStore::new();
        let recid = store.put(b"once").unwrap();
        store.delete(recid).unwrap();
        assert!(store.delete(recid).is_err());
    }

    #[test]
    fn heap_recids_not_reused_after_delete() {
        let store = HeapStore::new();
        let first = store.put(b"first").unwrap();
        store.delete(first).unwrap();
        let second = store.put(b"second").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn heap_update_deleted_fails() {
        let store = HeapStore::new();
        let recid = store.put(b"gone").unwrap();
        store.delete(recid).unwrap();
        assert!(matches!(
            store.update(recid, b"zombie"),
            Err(StoreError::RecidDeleted { .. })
        ));
    }

    #[test]
    fn heap_cas_succeeds_on_match() {
        let store = HeapStore::new();
        let recid = store.put(b"expected").unwrap();
        let swapped = store.compare_and_swap(recid, b"expected", b"next").unwrap();
        assert!(swapped);
        assert_eq!(store.get(recid).unwrap(), b"next");
    }

    #[test]
    fn heap_cas_fails_on_mismatch() {
        let store = HeapStore::new();
        let recid = store.put(b"actual").unwrap();
        let swapped = store.compare_and_swap(recid, b"expected", b"next").unwrap();
        assert!(!swapped);
        assert_eq!(store.get(recid).unwrap(), b"actual");
    }

    #[test]
    fn heap_all_recids_lists_live_only() {
        let store = HeapStore::new();
        let a = store.put(b"a").unwrap();
        let b = store.put(b"b").unwrap();
        let c = store.put(b"c").unwrap();
        store.delete(b).unwrap();

        let mut live = store.all_recids().unwrap();
        live.sort();
        assert_eq!(live, vec![a, c]);
    }

    #[test]
    fn heap_storage_size_tracks_live_bytes() {
        let store = HeapStore::new();
        let a = store.put(&[0u8; 10]).unwrap();
        store.put(&[0u8; 5]).unwrap();
        assert_eq!(store.storage_size().unwrap(), 15);

        store.delete(a).unwrap();
        assert_eq!(store.storage_size().unwrap(), 5);
    }

    #[test]
    fn heap_empty_record_roundtrip() {
        let store = HeapStore::new();
        let recid = store.put(b"").unwrap();
        assert_eq!(store.get(recid).unwrap(), Vec::<u8>::new());
        assert_eq!(store.storage_size().unwrap(), 0);
        assert_eq!(store.record_count(), 1);
    }

    proptest! {
        #[test]
        fn heap_roundtrips_arbitrary_records(records in prop::collection::vec(
            prop::collection::vec(any::<u8>(), 0..256),
            1..32,
        )) {
            let store = HeapStore::new();
            let recids: Vec<_> = records
                .iter()
                .map(|data| store.put(data).unwrap())
                .collect();

            for (recid, data) in recids.iter().zip(&records) {
                prop_assert_eq!(&store.get(*recid).unwrap(), data);
            }
            prop_assert_eq!(store.record_count(), records.len());
        }
    }
}
