//! Modification listeners.
//!
//! Listeners observe every entry-level change: inserts, updates,
//! removals, [`clear`](crate::HashTrieMap::clear), and evictions. They
//! run inside the write lock of the segment that changed, so a slow
//! listener stalls writers for that segment. Keep callbacks short and
//! never call back into the map from one.

/// Callback invoked after an entry changes, while the segment write
/// lock is still held.
///
/// The four argument shapes are:
///
/// * insert: `old_value` is `None`, `new_value` is `Some`
/// * update: both are `Some`
/// * remove: `old_value` is `Some`, `new_value` is `None`
/// * eviction: like remove, with `expired` set to `true`
///
/// No-op operations (a `get`, a failed conditional write, removing an
/// absent key) do not notify.
pub trait ModificationListener<K, V>: Send + Sync {
    /// Called once per modified entry.
    fn modify(&self, key: &K, old_value: Option<&V>, new_value: Option<&V>, expired: bool);
}

impl<K, V, F> ModificationListener<K, V> for F
where
    F: Fn(&K, Option<&V>, Option<&V>, bool) + Send + Sync,
{
    fn modify(&self, key: &K, old_value: Option<&V>, new_value: Option<&V>, expired: bool) {
        self(key, old_value, new_value, expired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn closures_implement_the_trait() {
        let seen: Arc<Mutex<Vec<(u32, Option<u32>, Option<u32>, bool)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn ModificationListener<u32, u32>> =
            Arc::new(move |key: &u32, old: Option<&u32>, new: Option<&u32>, expired: bool| {
                sink.lock().push((*key, old.copied(), new.copied(), expired));
            });

        listener.modify(&7, None, Some(&1), false);
        listener.modify(&7, Some(&1), None, true);

        let events = seen.lock();
        assert_eq!(
            events.as_slice(),
            &[(7, None, Some(1), false), (7, Some(1), None, true)]
        );
    }
}
