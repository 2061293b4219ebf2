//! Map configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Largest supported concurrency shift. `2^7 = 128` segments.
pub const MAX_CONC_SHIFT: u8 = 7;

/// Tuning knobs for a hash trie map.
///
/// Constructed with [`MapConfig::default`] and refined through the
/// builder methods:
///
/// ```
/// use hashtrie_core::MapConfig;
/// use std::time::Duration;
///
/// let config = MapConfig::default()
///     .conc_shift(2)
///     .expire_after_create(Duration::from_secs(60))
///     .expire_max_size(10_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Number of low hash bits used to pick a segment. The map holds
    /// `2^conc_shift` segments, each behind its own lock.
    pub conc_shift: u8,
    /// Leaf entry count that triggers a split into a directory node.
    pub leaf_split_threshold: usize,
    /// Entries expire this long after insertion. Never refreshed.
    pub expire_create_ttl: Option<Duration>,
    /// Entries expire this long after their last value update.
    pub expire_update_ttl: Option<Duration>,
    /// Entries expire this long after their last read or write.
    pub expire_access_ttl: Option<Duration>,
    /// Eviction drives the live entry count down to this bound.
    pub expire_max_size: Option<u64>,
    /// Eviction starts once the backing stores exceed this many bytes.
    pub expire_store_size: Option<u64>,
    /// Fraction of `expire_store_size` that store-size eviction shrinks
    /// down to. Must be in `(0, 1]`.
    pub store_size_trigger: f64,
    /// Interval between background eviction passes. When unset,
    /// eviction runs piggybacked on operations that touch the
    /// expiration queues and on explicit
    /// [`expire_evict`](crate::HashTrieMap::expire_evict) calls.
    pub eviction_interval: Option<Duration>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            conc_shift: 3,
            leaf_split_threshold: 8,
            expire_create_ttl: None,
            expire_update_ttl: None,
            expire_access_ttl: None,
            expire_max_size: None,
            expire_store_size: None,
            store_size_trigger: 0.75,
            eviction_interval: None,
        }
    }
}

impl MapConfig {
    /// Sets the concurrency shift. Valid values are `0..=MAX_CONC_SHIFT`.
    #[must_use]
    pub const fn conc_shift(mut self, shift: u8) -> Self {
        self.conc_shift = shift;
        self
    }

    /// Sets the leaf split threshold. Must be at least 1.
    #[must_use]
    pub const fn leaf_split_threshold(mut self, threshold: usize) -> Self {
        self.leaf_split_threshold = threshold;
        self
    }

    /// Expires entries a fixed duration after insertion.
    #[must_use]
    pub const fn expire_after_create(mut self, ttl: Duration) -> Self {
        self.expire_create_ttl = Some(ttl);
        self
    }

    /// Expires entries a fixed duration after their last update.
    #[must_use]
    pub const fn expire_after_update(mut self, ttl: Duration) -> Self {
        self.expire_update_ttl = Some(ttl);
        self
    }

    /// Expires entries a fixed duration after their last access.
    #[must_use]
    pub const fn expire_after_access(mut self, ttl: Duration) -> Self {
        self.expire_access_ttl = Some(ttl);
        self
    }

    /// Evicts oldest entries once the map grows past `bound` entries.
    #[must_use]
    pub const fn expire_max_size(mut self, bound: u64) -> Self {
        self.expire_max_size = Some(bound);
        self
    }

    /// Evicts oldest entries once the backing stores grow past `bytes`.
    #[must_use]
    pub const fn expire_store_size(mut self, bytes: u64) -> Self {
        self.expire_store_size = Some(bytes);
        self
    }

    /// Sets the store-size eviction target as a fraction of
    /// [`expire_store_size`](Self::expire_store_size).
    #[must_use]
    pub const fn store_size_trigger(mut self, fraction: f64) -> Self {
        self.store_size_trigger = fraction;
        self
    }

    /// Runs eviction on a background thread at the given interval.
    #[must_use]
    pub const fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = Some(interval);
        self
    }

    /// True when any expiration or size policy is configured.
    #[must_use]
    pub const fn expire_enabled(&self) -> bool {
        self.expire_create_ttl.is_some()
            || self.expire_update_ttl.is_some()
            || self.expire_access_ttl.is_some()
            || self.expire_max_size.is_some()
            || self.expire_store_size.is_some()
    }

    /// Rejects configurations the map cannot honor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] when `conc_shift` exceeds
    /// [`MAX_CONC_SHIFT`], when `leaf_split_threshold` is zero, when
    /// `store_size_trigger` falls outside `(0, 1]`, or when
    /// `eviction_interval` is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.conc_shift > MAX_CONC_SHIFT {
            return Err(CoreError::invalid_config(format!(
                "conc_shift {} exceeds maximum {MAX_CONC_SHIFT}",
                self.conc_shift
            )));
        }
        if self.leaf_split_threshold == 0 {
            return Err(CoreError::invalid_config(
                "leaf_split_threshold must be at least 1",
            ));
        }
        if !(self.store_size_trigger > 0.0 && self.store_size_trigger <= 1.0) {
            return Err(CoreError::invalid_config(format!(
                "store_size_trigger {} outside (0, 1]",
                self.store_size_trigger
            )));
        }
        if self.eviction_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(CoreError::invalid_config(
                "eviction_interval must be nonzero",
            ));
        }
        Ok(())
    }
}
