//! Expiration bookkeeping and the background evictor.
//!
//! Each segment keeps three FIFO queues of stamps, one per TTL kind
//! (create, update, access). A stamp records the key, its hash, and the
//! instant the governing event happened; queue order is therefore
//! oldest-first. At most one stamp per key is live at a time, tracked
//! by a generation number in a side index. Re-stamping a key bumps its
//! generation and appends a fresh stamp; the superseded stamp stays in
//! its queue until it surfaces at the front or its queue grows past
//! twice the live-key count, at which point the queue is compacted in
//! place. Eviction candidates are peeked, not popped: a stamp leaves
//! its queue only once the caller confirms the removal, so a removal
//! that fails is found again by the next pass.

use crate::config::MapConfig;
use crate::map::MapInner;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Expiration settings distilled from [`MapConfig`], copied into every
/// segment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExpirePolicy {
    pub(crate) create_ttl: Option<Duration>,
    pub(crate) update_ttl: Option<Duration>,
    pub(crate) access_ttl: Option<Duration>,
    /// A size bound is set, so stamps must be maintained even when no
    /// TTL is configured.
    pub(crate) bounded: bool,
}

impl ExpirePolicy {
    pub(crate) fn from_config(config: &MapConfig) -> Self {
        Self {
            create_ttl: config.expire_create_ttl,
            update_ttl: config.expire_update_ttl,
            access_ttl: config.expire_access_ttl,
            bounded: config.expire_max_size.is_some() || config.expire_store_size.is_some(),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.create_ttl.is_some()
            || self.update_ttl.is_some()
            || self.access_ttl.is_some()
            || self.bounded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Create,
    Update,
    Access,
}

const QUEUE_KINDS: [QueueKind; 3] = [QueueKind::Create, QueueKind::Update, QueueKind::Access];

/// One queued expiration candidate. `key` is the serialized key, which
/// sidesteps `Clone` and `Hash` bounds on the key type.
#[derive(Debug)]
struct Stamp {
    hash: u32,
    key: Vec<u8>,
    generation: u64,
    stamped_at: Instant,
    deadline: Option<Instant>,
}

/// Which stamp currently governs a key.
#[derive(Debug, Clone, Copy)]
struct Governing {
    queue: QueueKind,
    generation: u64,
}

/// Per-segment expiration state, guarded by the segment write lock.
#[derive(Debug, Default)]
pub(crate) struct ExpireQueues {
    create: VecDeque<Stamp>,
    update: VecDeque<Stamp>,
    access: VecDeque<Stamp>,
    index: HashMap<Vec<u8>, Governing>,
    next_generation: u64,
}

impl ExpireQueues {
    /// Stamps a freshly inserted key. The stamp lands in the most
    /// specific active queue: create, else update, else access. With
    /// only size bounds configured it lands in the create queue with no
    /// deadline, preserving insertion order for size eviction.
    pub(crate) fn on_insert(&mut self, hash: u32, key: Vec<u8>, now: Instant, policy: &ExpirePolicy) {
        let (queue, ttl) = if policy.create_ttl.is_some() {
            (QueueKind::Create, policy.create_ttl)
        } else if policy.update_ttl.is_some() {
            (QueueKind::Update, policy.update_ttl)
        } else if policy.access_ttl.is_some() {
            (QueueKind::Access, policy.access_ttl)
        } else {
            (QueueKind::Create, None)
        };
        self.restamp(queue, hash, key, now, ttl);
    }

    /// Re-stamps a key whose value was overwritten. A create TTL is
    /// never refreshed, so this is a no-op unless an update or access
    /// TTL is active.
    pub(crate) fn on_update(&mut self, hash: u32, key: Vec<u8>, now: Instant, policy: &ExpirePolicy) {
        if policy.update_ttl.is_some() {
            self.restamp(QueueKind::Update, hash, key, now, policy.update_ttl);
        } else if policy.access_ttl.is_some() {
            self.restamp(QueueKind::Access, hash, key, now, policy.access_ttl);
        }
    }

    /// Re-stamps a key that was read. Only meaningful under an access
    /// TTL.
    pub(crate) fn on_access(&mut self, hash: u32, key: Vec<u8>, now: Instant, policy: &ExpirePolicy) {
        if policy.access_ttl.is_some() {
            self.restamp(QueueKind::Access, hash, key, now, policy.access_ttl);
        }
    }

    /// Drops the governing stamp for a removed key. Doubles as the
    /// removal confirmation for peeked eviction candidates.
    pub(crate) fn on_remove(&mut self, key: &[u8]) {
        self.index.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.create.clear();
        self.update.clear();
        self.access.clear();
        self.index.clear();
    }

    /// Number of keys with a live stamp.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.index.len()
    }

    fn restamp(&mut self, queue: QueueKind, hash: u32, key: Vec<u8>, now: Instant, ttl: Option<Duration>) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.index
            .insert(key.clone(), Governing { queue, generation });
        self.queue_mut(queue).push_back(Stamp {
            hash,
            key,
            generation,
            stamped_at: now,
            deadline: ttl.map(|ttl| now + ttl),
        });
        if self.queue(queue).len() > 2 * self.index.len() {
            self.compact(queue);
        }
    }

    /// Rewrites a queue keeping only governing stamps. Runs once the
    /// queue is more than half superseded, which keeps queue memory
    /// proportional to the live key count under restamp churn.
    fn compact(&mut self, kind: QueueKind) {
        let Self {
            create,
            update,
            access,
            index,
            ..
        } = self;
        let queue = match kind {
            QueueKind::Create => create,
            QueueKind::Update => update,
            QueueKind::Access => access,
        };
        queue.retain(|stamp| {
            index
                .get(&stamp.key)
                .is_some_and(|g| g.queue == kind && g.generation == stamp.generation)
        });
    }

    fn queue(&self, kind: QueueKind) -> &VecDeque<Stamp> {
        match kind {
            QueueKind::Create => &self.create,
            QueueKind::Update => &self.update,
            QueueKind::Access => &self.access,
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut VecDeque<Stamp> {
        match kind {
            QueueKind::Create => &mut self.create,
            QueueKind::Update => &mut self.update,
            QueueKind::Access => &mut self.access,
        }
    }

    fn prune_queue(index: &HashMap<Vec<u8>, Governing>, kind: QueueKind, queue: &mut VecDeque<Stamp>) {
        while let Some(front) = queue.front() {
            let governing = index
                .get(&front.key)
                .is_some_and(|g| g.queue == kind && g.generation == front.generation);
            if governing {
                break;
            }
            queue.pop_front();
        }
    }

    /// Drops superseded stamps from every queue front.
    fn prune_stale(&mut self) {
        Self::prune_queue(&self.index, QueueKind::Create, &mut self.create);
        Self::prune_queue(&self.index, QueueKind::Update, &mut self.update);
        Self::prune_queue(&self.index, QueueKind::Access, &mut self.access);
    }

    fn front_choice(&self, due_by: Option<Instant>) -> Option<QueueKind> {
        let mut best: Option<(QueueKind, Instant)> = None;
        for kind in QUEUE_KINDS {
            let Some(front) = self.queue(kind).front() else {
                continue;
            };
            if let Some(now) = due_by {
                let due = front.deadline.is_some_and(|deadline| deadline <= now);
                if !due {
                    continue;
                }
            }
            let older = best.is_none_or(|(_, at)| front.stamped_at < at);
            if older {
                best = Some((kind, front.stamped_at));
            }
        }
        best.map(|(kind, _)| kind)
    }

    fn front_candidate(&self, kind: QueueKind) -> Option<(u32, Vec<u8>)> {
        self.queue(kind)
            .front()
            .map(|stamp| (stamp.hash, stamp.key.clone()))
    }

    /// Oldest stamp whose deadline has passed, or `None` when nothing
    /// is due yet. The stamp stays queued until the caller confirms the
    /// entry's removal through [`Self::on_remove`], so a removal that
    /// fails leaves the entry tracked for the next pass.
    pub(crate) fn peek_due(&mut self, now: Instant) -> Option<(u32, Vec<u8>)> {
        self.prune_stale();
        let kind = self.front_choice(Some(now))?;
        self.front_candidate(kind)
    }

    /// Oldest stamp regardless of deadline, for size-driven eviction.
    /// Same confirmation contract as [`Self::peek_due`].
    pub(crate) fn peek_oldest(&mut self) -> Option<(u32, Vec<u8>)> {
        self.prune_stale();
        let kind = self.front_choice(None)?;
        self.front_candidate(kind)
    }
}

struct EvictorShared {
    shutdown: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the background eviction thread.
///
/// The thread holds only a [`Weak`](std::sync::Weak) reference to the
/// map internals, so a dropped map is never kept alive by its evictor.
pub(crate) struct Evictor {
    shared: Arc<EvictorShared>,
    handle: Option<JoinHandle<()>>,
}

impl Evictor {
    /// Spawns a thread that runs one eviction pass per `interval`.
    pub(crate) fn start<K, V>(inner: &Arc<MapInner<K, V>>, interval: Duration) -> Self
    where
        K: 'static,
        V: 'static,
    {
        let shared = Arc::new(EvictorShared {
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let weak = Arc::downgrade(inner);
        let handle = thread::spawn(move || {
            debug!(interval_ms = interval.as_millis() as u64, "evictor started");
            loop {
                {
                    let mut shutdown = thread_shared.shutdown.lock();
                    if *shutdown {
                        break;
                    }
                    let _ = thread_shared.wake.wait_for(&mut shutdown, interval);
                    if *shutdown {
                        break;
                    }
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(error) = inner.run_eviction_pass() {
                    warn!(%error, "background eviction pass failed");
                }
            }
            debug!("evictor stopped");
        });
        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Signals the thread to exit and waits for it.
    pub(crate) fn stop(&mut self) {
        *self.shared.shutdown.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Evictor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Evictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evictor")
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}
