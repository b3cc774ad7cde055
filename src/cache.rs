//! Sharded cache facade and lifecycle management.
//!
//! [`Cache`] fans requests out to independently locked shards, aggregates
//! stats, and owns the background rotation scheduler that turns the
//! generation ring into a TTL window.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                            Cache<K, V>                             │
//! │                                                                    │
//! │   selector: RandomState      shard = hash(key) & (N - 1)           │
//! │                                                                    │
//! │   ┌─────────┬─────────┬─────────┬─────────┐                        │
//! │   │ Shard 0 │ Shard 1 │ Shard 2 │ Shard 3 │   budget = cap / N     │
//! │   └─────────┴─────────┴─────────┴─────────┘                        │
//! │                                                                    │
//! │   rotation scheduler (one thread per cache)                        │
//! │     tick every ttl / GENERATIONS (>= 1 ms)                         │
//! │     └── walks shards round-robin, calls rotate()                   │
//! │     holds only a Weak handle: an abandoned cache winds itself down │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! Construction validates its parameters and spawns the scheduler.
//! [`Cache::close`] is idempotent: it stops and joins the scheduler first,
//! then drops every arena; afterwards all keyed operations fail with
//! [`CacheError::Closed`]. Cloning is cheap and shares the same cache.
//!
//! ## TTL and capacity
//!
//! Rotation is driven by two observably equivalent paths: the wall-clock
//! tick here, and the per-generation byte budget consulted inside `put`.
//! Either way an entry lives for at most a full ring revolution after its
//! last write.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;

use crate::builder::{CacheBuilder, EjectCallback, WeightFn};
use crate::error::{BoxError, CacheError};
use crate::loader::{CancelToken, LoadResult};
use crate::metrics::{CacheStatsSnapshot, MetricsSink};
use crate::shard::Shard;

struct Rotator {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

struct CacheInner<K, V> {
    shards: Vec<Shard<K, V>>,
    shard_mask: u64,
    selector: RandomState,
    weight_fn: WeightFn<V>,
    closed: AtomicBool,
    rotator: Mutex<Option<Rotator>>,
}

impl<K, V> Drop for CacheInner<K, V> {
    fn drop(&mut self) {
        // Disconnect the scheduler without joining: drop may run on the
        // scheduler's own thread if it held the last strong handle.
        if let Some(rotator) = self.rotator.get_mut().take() {
            drop(rotator.shutdown);
        }
    }
}

/// Sharded, arena-backed key/value cache with CLOCK-Pro replacement.
///
/// Cheap to clone; clones share the same cache. See the crate root for
/// the full data-flow description.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use genarena::cache::Cache;
///
/// let cache = Cache::new(1 << 20, Duration::from_secs(60), 1).unwrap();
/// cache.put("a", 1u64, 1).unwrap();
/// assert_eq!(cache.get(&"a").unwrap(), Some(1));
/// assert_eq!(cache.len(), 1);
/// cache.close();
/// ```
pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache with default options. See [`CacheBuilder`] for
    /// weight functions, eject callbacks, and metrics sinks.
    pub fn new(cap_bytes: i64, ttl: Duration, shards: u8) -> Result<Self, CacheError> {
        CacheBuilder::new(cap_bytes, ttl, shards).try_build()
    }

    /// Assembles the cache from validated parts and spawns the rotation
    /// scheduler. Called by [`CacheBuilder::try_build`].
    pub(crate) fn from_parts(
        cap_bytes: i64,
        shards: u8,
        rotation_step: Duration,
        weight_fn: WeightFn<V>,
        eject_cb: Option<EjectCallback<K, V>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, CacheError> {
        let shard_budget = (cap_bytes / i64::from(shards)).max(1);
        let shard_vec: Vec<Shard<K, V>> = (0..shards)
            .map(|idx| {
                Shard::new(
                    idx,
                    shard_budget,
                    eject_cb.clone(),
                    Arc::clone(&metrics),
                )
            })
            .collect();

        let inner = Arc::new(CacheInner {
            shards: shard_vec,
            shard_mask: u64::from(shards) - 1,
            selector: RandomState::new(),
            weight_fn,
            closed: AtomicBool::new(false),
            rotator: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("genarena-rotation".into())
            .spawn(move || {
                let ticker = tick(rotation_step);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let Some(inner) = weak.upgrade() else { break };
                            if inner.closed.load(Ordering::Acquire) {
                                break;
                            }
                            for shard in &inner.shards {
                                shard.rotate();
                            }
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn rotation scheduler");

        *inner.rotator.lock() = Some(Rotator {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(Self { inner })
    }

    #[inline]
    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    #[inline]
    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let idx = self.inner.selector.hash_one(key) & self.inner.shard_mask;
        &self.inner.shards[idx as usize]
    }

    /// Inserts or overwrites `key` with the given abstract `weight`
    /// (clamped to >= 1). The value lands in the owning shard's active
    /// generation.
    pub fn put(&self, key: K, value: V, weight: u32) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.shard_for(&key).put(key, value, weight);
        Ok(())
    }

    /// Looks up `key`, returning a copy of the cached value and marking
    /// the entry referenced.
    pub fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.ensure_open()?;
        Ok(self.shard_for(key).get(key))
    }

    /// Removes `key`. Arena memory is reclaimed on the next rotation of
    /// the owning generation. Returns `true` if an entry was removed.
    pub fn delete(&self, key: &K) -> Result<bool, CacheError> {
        self.ensure_open()?;
        Ok(self.shard_for(key).delete(key))
    }

    /// Returns the cached value for `key`, invoking `loader` on a miss
    /// with single-flight de-duplication: concurrent callers for the same
    /// key share one execution and receive the identical outcome.
    ///
    /// On success the loaded value is stored with the configured weight
    /// function. Loader errors are propagated and never cached. `token`
    /// governs waiting only; see [`crate::loader`].
    pub fn get_or_load<F>(&self, token: &CancelToken, key: K, loader: F) -> Result<V, CacheError>
    where
        F: FnOnce(&CancelToken, &K) -> Result<V, BoxError>,
    {
        self.get_or_load_inner(token, key, loader).0
    }

    fn get_or_load_inner<F>(
        &self,
        token: &CancelToken,
        key: K,
        loader: F,
    ) -> (Result<V, CacheError>, bool)
    where
        F: FnOnce(&CancelToken, &K) -> Result<V, BoxError>,
    {
        if let Err(err) = self.ensure_open() {
            return (Err(err), false);
        }
        let shard = self.shard_for(&key);
        if let Some(value) = shard.get(&key) {
            return (Ok(value), false);
        }

        let fingerprint = shard.fingerprint(&key);
        let (outcome, shared) = shard.loaders().load(token, fingerprint, &key, loader);
        match outcome {
            Ok(value) => {
                // The leader stores on behalf of the whole burst.
                if !shared && self.ensure_open().is_ok() {
                    let weight = (self.inner.weight_fn)(&value);
                    shard.put(key, value.clone(), weight);
                }
                (Ok(value), shared)
            },
            Err(err) => (Err(err), shared),
        }
    }

    /// Asynchronous [`Cache::get_or_load`]: returns a one-shot channel
    /// delivering a [`LoadResult`]. If `token` trips first, the channel
    /// delivers `Cancelled` while the shared execution continues for any
    /// concurrent waiters.
    pub fn get_or_load_async<F>(
        &self,
        token: CancelToken,
        key: K,
        loader: F,
    ) -> Receiver<LoadResult<V>>
    where
        F: FnOnce(&CancelToken, &K) -> Result<V, BoxError> + Send + 'static,
    {
        let (out_tx, out_rx) = bounded(1);
        let (exec_tx, exec_rx) = bounded::<LoadResult<V>>(1);

        let cache = self.clone();
        thread::spawn(move || {
            let exec_token = CancelToken::none();
            let (value, shared) = cache.get_or_load_inner(&exec_token, key, loader);
            let _ = exec_tx.send(LoadResult { value, shared });
        });

        thread::spawn(move || {
            select! {
                recv(exec_rx) -> res => {
                    if let Ok(res) = res {
                        let _ = out_tx.send(res);
                    }
                },
                recv(token.done()) -> _ => {
                    let _ = out_tx.send(LoadResult {
                        value: Err(CacheError::Cancelled),
                        shared: false,
                    });
                },
            }
        });

        out_rx
    }

    /// Approximate number of live entries across shards (short-lived
    /// ghosts included). Zero after close.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(Shard::len).sum()
    }

    /// Returns `true` if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident bytes across shards, as accounted by the replacement
    /// policy.
    pub fn size_bytes(&self) -> i64 {
        self.inner.shards.iter().map(Shard::size_bytes).sum()
    }

    /// Number of shards the key space is partitioned into.
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Returns `true` once [`Cache::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Aggregated counter/gauge snapshot; the wire-visible surface of the
    /// core.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let mut snap = CacheStatsSnapshot::default();
        for shard in &self.inner.shards {
            let (hits, misses, evictions, rotations) = shard.counters();
            snap.hits_total += hits;
            snap.misses_total += misses;
            snap.evictions_total += evictions;
            snap.rotations_total += rotations;
            snap.items += shard.len();
            snap.arena_bytes += shard.size_bytes();
        }
        snap
    }

    /// Stops the rotation scheduler, joins it, and drops every arena and
    /// all metadata. Idempotent; subsequent keyed operations fail with
    /// [`CacheError::Closed`].
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The scheduler must be parked before arenas drop so a concurrent
        // tick cannot resurrect a generation.
        if let Some(rotator) = self.inner.rotator.lock().take() {
            drop(rotator.shutdown);
            let _ = rotator.handle.join();
        }
        for shard in &self.inner.shards {
            shard.clear();
        }
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        for shard in &self.inner.shards {
            shard.debug_validate_invariants();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
