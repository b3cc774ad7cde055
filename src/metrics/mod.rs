//! Metrics sink abstraction updated from the cache hot paths.
//!
//! The core only knows the small [`MetricsSink`] trait; backends are
//! external. Two implementations ship with the crate:
//!
//! - [`NoopMetrics`]: the default; every call compiles to nothing so an
//!   uninstrumented cache pays nothing on the hot path.
//! - [`AtomicMetrics`]: per-shard relaxed atomic counters, suitable as a
//!   process-local backend or as the feed for an exporter.
//!
//! All sink methods take the shard index so backends can label series per
//! shard and aggregate on their side; every method must be safe for
//! concurrent invocation.
//!
//! ```text
//! │ Signal            │ Kind    │ Label │
//! ├───────────────────┼─────────┼───────┤
//! │ hits              │ counter │ shard │
//! │ misses            │ counter │ shard │
//! │ evictions         │ counter │ shard │
//! │ rotations         │ counter │ shard │
//! │ arena_bytes       │ gauge   │ shard │
//! ```

pub mod snapshot;

pub use snapshot::CacheStatsSnapshot;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter and gauge surface the core updates from its hot paths.
///
/// Implementations must be `Send + Sync`; methods are called with shard
/// locks released and must not block.
pub trait MetricsSink: Send + Sync {
    fn inc_hit(&self, shard: u8);
    fn inc_miss(&self, shard: u8);
    fn inc_evict(&self, shard: u8);
    fn inc_rotation(&self, shard: u8);
    fn add_arena_bytes(&self, shard: u8, delta: i64);
    fn set_arena_bytes(&self, shard: u8, value: i64);
}

/// Default sink: drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    #[inline]
    fn inc_hit(&self, _shard: u8) {}
    #[inline]
    fn inc_miss(&self, _shard: u8) {}
    #[inline]
    fn inc_evict(&self, _shard: u8) {}
    #[inline]
    fn inc_rotation(&self, _shard: u8) {}
    #[inline]
    fn add_arena_bytes(&self, _shard: u8, _delta: i64) {}
    #[inline]
    fn set_arena_bytes(&self, _shard: u8, _value: i64) {}
}

/// Per-shard counter cells. Relaxed ordering: metrics are observational
/// and never feed back into cache decisions.
#[derive(Debug, Default)]
struct ShardCells {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    rotations: AtomicU64,
    arena_bytes: AtomicI64,
}

/// Process-local sink backed by per-shard atomics.
///
/// # Example
///
/// ```
/// use genarena::metrics::{AtomicMetrics, MetricsSink};
///
/// let sink = AtomicMetrics::new(4);
/// sink.inc_hit(0);
/// sink.inc_miss(3);
/// sink.set_arena_bytes(1, 4096);
///
/// assert_eq!(sink.hits(), 1);
/// assert_eq!(sink.misses(), 1);
/// assert_eq!(sink.arena_bytes(), 4096);
/// ```
#[derive(Debug)]
pub struct AtomicMetrics {
    shards: Vec<ShardCells>,
}

impl AtomicMetrics {
    /// Creates a sink with `shard_count` independent cell sets.
    pub fn new(shard_count: usize) -> Self {
        let mut shards = Vec::with_capacity(shard_count.max(1));
        shards.resize_with(shard_count.max(1), ShardCells::default);
        Self { shards }
    }

    #[inline]
    fn cells(&self, shard: u8) -> &ShardCells {
        // Out-of-range shard indexes fold onto the last cell set rather
        // than panicking from a metrics call.
        let idx = (shard as usize).min(self.shards.len() - 1);
        &self.shards[idx]
    }

    /// Total hits across shards.
    pub fn hits(&self) -> u64 {
        self.shards.iter().map(|c| c.hits.load(Ordering::Relaxed)).sum()
    }

    /// Total misses across shards.
    pub fn misses(&self) -> u64 {
        self.shards.iter().map(|c| c.misses.load(Ordering::Relaxed)).sum()
    }

    /// Total evictions across shards.
    pub fn evictions(&self) -> u64 {
        self.shards
            .iter()
            .map(|c| c.evictions.load(Ordering::Relaxed))
            .sum()
    }

    /// Total rotations across shards.
    pub fn rotations(&self) -> u64 {
        self.shards
            .iter()
            .map(|c| c.rotations.load(Ordering::Relaxed))
            .sum()
    }

    /// Live arena bytes summed across shards.
    pub fn arena_bytes(&self) -> i64 {
        self.shards
            .iter()
            .map(|c| c.arena_bytes.load(Ordering::Relaxed))
            .sum()
    }
}

impl MetricsSink for AtomicMetrics {
    #[inline]
    fn inc_hit(&self, shard: u8) {
        self.cells(shard).hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn inc_miss(&self, shard: u8) {
        self.cells(shard).misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn inc_evict(&self, shard: u8) {
        self.cells(shard).evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn inc_rotation(&self, shard: u8) {
        self.cells(shard).rotations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn add_arena_bytes(&self, shard: u8, delta: i64) {
        self.cells(shard)
            .arena_bytes
            .fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    fn set_arena_bytes(&self, shard: u8, value: i64) {
        self.cells(shard).arena_bytes.store(value, Ordering::Relaxed);
    }
}
