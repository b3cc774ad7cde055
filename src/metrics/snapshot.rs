//! Wire-visible stats snapshot.
//!
//! The only serialized surface of the core: external tooling (inspectors,
//! exporters) consumes this JSON document. Field names are the contract;
//! schema versioning is the consumer's concern.

use serde::Serialize;

/// Point-in-time aggregate of cache counters and gauges.
///
/// Produced by [`Cache::stats`](crate::cache::Cache::stats). Counters are
/// cumulative since construction; gauges reflect the moment of the
/// snapshot. Values are read per shard without stopping the world, so a
/// snapshot taken under write load is approximate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Live entries across shards (short-lived ghosts included).
    pub items: usize,
    /// Bytes attributed to resident arena allocations.
    pub arena_bytes: i64,
    /// Cumulative lookup hits.
    pub hits_total: u64,
    /// Cumulative lookup misses.
    pub misses_total: u64,
    /// Cumulative evictions (capacity sweeps and explicit deletes).
    pub evictions_total: u64,
    /// Cumulative generation rotations.
    pub rotations_total: u64,
}
