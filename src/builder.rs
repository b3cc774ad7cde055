//! Validated cache builder with functional options.
//!
//! [`CacheBuilder`] bundles every knob that influences cache behaviour;
//! all of it is immutable once the cache is constructed. Defaults:
//! size-of-based weighting, no eject callback, no-op metrics. Validation
//! happens in [`CacheBuilder::try_build`] and fails fast with a
//! [`CacheError`](crate::error::CacheError) before any state is built.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use genarena::builder::CacheBuilder;
//!
//! let cache = CacheBuilder::new(1 << 20, Duration::from_secs(60), 4)
//!     .weight_fn(|value: &String| value.len() as u32)
//!     .eject_callback(|key: String, _value, reason| {
//!         eprintln!("evicted {key}: {reason:?}");
//!     })
//!     .try_build()
//!     .unwrap();
//!
//! cache.put("greeting".to_string(), "hello".to_string(), 5).unwrap();
//! # cache.close();
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::ds::gen_ring::GENERATIONS;
use crate::error::CacheError;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::policy::clock_pro::EjectReason;

/// Computes an abstract cost for a value. The number is *relative*
/// (bytes, points, whatever fits the application); results below 1 are
/// clamped to 1 so eviction always makes progress. Runs on the
/// `get_or_load` store path, so it should be cheap and deterministic.
pub type WeightFn<V> = Arc<dyn Fn(&V) -> u32 + Send + Sync>;

/// Invoked when an item's value is ejected: displaced by CLOCK-Pro
/// (`Capacity`) or reclaimed with its generation (`Generation`). Entries
/// that were already ghosts when their generation expired do not fire.
///
/// Runs outside any shard lock but on the mutating thread; it must not
/// block and must not re-enter the cache.
pub type EjectCallback<K, V> = Arc<dyn Fn(K, V, EjectReason) + Send + Sync>;

/// Default weight: in-memory footprint of `V`, at least 1.
pub(crate) fn default_weight_fn<V>() -> WeightFn<V> {
    Arc::new(|_: &V| (std::mem::size_of::<V>() as u32).max(1))
}

/// Configures and constructs a [`Cache`].
pub struct CacheBuilder<K, V> {
    cap_bytes: i64,
    ttl: Duration,
    shards: u8,
    weight_fn: WeightFn<V>,
    eject_cb: Option<EjectCallback<K, V>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts a builder for a cache with `cap_bytes` total budget, a TTL
    /// window of `ttl`, and `shards` partitions (must be a power of two).
    pub fn new(cap_bytes: i64, ttl: Duration, shards: u8) -> Self {
        Self {
            cap_bytes,
            ttl,
            shards,
            weight_fn: default_weight_fn(),
            eject_cb: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Overrides the default size-of-based weight calculation.
    pub fn weight_fn(mut self, f: impl Fn(&V) -> u32 + Send + Sync + 'static) -> Self {
        self.weight_fn = Arc::new(f);
        self
    }

    /// Registers a callback fired on capacity- and generation-driven
    /// value ejections. Heavy work belongs on another thread; the
    /// callback runs inline on the mutating path.
    pub fn eject_callback(mut self, f: impl Fn(K, V, EjectReason) + Send + Sync + 'static) -> Self {
        self.eject_cb = Some(Arc::new(f));
        self
    }

    /// Attaches an external metrics sink (default: no-op).
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Validates the configuration and constructs the cache, spawning its
    /// rotation scheduler.
    pub fn try_build(self) -> Result<Cache<K, V>, CacheError> {
        if self.cap_bytes <= 0 {
            return Err(CacheError::InvalidCapacity);
        }
        if self.ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }
        if self.shards == 0 || !self.shards.is_power_of_two() {
            return Err(CacheError::InvalidShardCount);
        }

        let rotation_step = (self.ttl / GENERATIONS as u32).max(Duration::from_millis(1));
        Cache::from_parts(
            self.cap_bytes,
            self.shards,
            rotation_step,
            self.weight_fn,
            self.eject_cb,
            self.metrics,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_capacity() {
        let err = CacheBuilder::<u64, u64>::new(0, Duration::from_secs(1), 1)
            .try_build()
            .unwrap_err();
        assert_eq!(err, CacheError::InvalidCapacity);

        let err = CacheBuilder::<u64, u64>::new(-5, Duration::from_secs(1), 1)
            .try_build()
            .unwrap_err();
        assert_eq!(err, CacheError::InvalidCapacity);
    }

    #[test]
    fn rejects_zero_ttl() {
        let err = CacheBuilder::<u64, u64>::new(1024, Duration::ZERO, 1)
            .try_build()
            .unwrap_err();
        assert_eq!(err, CacheError::InvalidTtl);
    }

    #[test]
    fn rejects_invalid_shard_counts() {
        for shards in [0u8, 3, 6, 12, 100] {
            let err = CacheBuilder::<u64, u64>::new(1024, Duration::from_secs(1), shards)
                .try_build()
                .unwrap_err();
            assert_eq!(err, CacheError::InvalidShardCount, "shards = {shards}");
        }
    }

    #[test]
    fn accepts_power_of_two_shards() {
        for shards in [1u8, 2, 4, 8, 16, 64, 128] {
            let cache = CacheBuilder::<u64, u64>::new(1 << 20, Duration::from_secs(1), shards)
                .try_build()
                .unwrap();
            assert_eq!(cache.shard_count(), shards as usize);
            cache.close();
        }
    }

    #[test]
    fn default_weight_is_at_least_one() {
        let weight = default_weight_fn::<()>();
        assert_eq!(weight(&()), 1);

        let weight = default_weight_fn::<u64>();
        assert_eq!(weight(&7), 8);
    }

    #[test]
    fn custom_weight_fn_is_used_by_get_or_load() {
        use crate::loader::CancelToken;

        let cache = CacheBuilder::<&'static str, String>::new(1 << 20, Duration::from_secs(60), 1)
            .weight_fn(|value: &String| value.len() as u32)
            .try_build()
            .unwrap();

        let value = cache
            .get_or_load(&CancelToken::none(), "k", |_, _| Ok("four".to_string()))
            .unwrap();
        assert_eq!(value, "four");
        assert_eq!(cache.size_bytes(), 4);
        cache.close();
    }
}
