//! genarena: an in-process key/value cache that keeps values in
//! bulk-freeable arena generations, with CLOCK-Pro replacement per shard
//! and single-flight loading.
//!
//! Values live outside the long-lived object graph, in per-shard arenas
//! organized as a time-windowed generational ring: TTL expiration is a
//! single arena drop, capacity eviction is an amortized-constant CLOCK-Pro
//! sweep, and the hot read path performs no allocation.
//!
//! ```text
//!   read:  key ─► shard index ─► entry ─► arena value ─► set R bit ─► copy
//!   write: alloc in active generation ─► upsert entry ─► sweep / rotate
//!   miss:  fingerprint ─► single-flight loader ─► store ─► share result
//! ```
//!
//! See [`cache::Cache`] for the public surface and [`builder::CacheBuilder`]
//! for configuration.

pub mod builder;
pub mod cache;
pub mod ds;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod policy;
pub mod prelude;

mod shard;
