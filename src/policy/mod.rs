//! Replacement policy engines.
//!
//! One engine lives here: [`clock_pro`], the weight-aware CLOCK-Pro variant
//! driving per-shard eviction. It operates on compact metadata only; keys
//! and values stay generic at the cache facade.

pub mod clock_pro;

pub use clock_pro::{ClockPro, EjectReason, NodeId, SweepEvent};
