//! Core data structures underpinning the cache engine.
//!
//! - [`arena`]: bump-allocating region with stable handles and O(1) bulk
//!   free.
//! - [`gen_ring`]: circular buffer of time-windowed arenas ("generations").
//!
//! These types carry no locking of their own; the owning shard serializes
//! access.

pub mod arena;
pub mod gen_ring;

pub use arena::{Arena, ByteRef, ValueRef};
pub use gen_ring::{Generation, GenerationRing, GENERATIONS, GEN_NONE};
