//! Generation ring: a circular buffer of time-windowed arenas.
//!
//! Each slot holds a *generation*: an [`Arena`](crate::ds::Arena) plus a
//! monotonic id, a creation timestamp, and a byte accumulator. One slot is
//! the active allocation target; rotation advances the active pointer,
//! hands the overwritten generation back to the caller, and installs a
//! fresh one. Dropping the returned generation is the bulk free that makes
//! TTL expiration O(1).
//!
//! ## Architecture
//!
//! ```text
//!   slots: [gen 5] [gen 6] [gen 7*] [gen 4]        (* = active)
//!
//!   rotate():
//!     next = (active + 1) % GENERATIONS
//!     dead = slots[next].take()          ──► returned to caller
//!     slots[next] = fresh generation (id 8)
//!     active = next
//!
//!   slots: [gen 5] [gen 6] [gen 7] [gen 8*]   caller owns gen 4
//! ```
//!
//! ## Rotation policy
//! - Capacity path: `check_rotation_needed(delta)` accumulates bytes into
//!   the active generation and reports when its share of the budget
//!   (`cap_bytes / GENERATIONS`, falling back to the whole budget for
//!   pathologically small caches) is exceeded.
//! - Wall-clock path: the owning cache ticks `rotate()` on a schedule of
//!   `ttl / GENERATIONS`. Both paths are observably equivalent.
//!
//! ## Id discipline
//! Generation ids are strictly increasing per ring, starting at 1. Id 0 is
//! reserved as "none" so entry metadata can use it as a null generation.
//!
//! Not internally synchronized; the owning shard serializes access.

use std::time::Instant;

use crate::ds::arena::{Arena, ValueRef};

/// Number of generations a ring keeps resident.
///
/// The cache's invariants hold for any value >= 2; four balances TTL
/// granularity against per-rotation reconciliation work.
pub const GENERATIONS: usize = 4;

/// Reserved id meaning "no generation".
pub const GEN_NONE: u32 = 0;

/// An arena bound to an identity and a creation time, occupying one ring
/// slot.
#[derive(Debug)]
pub struct Generation<V> {
    id: u32,
    arena: Arena<V>,
    created_at: Instant,
    accumulated_bytes: i64,
}

impl<V> Generation<V> {
    fn new(id: u32) -> Self {
        Self {
            id,
            arena: Arena::new(),
            created_at: Instant::now(),
            accumulated_bytes: 0,
        }
    }

    /// Stable identifier; never 0.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Allocation target for values owned by this generation.
    #[inline]
    pub fn arena(&self) -> &Arena<V> {
        &self.arena
    }

    /// Mutable allocation target; valid while the generation occupies a
    /// ring slot.
    #[inline]
    pub fn arena_mut(&mut self) -> &mut Arena<V> {
        &mut self.arena
    }

    /// When this generation became the allocation target.
    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Bytes attributed to this generation via the caller's weight
    /// heuristic.
    #[inline]
    pub fn accumulated_bytes(&self) -> i64 {
        self.accumulated_bytes
    }
}

/// Fixed-size ring of generations with one active allocation target.
#[derive(Debug)]
pub struct GenerationRing<V> {
    slots: Vec<Option<Generation<V>>>,
    active: usize,
    per_gen_bytes: i64,
    next_id: u32,
}

impl<V> GenerationRing<V> {
    /// Constructs a ring sized for `cap_bytes` (capacity *per shard*).
    ///
    /// The caller validates `cap_bytes > 0`.
    pub fn new(cap_bytes: i64) -> Self {
        debug_assert!(cap_bytes > 0, "ring capacity must be positive");
        let mut per_gen_bytes = cap_bytes / GENERATIONS as i64;
        if per_gen_bytes == 0 {
            // Tiny caches: single-generation capacity control.
            per_gen_bytes = cap_bytes;
        }
        let mut slots: Vec<Option<Generation<V>>> = Vec::with_capacity(GENERATIONS);
        slots.resize_with(GENERATIONS, || None);
        slots[0] = Some(Generation::new(1));
        Self {
            slots,
            active: 0,
            per_gen_bytes,
            next_id: 1,
        }
    }

    /// The generation currently used for new allocations.
    #[inline]
    pub fn active(&self) -> &Generation<V> {
        self.slots[self.active]
            .as_ref()
            .expect("active slot always occupied")
    }

    /// Mutable access to the active generation.
    #[inline]
    pub fn active_mut(&mut self) -> &mut Generation<V> {
        self.slots[self.active]
            .as_mut()
            .expect("active slot always occupied")
    }

    /// Adds `delta` bytes to the active generation's accumulator and
    /// reports whether its byte budget is exceeded. Called on every put.
    pub fn check_rotation_needed(&mut self, delta: i64) -> bool {
        let budget = self.per_gen_bytes;
        let gen = self.active_mut();
        gen.accumulated_bytes += delta;
        gen.accumulated_bytes > budget
    }

    /// Advances the ring: the slot after the active one becomes the new
    /// active target with a fresh generation, and whatever occupied it is
    /// returned so the caller can reconcile metadata before dropping it
    /// (the drop is the bulk free).
    ///
    /// Returns `None` while the ring is still warming up (overwritten slot
    /// was empty).
    pub fn rotate(&mut self) -> Option<Generation<V>> {
        let next = (self.active + 1) % self.slots.len();
        let dead = self.slots[next].take();
        self.next_id += 1;
        self.slots[next] = Some(Generation::new(self.next_id));
        self.active = next;
        dead
    }

    /// Resolves a value handle against a resident generation.
    ///
    /// `None` when the generation has rotated out (or `gen_id` is the
    /// reserved null id).
    pub fn value(&self, gen_id: u32, r: ValueRef) -> Option<&V> {
        if gen_id == GEN_NONE {
            return None;
        }
        self.slots
            .iter()
            .flatten()
            .find(|gen| gen.id == gen_id)
            .and_then(|gen| gen.arena.get(r))
    }

    /// Returns `true` if `gen_id` is resident in the ring.
    pub fn contains(&self, gen_id: u32) -> bool {
        gen_id != GEN_NONE && self.slots.iter().flatten().any(|gen| gen.id == gen_id)
    }

    /// Ids of every resident generation.
    pub fn live_ids(&self) -> Vec<u32> {
        self.slots.iter().flatten().map(|gen| gen.id).collect()
    }

    /// Sum of accumulated bytes across resident generations. Cheap enough
    /// for sporadic calls.
    pub fn live_bytes(&self) -> i64 {
        self.slots
            .iter()
            .flatten()
            .map(|gen| gen.accumulated_bytes)
            .sum()
    }

    /// Drops every resident generation. Used on close.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        if self.slots.iter().all(Option::is_none) {
            return; // cleared ring
        }
        assert!(self.slots[self.active].is_some());
        let mut ids: Vec<u32> = self.live_ids();
        ids.sort_unstable();
        for window in ids.windows(2) {
            assert!(window[0] < window[1], "generation ids must be unique");
        }
        for id in ids {
            assert_ne!(id, GEN_NONE);
            assert!(id <= self.next_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_generation_has_id_one() {
        let ring: GenerationRing<u64> = GenerationRing::new(1024);
        assert_eq!(ring.active().id(), 1);
        assert!(ring.contains(1));
        assert!(!ring.contains(GEN_NONE));
    }

    #[test]
    fn rotate_returns_dead_generation_after_full_revolution() {
        let mut ring: GenerationRing<u64> = GenerationRing::new(1024);
        // Warm-up rotations hit empty slots.
        assert!(ring.rotate().is_none());
        assert!(ring.rotate().is_none());
        assert!(ring.rotate().is_none());
        // Fourth rotation overwrites the slot holding generation 1.
        let dead = ring.rotate().expect("generation 1 rotated out");
        assert_eq!(dead.id(), 1);
        assert!(!ring.contains(1));
    }

    #[test]
    fn ids_are_strictly_monotonic() {
        let mut ring: GenerationRing<u64> = GenerationRing::new(1024);
        let mut last = ring.active().id();
        for _ in 0..20 {
            ring.rotate();
            let id = ring.active().id();
            assert!(id > last);
            last = id;
        }
        ring.debug_validate_invariants();
    }

    #[test]
    fn value_resolves_only_while_generation_is_resident() {
        let mut ring: GenerationRing<&str> = GenerationRing::new(1024);
        let gen_id = ring.active().id();
        let r = ring.active_mut().arena_mut().alloc_value("v");
        assert_eq!(ring.value(gen_id, r), Some(&"v"));

        // Still resolvable while resident but no longer active.
        ring.rotate();
        assert_eq!(ring.value(gen_id, r), Some(&"v"));

        // Gone after the ring advances past it.
        for _ in 0..GENERATIONS {
            ring.rotate();
        }
        assert_eq!(ring.value(gen_id, r), None);
    }

    #[test]
    fn check_rotation_needed_respects_per_generation_budget() {
        let mut ring: GenerationRing<u64> = GenerationRing::new(400);
        // Budget is 400 / 4 = 100 per generation.
        assert!(!ring.check_rotation_needed(60));
        assert!(!ring.check_rotation_needed(40));
        assert!(ring.check_rotation_needed(1));
        assert_eq!(ring.live_bytes(), 101);
    }

    #[test]
    fn tiny_capacity_falls_back_to_whole_budget() {
        let mut ring: GenerationRing<u64> = GenerationRing::new(3);
        assert!(!ring.check_rotation_needed(3));
        assert!(ring.check_rotation_needed(1));
    }

    #[test]
    fn clear_drops_all_generations() {
        let mut ring: GenerationRing<u64> = GenerationRing::new(1024);
        ring.rotate();
        ring.clear();
        assert!(ring.live_ids().is_empty());
        assert_eq!(ring.live_bytes(), 0);
    }
}
