//! Bump arena with stable `ValueRef` handles and O(1) bulk free.
//!
//! Stores values in fixed-size chunks that are never reallocated once
//! created, so handles stay valid for the lifetime of the arena. There is no
//! per-slot free: the entire region is released at once when the arena is
//! dropped (or `clear()`ed), which is what makes time-windowed expiration
//! cheap for the generation ring built on top.
//!
//! ## Architecture
//!
//! ```text
//!   chunks: Vec<Vec<V>>          each chunk holds up to CHUNK_VALUES slots
//!
//!   chunk 0: [v0] [v1] ... [v1023]     (full, never touched again)
//!   chunk 1: [v1024] [v1025] [ ...     (tail chunk, append-only)
//!
//!   ValueRef(1025) ──► chunk 1, offset 1
//!
//!   byte_chunks: Vec<Vec<u8>>    raw blocks, same append-only discipline
//!   ByteRef { chunk, offset, len } ──► &byte_chunks[chunk][offset..offset+len]
//! ```
//!
//! ## Operations
//! - `alloc_value(value)`: append into the tail chunk, return a `ValueRef`
//! - `alloc_bytes(buf)`: copy a raw block, return a `ByteRef`
//! - `get(ref)` / `bytes(ref)`: `None` if the handle is out of bounds
//! - `clear()`: drop every chunk at once; all handles become invalid
//!
//! ## Performance
//! - `alloc_value` / `alloc_bytes`: O(1) amortized, no reallocation of
//!   existing chunks
//! - `get` / `bytes`: O(1)
//! - `clear` / drop: O(chunks) bookkeeping, one bulk release
//!
//! ## Notes
//! - Not internally synchronized; the owning shard serializes access.
//! - Values receive no individual teardown at eviction time: they are
//!   dropped in bulk with their chunk. Types holding resources that need
//!   prompt release do not belong in an arena-backed cache.
//!
//! `debug_validate_invariants()` is available in debug/test builds.

/// Values per chunk. Chunks are pre-sized so pushing never reallocates.
const CHUNK_VALUES: usize = 1024;

/// Minimum byte-chunk size; oversized blocks get a dedicated chunk.
const CHUNK_BYTES: usize = 16 * 1024;

/// Stable handle to a value allocated in an [`Arena`].
///
/// Valid until the owning arena is cleared or dropped. The reserved
/// [`ValueRef::NONE`] never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef(u32);

impl ValueRef {
    /// Sentinel handle that never resolves to a value.
    pub const NONE: ValueRef = ValueRef(u32::MAX);

    /// Returns the underlying slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable handle to a raw block allocated in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRef {
    chunk: u32,
    offset: u32,
    len: u32,
}

impl ByteRef {
    /// Length of the referenced block in bytes.
    #[inline]
    pub fn len(self) -> usize {
        self.len as usize
    }

    /// Returns `true` if the referenced block is empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// Bump-allocating region with stable handles and bulk free.
#[derive(Debug)]
pub struct Arena<V> {
    chunks: Vec<Vec<V>>,
    byte_chunks: Vec<Vec<u8>>,
    len: usize,
}

impl<V> Arena<V> {
    /// Creates an empty region.
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            byte_chunks: Vec::new(),
            len: 0,
        }
    }

    /// Allocates `value` inside the region and returns its handle.
    ///
    /// The handle stays valid until [`Arena::clear`] or drop.
    ///
    /// # Example
    ///
    /// ```
    /// use genarena::ds::Arena;
    ///
    /// let mut arena = Arena::new();
    /// let r = arena.alloc_value(7u64);
    /// assert_eq!(arena.get(r), Some(&7));
    /// ```
    pub fn alloc_value(&mut self, value: V) -> ValueRef {
        let needs_chunk = self
            .chunks
            .last()
            .map(|chunk| chunk.len() == CHUNK_VALUES)
            .unwrap_or(true);
        if needs_chunk {
            self.chunks.push(Vec::with_capacity(CHUNK_VALUES));
        }
        let chunk_pos = self.chunks.len() - 1;
        let chunk = self.chunks.last_mut().expect("tail chunk present");
        chunk.push(value);
        let idx = chunk_pos * CHUNK_VALUES + (chunk.len() - 1);
        self.len += 1;
        ValueRef(idx as u32)
    }

    /// Copies `buf` into the region and returns a handle to the copy.
    pub fn alloc_bytes(&mut self, buf: &[u8]) -> ByteRef {
        let fits_tail = self
            .byte_chunks
            .last()
            .map(|chunk| chunk.capacity() - chunk.len() >= buf.len())
            .unwrap_or(false);
        if !fits_tail {
            self.byte_chunks
                .push(Vec::with_capacity(CHUNK_BYTES.max(buf.len())));
        }
        let chunk_idx = self.byte_chunks.len() - 1;
        let chunk = &mut self.byte_chunks[chunk_idx];
        let offset = chunk.len();
        chunk.extend_from_slice(buf);
        ByteRef {
            chunk: chunk_idx as u32,
            offset: offset as u32,
            len: buf.len() as u32,
        }
    }

    /// Returns a shared reference to the value at `r`, if present.
    #[inline]
    pub fn get(&self, r: ValueRef) -> Option<&V> {
        let idx = r.index();
        self.chunks
            .get(idx / CHUNK_VALUES)?
            .get(idx % CHUNK_VALUES)
    }

    /// Returns the raw block at `r`, if present.
    pub fn bytes(&self, r: ByteRef) -> Option<&[u8]> {
        let chunk = self.byte_chunks.get(r.chunk as usize)?;
        let start = r.offset as usize;
        chunk.get(start..start + r.len as usize)
    }

    /// Returns the number of values allocated.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no values have been allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Releases the entire region at once. All outstanding handles become
    /// invalid.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.byte_chunks.clear();
        self.len = 0;
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        let stored: usize = self.chunks.iter().map(|chunk| chunk.len()).sum();
        assert_eq!(self.len, stored);
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i + 1 < self.chunks.len() {
                assert_eq!(chunk.len(), CHUNK_VALUES);
            }
            assert!(chunk.len() <= CHUNK_VALUES);
        }
    }
}

impl<V> Default for Arena<V> {
    fn default() -> Self {
        Self::new()
    }
}
