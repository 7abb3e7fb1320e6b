//! The `RingBuffer` composes up to three [`ChunkRun`]s — *left*, *right*, *overflow* —
//! laid out over a single append-only chunk vector to emulate a circular live region with
//! wraparound and an escape valve (*overflow*) for when wraparound would be ambiguous.
//!
//! This is the heart of the allocator: the rest of the crate is bookkeeping around this
//! module's three primitives, `alloc`, `free_left`, and `free_right`.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use std::ptr::NonNull;

use crate::backing::Backing;
use crate::chunk::Chunk;
use crate::chunk_run::ChunkRun;
use crate::error::AllocError;

/// Maximum number of chunks the chunk vector may ever hold.
///
/// Each payload trailer stores its owning chunk's index in a single byte, so the chunk
/// vector cannot grow past 256 entries; we cap it well below that, since geometric growth
/// from any reasonable seed size reaches astronomical capacity long before 64 chunks.
#[cfg(not(feature = "test_only_small_constants"))]
pub const MAX_CHUNKS: usize = 64;

#[cfg(feature = "test_only_small_constants")]
pub const MAX_CHUNKS: usize = 4;

/// Size, in bytes, of the first chunk ever created, absent a larger request.
const INITIAL_SEED: usize = 4096;

/// A raw, trailer-free allocation handed back by the `RingBuffer`: a byte range inside one
/// of its chunks.
#[derive(Debug)]
pub struct RawAllocation {
    pub chunk_index: usize,
    pub ptr: NonNull<u8>,
    pub len: usize,
}

/// Composes three [`ChunkRun`]s over an append-only chunk vector to provide FIFO/LIFO
/// edge allocation with amortized O(1) growth.
pub struct RingBuffer<B: Backing> {
    chunks: Vec<Chunk>,
    left: Option<ChunkRun>,
    right: Option<ChunkRun>,
    overflow: Option<ChunkRun>,
    last_size: usize,
    backing: B,
}

impl<B: Backing> RingBuffer<B> {
    pub fn new(backing: B) -> Self {
        RingBuffer {
            chunks: Vec::new(),
            left: None,
            right: None,
            overflow: None,
            last_size: INITIAL_SEED,
            backing,
        }
    }

    /// Total number of live bytes across every chunk.
    pub fn count(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    /// Number of chunks created so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Absolute address of chunk `chunk_index`'s backing buffer, used by the facade to
    /// translate a payload pointer back into a chunk-relative offset.
    pub fn chunk_base_ptr(&self, chunk_index: usize) -> usize {
        self.chunks[chunk_index].as_ptr() as usize
    }

    /// Which of the three geometries the buffer is currently in; exposed for testing
    /// Testable Property 7.
    #[cfg(test)]
    fn geometry(&self) -> &'static str {
        match (self.left.is_some(), self.right.is_some(), self.overflow.is_some()) {
            (false, false, false) => "uninitialized",
            (true, false, false) => "linear",
            (true, true, false) => "wrapped",
            (true, false, true) => "overflowing",
            _ => "invalid",
        }
    }

    fn finish(&mut self, chunk_index: usize, range: std::ops::Range<usize>) -> RawAllocation {
        let ptr = unsafe {
            NonNull::new_unchecked(self.chunks[chunk_index].as_mut_ptr().add(range.start))
        };
        RawAllocation {
            chunk_index,
            ptr,
            len: range.end - range.start,
        }
    }

    /// Appends a freshly-sized chunk to the chunk vector and returns its index.
    fn grow_chunk(&mut self, n: usize) -> Result<usize, AllocError> {
        if self.chunks.len() >= MAX_CHUNKS {
            return Err(AllocError::ChunkVectorExhausted { max: MAX_CHUNKS });
        }

        let size = self
            .last_size
            .max(n)
            .checked_mul(2)
            .ok_or(AllocError::Backing { requested: n })?;

        let data = self.backing.alloc(size)?;
        self.last_size = size;
        self.chunks.push(Chunk::new(data));
        Ok(self.chunks.len() - 1)
    }

    /// Attempts to allocate `n` bytes, following the allocation policy in order:
    /// bootstrap, overflow (if present), left, then fall back to a fresh overflow chunk.
    #[ensures(ret.is_ok() -> ret.as_ref().unwrap().len == n,
              "a successful alloc returns exactly n bytes")]
    pub fn alloc(&mut self, n: usize) -> Result<RawAllocation, AllocError> {
        if self.chunks.is_empty() {
            let idx = self.grow_chunk(n)?;
            self.left = Some(ChunkRun::new(idx, 1));
        }

        if let Some(mut overflow) = self.overflow {
            if let Some((idx, range)) = overflow.alloc(&mut self.chunks, n) {
                return Ok(self.finish(idx, range));
            }

            let new_idx = self.grow_chunk(n)?;
            overflow.extend(new_idx);
            self.overflow = Some(overflow);
            let (idx, range) = self
                .overflow
                .unwrap()
                .alloc(&mut self.chunks, n)
                .expect("a chunk freshly grown to fit n must fit n");
            return Ok(self.finish(idx, range));
        }

        let mut left = self.left.expect("left always exists once bootstrapped");
        if let Some((idx, range)) = left.alloc(&mut self.chunks, n) {
            self.left = Some(left);
            return Ok(self.finish(idx, range));
        }

        // Left's tail is full. Whether or not `right` exists, we must not write into it
        // (it holds only data older than anything in left); start an overflow run
        // instead.
        let new_idx = self.grow_chunk(n)?;
        let mut overflow = ChunkRun::new(new_idx, 1);
        let (idx, range) = overflow
            .alloc(&mut self.chunks, n)
            .expect("a chunk freshly grown to fit n must fit n");
        self.overflow = Some(overflow);
        Ok(self.finish(idx, range))
    }

    /// Frees everything allocated no later than the allocation whose raw buffer starts at
    /// `chunk`'s offset `first_kept`. `chunk` must be the chunk index recorded in that
    /// allocation's trailer.
    #[requires(chunk < self.chunks.len(), "chunk must be a valid chunk index")]
    pub fn free_left(&mut self, chunk: usize, first_kept: usize) {
        if let Some(overflow) = self.overflow {
            if overflow.contains(chunk) {
                return self.free_left_in_overflow(overflow, chunk, first_kept);
            }
            return self.free_left_in_left_with_overflow(chunk, first_kept);
        }

        if let Some(right) = self.right {
            if right.contains(chunk) {
                return self.free_left_in_right(right, chunk, first_kept);
            }
            return self.free_left_in_left_with_right(right, chunk, first_kept);
        }

        self.free_left_in_left_only(chunk, first_kept);
    }

    /// Frees everything allocated no earlier than the allocation whose raw buffer ends at
    /// `chunk`'s offset `first_removed`. `chunk` must be the chunk index recorded in that
    /// allocation's trailer.
    #[requires(chunk < self.chunks.len(), "chunk must be a valid chunk index")]
    pub fn free_right(&mut self, chunk: usize, first_removed: usize) {
        if let Some(overflow) = self.overflow {
            if overflow.contains(chunk) {
                return self.free_right_in_overflow(overflow, chunk, first_removed);
            }
            return self.free_right_in_left(chunk, first_removed);
        }

        if let Some(right) = self.right {
            if right.contains(chunk) {
                return self.free_right_in_right(right, chunk, first_removed);
            }
        }

        self.free_right_in_left(chunk, first_removed);
    }

    // --- free_left cases -----------------------------------------------------------

    /// `chunk` belongs to `overflow`: left and right hold only older data and are wiped
    /// wholesale; if overflow survives the trim, it is promoted to `right` and `left`
    /// becomes an empty run ready to absorb new pushes.
    fn free_left_in_overflow(&mut self, mut overflow: ChunkRun, chunk: usize, first_kept: usize) {
        if let Some(left) = self.left.take() {
            for c in &mut self.chunks[left.head()..=left.tail()] {
                c.clear();
            }
        }
        if let Some(right) = self.right.take() {
            for c in &mut self.chunks[right.head()..=right.tail()] {
                c.clear();
            }
        }

        overflow.free_left(&mut self.chunks, chunk, first_kept);

        if overflow.is_empty(&self.chunks) {
            let n = self.chunks.len();
            self.left = Some(ChunkRun::new(0, n));
            self.right = None;
            self.overflow = None;
        } else {
            let head = overflow.head();
            self.left = Some(ChunkRun::new(0, head));
            self.right = Some(overflow);
            self.overflow = None;
        }
    }

    /// `chunk` belongs to `right`: the chunks `right` gives up sit directly above
    /// `left`'s current span, so they are folded straight into `left`.
    fn free_left_in_right(&mut self, mut right: ChunkRun, chunk: usize, first_kept: usize) {
        let left = self.left.take().expect("left always exists");
        right.free_left(&mut self.chunks, chunk, first_kept);

        if right.is_empty(&self.chunks) {
            let new_count = right.tail() - left.head() + 1;
            self.left = Some(ChunkRun::new(left.head(), new_count));
            self.right = None;
        } else {
            let new_count = right.head() - left.head();
            self.left = Some(ChunkRun::new(left.head(), new_count));
            self.right = Some(right);
        }
    }

    /// `chunk` belongs to `left` while `right` also exists: `right` predates everything
    /// in `left`, so the caller has implicitly freed it too. `left`'s vacated low chunks
    /// become the new `right`; the surviving live portion of `left`, plus `right`'s
    /// now-cleared span, become the new `left`.
    fn free_left_in_left_with_right(&mut self, right: ChunkRun, chunk: usize, first_kept: usize) {
        for c in &mut self.chunks[right.head()..=right.tail()] {
            c.clear();
        }

        let mut left = self.left.take().expect("left always exists");
        left.free_left(&mut self.chunks, chunk, first_kept);
        let new_head = left.head();

        if new_head == 0 {
            self.right = None;
            self.left = Some(left);
        } else {
            let vector_end = self.chunks.len();
            self.left = Some(ChunkRun::new(new_head, vector_end - new_head));
            self.right = Some(ChunkRun::new(0, new_head));
        }
    }

    /// `chunk` belongs to `left` and no `right` exists: the simple, non-wrapped case.
    fn free_left_in_left_only(&mut self, chunk: usize, first_kept: usize) {
        let mut left = self.left.take().expect("left always exists");
        left.free_left(&mut self.chunks, chunk, first_kept);
        let new_head = left.head();

        if new_head != 0 {
            self.right = Some(ChunkRun::new(0, new_head));
        }
        self.left = Some(left);
    }

    /// `chunk` belongs to `left` while `overflow` also exists. `overflow` holds strictly
    /// newer data and must not be disturbed; since `right` cannot coexist with
    /// `overflow`, the chunks `left` gives up cannot be handed to a new run without
    /// breaking that invariant, so they are simply left idle (still nominally part of
    /// `left`, already cleared) until `overflow` eventually drains. See DESIGN.md.
    fn free_left_in_left_with_overflow(&mut self, chunk: usize, first_kept: usize) {
        let left = self.left.take().expect("left always exists");
        let head = left.head();

        self.chunks[chunk].free_left(first_kept);
        for c in &mut self.chunks[head..chunk] {
            c.clear();
        }

        self.left = Some(left);
    }

    // --- free_right cases ----------------------------------------------------------

    /// `chunk` belongs to `overflow`. If the trim empties it, its whole span (always the
    /// chunk vector's trailing edge) is folded back into whichever run sits just below
    /// it, keeping those chunks available for future growth.
    fn free_right_in_overflow(&mut self, mut overflow: ChunkRun, chunk: usize, first_removed: usize) {
        let overflow_tail = overflow.tail();
        overflow.free_right(&mut self.chunks, chunk, first_removed);

        if overflow.is_empty(&self.chunks) {
            // `right` cannot coexist with `overflow` (topological invariant), so the
            // vacated overflow chunks always fold back into `left`.
            let left = self.left.take().expect("left always exists");
            self.left = Some(ChunkRun::new(left.head(), overflow_tail - left.head() + 1));
            self.overflow = None;
        } else {
            self.overflow = Some(overflow);
        }
    }

    /// `chunk` belongs to `right`: `right` holds the oldest half of the live region, so
    /// freeing anything at or after `chunk` also discards everything in `left` (which is
    /// entirely newer).
    fn free_right_in_right(&mut self, mut right: ChunkRun, chunk: usize, first_removed: usize) {
        if let Some(left) = self.left.take() {
            for c in &mut self.chunks[left.head()..=left.tail()] {
                c.clear();
            }
        }

        right.free_right(&mut self.chunks, chunk, first_removed);

        if right.is_empty(&self.chunks) {
            let n = self.chunks.len();
            self.left = Some(ChunkRun::new(0, n));
            self.right = None;
        } else {
            self.left = Some(ChunkRun::new(0, right.head()));
            self.right = Some(right);
        }
    }

    /// `chunk` belongs to `left`, whether or not `right` exists: freeing from the right
    /// edge inside `left` never needs to touch `right` (which is always older), so this
    /// is a local trim.
    fn free_right_in_left(&mut self, chunk: usize, first_removed: usize) {
        let mut left = self.left.take().expect("left always exists");
        left.free_right(&mut self.chunks, chunk, first_removed);
        self.left = Some(left);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backing::SystemBacking;

    fn ring() -> RingBuffer<SystemBacking> {
        RingBuffer::new(SystemBacking::default())
    }

    #[test]
    fn bootstraps_on_first_alloc() {
        let mut rb = ring();
        assert_eq!(rb.chunk_count(), 0);
        let a = rb.alloc(4).expect("should allocate");
        assert_eq!(a.len, 4);
        assert_eq!(rb.chunk_count(), 1);
        assert_eq!(rb.geometry(), "linear");
    }

    #[test]
    fn count_tracks_live_bytes() {
        let mut rb = ring();
        let a = rb.alloc(10).unwrap();
        let b = rb.alloc(20).unwrap();
        assert_eq!(rb.count(), 30);

        rb.free_left(a.chunk_index, 10);
        assert_eq!(rb.count(), 20);

        rb.free_right(b.chunk_index, 0);
        assert_eq!(rb.count(), 0);
    }

    #[test]
    fn alloc_free_left_round_trip_is_empty() {
        let mut rb = ring();
        let a = rb.alloc(64).unwrap();
        rb.free_left(a.chunk_index, 64);
        assert_eq!(rb.count(), 0);
    }

    #[test]
    fn sliding_window_free_left_then_alloc_does_not_overlap_survivors() {
        // Five pushes into the same chunk. Free the first three from the left, then
        // push again: the fresh allocation must land after the bump pointer and must
        // not overlap the two survivors.
        let mut rb = ring();
        let allocs: Vec<_> = (0..5).map(|_| rb.alloc(64).unwrap()).collect();
        assert!(allocs.iter().all(|a| a.chunk_index == allocs[0].chunk_index));

        // Offset, within the chunk, of the end of allocs[2] (i.e. 3 * 64).
        let first_kept = 3 * 64;
        rb.free_left(allocs[2].chunk_index, first_kept);

        let fresh = rb.alloc(64).expect("wraparound alloc must succeed");

        // The fresh allocation must not overlap allocs[3] or allocs[4].
        for survivor in &allocs[3..] {
            assert!(!ranges_overlap(survivor, &fresh));
        }
    }

    fn ranges_overlap(a: &RawAllocation, b: &RawAllocation) -> bool {
        if a.chunk_index != b.chunk_index {
            return false;
        }
        let a_start = a.ptr.as_ptr() as usize;
        let b_start = b.ptr.as_ptr() as usize;
        let a_end = a_start + a.len;
        let b_end = b_start + b.len;
        a_start < b_end && b_start < a_end
    }

    #[test]
    fn scenario_overflow_formation_and_promotion_to_wrapped() {
        // Fill the first chunk exactly, then allocate again: left's tail has no more
        // room, so an overflow run must form rather than fail.
        let mut rb = ring();
        let first = rb.alloc(100).unwrap();
        let _filler = rb.alloc(8192 - 100).unwrap();
        assert_eq!(rb.geometry(), "linear");

        let o1 = rb.alloc(50).expect("overflow must form, not fail");
        let o2 = rb.alloc(60).unwrap();
        assert_eq!(rb.geometry(), "overflowing");
        assert_ne!(o1.chunk_index, first.chunk_index);
        assert_eq!(o1.chunk_index, o2.chunk_index);

        // Free an allocation inside the overflow chunk itself (keeping o2): this must
        // wipe the original chunk entirely and promote the surviving overflow data to
        // `right`, leaving the original chunk as an empty `left` ready for new pushes.
        rb.free_left(o1.chunk_index, 50);
        assert_eq!(rb.geometry(), "wrapped");
        assert_eq!(rb.count(), 60);

        let fresh = rb.alloc(10).expect("left must accept new pushes after promotion");
        assert_eq!(fresh.chunk_index, first.chunk_index);
        assert_eq!(rb.count(), 70);
    }

    // Requires `test_only_small_constants` (MAX_CHUNKS = 4): with the real 64-chunk cap,
    // reaching it by single-byte pushes into geometrically-doubling chunks would take
    // longer than any test run can afford.
    #[cfg(feature = "test_only_small_constants")]
    #[test]
    fn scenario_chunk_cap_failure_does_not_corrupt_state() {
        let mut rb = ring();
        let mut allocs = Vec::new();
        loop {
            match rb.alloc(1) {
                Ok(a) => allocs.push(a),
                Err(AllocError::ChunkVectorExhausted { max }) => {
                    assert_eq!(max, MAX_CHUNKS);
                    break;
                }
                Err(e) => panic!("unexpected error: {:?}", e),
            }
            if allocs.len() > 500_000 {
                panic!("never hit the chunk cap");
            }
        }

        // Prior allocations remain valid: total live bytes should match what we pushed.
        assert_eq!(rb.count(), allocs.len());
    }

    #[test]
    fn lifo_drain_empties_buffer() {
        let mut rb = ring();
        let allocs: Vec<_> = (0..100).map(|_| rb.alloc(12).unwrap()).collect();
        assert!(allocs.iter().all(|a| a.chunk_index == allocs[0].chunk_index));

        // Pop from the newest allocation backwards: allocation `i` starts at offset
        // `i * 12` within the (single, shared) chunk.
        for i in (0..allocs.len()).rev() {
            rb.free_right(allocs[i].chunk_index, i * 12);
            assert_eq!(rb.count(), i * 12);
        }

        assert_eq!(rb.count(), 0);
    }
}
