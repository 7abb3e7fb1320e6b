//! A `ChunkRun` is a view over a contiguous span of the chunk vector, treated as one
//! growing-to-the-right live region. A run's "head" is its leftmost live chunk, its
//! "tail" is its rightmost live chunk; only the tail ever receives bump allocations.
//!
//! `ChunkRun` never owns chunks or grows the chunk vector itself: extending a run to
//! cover a freshly-appended chunk, or deciding that a run should exist at all, is the
//! `RingBuffer`'s job. This keeps `ChunkRun` a pure view with no allocation authority.
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

use std::ops::Range;

use crate::chunk::Chunk;

/// A contiguous span of chunks, `[base, base + active_count)`, behaving as one growing
/// live region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRun {
    base: usize,
    active_count: usize,
}

impl ChunkRun {
    /// Creates a run consisting of a single chunk, which may or may not be empty.
    #[requires(active_count >= 1, "a run always covers at least one chunk")]
    pub fn new(base: usize, active_count: usize) -> Self {
        ChunkRun { base, active_count }
    }

    /// Index of the leftmost chunk in the run's view (the head, if the run is non-empty).
    #[inline]
    pub fn head(&self) -> usize {
        self.base
    }

    /// Index of the rightmost chunk in the run's view (the tail, and bump target).
    #[inline]
    pub fn tail(&self) -> usize {
        self.base + self.active_count - 1
    }

    /// Number of chunks currently covered by this run's view.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Whether `chunk_idx` falls within this run's current view.
    #[inline]
    pub fn contains(&self, chunk_idx: usize) -> bool {
        chunk_idx >= self.base && chunk_idx <= self.tail()
    }

    /// Whether the run currently holds no live bytes. Per the empty-normal-form
    /// invariant, an empty run always has exactly one (empty) chunk in its view.
    pub fn is_empty(&self, chunks: &[Chunk]) -> bool {
        self.active_count == 1 && chunks[self.base].is_empty()
    }

    /// Attempts to bump-allocate `n` bytes from the tail chunk.
    ///
    /// Returns `None` if the tail is full; the caller decides whether to extend the run
    /// to a freshly appended chunk and retry.
    #[ensures(ret.is_some() -> ret.as_ref().unwrap().0 == self.tail(),
              "a successful alloc always lands in the run's tail chunk")]
    #[ensures(ret.is_some() -> ret.as_ref().unwrap().1.len() == n,
              "a successful alloc returns exactly n bytes")]
    pub fn alloc(&self, chunks: &mut [Chunk], n: usize) -> Option<(usize, Range<usize>)> {
        let tail = self.tail();
        chunks[tail].alloc(n).map(|range| (tail, range))
    }

    /// Extends the run's view by one chunk, which must immediately follow the current
    /// tail in the chunk vector.
    #[requires(new_chunk_idx == self.base + self.active_count,
               "the chunk vector is append-only, so a run can only grow by its next index")]
    pub fn extend(&mut self, new_chunk_idx: usize) {
        let _ = new_chunk_idx;
        self.active_count += 1;
    }

    /// Applies a free-from-the-left at `chunk_idx` (which must lie within this run's
    /// view), and rebalances the run: every chunk strictly left of `chunk_idx` is cleared
    /// and dropped from the view, and the head advances to `chunk_idx` (or past it, if
    /// `chunk_idx` itself emptied out).
    #[requires(self.contains(chunk_idx), "chunk_idx must belong to this run")]
    pub fn free_left(&mut self, chunks: &mut [Chunk], chunk_idx: usize, first_kept: usize) {
        let tail = self.tail();

        chunks[chunk_idx].free_left(first_kept);
        for chunk in &mut chunks[self.base..chunk_idx] {
            chunk.clear();
        }

        let mut new_head = if chunks[chunk_idx].is_empty() {
            chunk_idx + 1
        } else {
            chunk_idx
        };
        if new_head > tail {
            // Collapse to empty-normal form: keep exactly the (now-empty) tail chunk.
            new_head = tail;
        }

        self.base = new_head;
        self.active_count = tail - new_head + 1;
    }

    /// Applies a free-from-the-right at `chunk_idx` (which must lie within this run's
    /// view), symmetric to [`Self::free_left`].
    #[requires(self.contains(chunk_idx), "chunk_idx must belong to this run")]
    pub fn free_right(&mut self, chunks: &mut [Chunk], chunk_idx: usize, first_removed: usize) {
        let head = self.base;

        chunks[chunk_idx].free_right(first_removed);
        for chunk in &mut chunks[(chunk_idx + 1)..=self.tail()] {
            chunk.clear();
        }

        let mut new_tail = if chunks[chunk_idx].is_empty() {
            chunk_idx.saturating_sub(1).max(head)
        } else {
            chunk_idx
        };
        if new_tail < head {
            new_tail = head;
        }

        self.active_count = new_tail - head + 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chunks(sizes: &[usize]) -> Vec<Chunk> {
        sizes
            .iter()
            .map(|&n| Chunk::new(vec![0u8; n].into_boxed_slice()))
            .collect()
    }

    #[test]
    fn fresh_run_is_empty() {
        let chunks = chunks(&[16]);
        let run = ChunkRun::new(0, 1);
        assert!(run.is_empty(&chunks));
        assert_eq!(run.head(), 0);
        assert_eq!(run.tail(), 0);
    }

    #[test]
    fn alloc_bumps_tail_only() {
        let mut chunks = chunks(&[8, 8]);
        let mut run = ChunkRun::new(0, 1);

        assert_eq!(run.alloc(&mut chunks, 8), Some((0, 0..8)));
        assert_eq!(run.alloc(&mut chunks, 1), None, "tail is full");

        run.extend(1);
        assert_eq!(run.tail(), 1);
        assert_eq!(run.alloc(&mut chunks, 4), Some((1, 0..4)));
    }

    #[test]
    fn free_left_advances_head_and_clears_behind() {
        let mut chunks = chunks(&[8, 8, 8]);
        let mut run = ChunkRun::new(0, 1);
        run.alloc(&mut chunks, 8);
        run.extend(1);
        run.alloc(&mut chunks, 8);
        run.extend(2);
        run.alloc(&mut chunks, 4);

        // Free everything in chunk 0 and chunk 1.
        run.free_left(&mut chunks, 1, 8);
        assert_eq!(run.head(), 2, "chunk 1 fully emptied, so head skips past it");
        assert!(chunks[0].is_empty());
        assert!(chunks[1].is_empty());
        assert_eq!(chunks[2].len(), 4);
    }

    #[test]
    fn free_left_can_partially_trim_head_chunk() {
        let mut chunks = chunks(&[8, 8]);
        let mut run = ChunkRun::new(0, 1);
        run.alloc(&mut chunks, 8);
        run.extend(1);
        run.alloc(&mut chunks, 4);

        run.free_left(&mut chunks, 0, 4);
        assert_eq!(run.head(), 0);
        assert_eq!(chunks[0].start(), 4);
        assert_eq!(chunks[0].len(), 4);
    }

    #[test]
    fn free_left_collapses_to_empty_normal_form() {
        let mut chunks = chunks(&[8]);
        let mut run = ChunkRun::new(0, 1);
        run.alloc(&mut chunks, 8);

        run.free_left(&mut chunks, 0, 8);
        assert!(run.is_empty(&chunks));
        assert_eq!(run.active_count(), 1);
    }

    #[test]
    fn free_right_trims_tail_and_clears_ahead() {
        let mut chunks = chunks(&[8, 8, 8]);
        let mut run = ChunkRun::new(0, 1);
        run.alloc(&mut chunks, 8);
        run.extend(1);
        run.alloc(&mut chunks, 8);
        run.extend(2);
        run.alloc(&mut chunks, 4);

        run.free_right(&mut chunks, 1, 4);
        assert_eq!(run.tail(), 1);
        assert!(chunks[2].is_empty());
        assert_eq!(chunks[1].len(), 4);
    }

    #[test]
    fn free_right_collapses_to_empty_normal_form() {
        let mut chunks = chunks(&[8]);
        let mut run = ChunkRun::new(0, 1);
        run.alloc(&mut chunks, 8);

        run.free_right(&mut chunks, 0, 0);
        assert!(run.is_empty(&chunks));
        assert_eq!(run.active_count(), 1);
    }
}
