//! `CircularAllocator` is the public facade: it wraps a [`RingBuffer`] and hides chunk
//! indices and backing buffers behind a plain `(pointer, length)` handle, by stashing a
//! small trailer after every payload.
//!
//! The trailer records enough to reconstruct the raw envelope [`RingBuffer::alloc`]
//! handed out, so `free_left`/`free_right` can translate a payload handle back into a
//! `(chunk_index, offset)` pair without any side bookkeeping.
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

use std::convert::TryFrom;
use std::mem::size_of;
use std::ptr::NonNull;
use std::slice;

use crate::backing::{Backing, SystemBacking};
use crate::error::AllocError;
use crate::ring_buffer::RingBuffer;

/// Every envelope's trailer starts on a 4-byte boundary, regardless of the caller's
/// requested payload alignment.
const TRAILER_ALIGN: usize = 4;

/// `start_unused: u32`, `total_unused: u32`, `chunk_index: u8`, tightly packed.
const TRAILER_LEN: usize = size_of::<u32>() + size_of::<u32>() + size_of::<u8>();

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// A handle to a single live allocation: a raw pointer and length, deliberately not
/// borrowed from the allocator, so callers can hold it across further `alloc` calls
/// (unlike an arena that hands out borrowed slices, a wrapping ring buffer routinely
/// needs its oldest handles to outlive many subsequent allocations).
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    ptr: NonNull<u8>,
    len: usize,
}

impl Allocation {
    /// Number of payload bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the payload as a byte slice.
    ///
    /// # Safety
    ///
    /// The allocation must not have been freed, and the caller must not alias this
    /// borrow with a concurrent mutable borrow of the same bytes.
    pub unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }

    /// Mutably borrows the payload as a byte slice.
    ///
    /// # Safety
    ///
    /// The allocation must not have been freed, and the caller must hold no other
    /// borrow of these bytes.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }
}

/// A growable circular-buffer allocator for FIFO- or LIFO-order variable-size
/// allocations, built from one or more append-only backing chunks.
///
/// Not `Sync`: every operation takes `&mut self` and the type carries no internal
/// synchronization. Share it across threads behind your own lock if you need to.
pub struct CircularAllocator<B: Backing = SystemBacking> {
    ring: RingBuffer<B>,
    #[cfg(any(test, feature = "check_contracts"))]
    live: crate::debug_invariants::LiveRanges,
}

impl CircularAllocator<SystemBacking> {
    /// Creates an allocator backed by the global allocator.
    pub fn new() -> Self {
        CircularAllocator {
            ring: RingBuffer::new(SystemBacking::default()),
            #[cfg(any(test, feature = "check_contracts"))]
            live: crate::debug_invariants::LiveRanges::new(),
        }
    }
}

impl Default for CircularAllocator<SystemBacking> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backing> CircularAllocator<B> {
    /// Creates an allocator drawing its chunks from a caller-supplied [`Backing`].
    pub fn with_backing(backing: B) -> Self {
        CircularAllocator {
            ring: RingBuffer::new(backing),
            #[cfg(any(test, feature = "check_contracts"))]
            live: crate::debug_invariants::LiveRanges::new(),
        }
    }

    /// Total number of live envelope bytes currently allocated: payload plus alignment
    /// padding plus trailer, summed over every live allocation.
    pub fn count(&self) -> usize {
        self.ring.count()
    }

    /// Allocates `n` bytes aligned to `align` (which must be a power of two).
    ///
    /// The returned [`Allocation`] must later be handed, exactly once, to
    /// [`Self::free_left`] or [`Self::free_right`].
    #[requires(align.is_power_of_two(), "align must be a power of two")]
    pub fn alloc(&mut self, n: usize, align: usize) -> Result<Allocation, AllocError> {
        // A zero-length request never touches the ring buffer: there is no payload to
        // place and no trailer to anchor, so `count()` must not grow and neither
        // `free_left` nor `free_right` has anything to do later.
        if n == 0 {
            return Ok(Allocation {
                ptr: NonNull::dangling(),
                len: 0,
            });
        }

        // Worst case envelope: up to `align - 1` bytes of padding ahead of the payload,
        // the `n` payload bytes, up to `TRAILER_ALIGN - 1` bytes of padding before the
        // trailer, then the trailer itself.
        let envelope = align
            .saturating_sub(1)
            .checked_add(n)
            .and_then(|x| x.checked_add(TRAILER_ALIGN - 1))
            .and_then(|x| x.checked_add(TRAILER_LEN))
            .ok_or(AllocError::Backing { requested: n })?;

        let raw = self.ring.alloc(envelope)?;
        let base = raw.ptr.as_ptr() as usize;

        let payload_start = align_up(base, align);
        let start_unused = payload_start - base;

        let trailer_start = align_up(payload_start + n, TRAILER_ALIGN);

        // `total_unused` must match the envelope actually reserved from the `RingBuffer`
        // (a function of `align` alone), not the envelope the achieved pointer alignment
        // happened to need: `free_left` recovers the chunk's bump end from `n +
        // total_unused`, and that must land exactly where `Chunk::alloc` bumped to.
        let total_unused = envelope - n;

        debug_assert!(
            trailer_start + TRAILER_LEN <= base + raw.len,
            "worst-case envelope sizing must always leave room for payload + trailer"
        );

        let chunk_index =
            u8::try_from(raw.chunk_index).expect("MAX_CHUNKS fits in a u8 by construction");

        unsafe {
            Trailer {
                start_unused: start_unused as u32,
                total_unused: total_unused as u32,
                chunk_index,
            }
            .write_at(trailer_start as *mut u8);

            let payload_ptr = NonNull::new_unchecked((base as *mut u8).add(start_unused));

            #[cfg(any(test, feature = "check_contracts"))]
            self.live.insert(payload_ptr.as_ptr() as usize, n);

            Ok(Allocation {
                ptr: payload_ptr,
                len: n,
            })
        }
    }

    /// Frees `allocation` and everything allocated no later than it (FIFO / queue
    /// semantics).
    ///
    /// # Safety
    ///
    /// `allocation` must have come from a prior call to [`Self::alloc`] on this same
    /// allocator and must not have been freed already by either method.
    pub unsafe fn free_left(&mut self, allocation: Allocation) {
        if allocation.len == 0 {
            return;
        }

        #[cfg(any(test, feature = "check_contracts"))]
        self.live
            .remove(allocation.ptr.as_ptr() as usize, allocation.len);

        let trailer_start = trailer_start_of(&allocation);
        let trailer = Trailer::read_at(trailer_start as *const u8);
        let chunk_index = trailer.chunk_index as usize;
        let chunk_base = self.ring.chunk_base_ptr(chunk_index);

        // The reserved envelope can run past `trailer_start + TRAILER_LEN`: the worst-case
        // envelope sizing only guarantees *enough* room for trailing padding plus the
        // trailer, not that the achieved pointer alignment consumed all of it. Recover the
        // true bump end from the envelope start (`payload_start - start_unused`) plus `n`
        // plus `total_unused`, which together always equal the envelope `alloc` reserved.
        let payload_start = allocation.ptr.as_ptr() as usize;
        let envelope_start = payload_start - trailer.start_unused as usize - chunk_base;
        let envelope_end = envelope_start + allocation.len + trailer.total_unused as usize;
        self.ring.free_left(chunk_index, envelope_end);
    }

    /// Frees `allocation` and everything allocated no earlier than it (LIFO / stack
    /// semantics).
    ///
    /// # Safety
    ///
    /// `allocation` must have come from a prior call to [`Self::alloc`] on this same
    /// allocator and must not have been freed already by either method.
    pub unsafe fn free_right(&mut self, allocation: Allocation) {
        if allocation.len == 0 {
            return;
        }

        #[cfg(any(test, feature = "check_contracts"))]
        self.live
            .remove(allocation.ptr.as_ptr() as usize, allocation.len);

        let trailer_start = trailer_start_of(&allocation);
        let trailer = Trailer::read_at(trailer_start as *const u8);
        let chunk_index = trailer.chunk_index as usize;
        let chunk_base = self.ring.chunk_base_ptr(chunk_index);

        let payload_start = allocation.ptr.as_ptr() as usize;
        let envelope_start = (payload_start - trailer.start_unused as usize) - chunk_base;
        self.ring.free_right(chunk_index, envelope_start);
    }
}

/// Recomputes the trailer's absolute address from the payload handle alone: the same
/// alignment arithmetic `alloc` used to place it.
fn trailer_start_of(allocation: &Allocation) -> usize {
    let payload_start = allocation.ptr.as_ptr() as usize;
    align_up(payload_start + allocation.len, TRAILER_ALIGN)
}

struct Trailer {
    start_unused: u32,
    total_unused: u32,
    chunk_index: u8,
}

impl Trailer {
    unsafe fn write_at(&self, at: *mut u8) {
        at.cast::<u32>().write_unaligned(self.start_unused);
        at.add(4).cast::<u32>().write_unaligned(self.total_unused);
        at.add(8).write(self.chunk_index);
    }

    unsafe fn read_at(at: *const u8) -> Trailer {
        Trailer {
            start_unused: at.cast::<u32>().read_unaligned(),
            total_unused: at.add(4).cast::<u32>().read_unaligned(),
            chunk_index: at.add(8).read(),
        }
    }
}
