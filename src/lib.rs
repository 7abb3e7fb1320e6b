//! A growable circular-buffer allocator.
//!
//! [`CircularAllocator`] serves variable-size allocation requests in FIFO-like order: the
//! caller incrementally frees either the oldest or the newest live allocation with
//! [`CircularAllocator::free_left`] / [`CircularAllocator::free_right`], and the vacated
//! space is reused for new allocations. Unlike a fixed-size ring buffer, the backing
//! storage grows on demand; unlike an arena, allocations can be reclaimed without waiting
//! for bulk teardown; unlike a general-purpose heap, it never recycles interior space —
//! only the leading or trailing edge of the live region.
//!
//! The allocator is strictly single-threaded: every operation takes `&mut self`, and
//! callers must free in strict FIFO-or-LIFO edge order. Freeing anything other than the
//! current oldest (`free_left`) or newest (`free_right`) live allocation is a programmer
//! error, caught only in debug/test builds via an internal debug-only range registry.
mod allocator;
mod backing;
mod chunk;
mod chunk_run;
mod error;
mod ring_buffer;

#[cfg(any(test, feature = "check_contracts"))]
mod debug_invariants;

pub use allocator::{Allocation, CircularAllocator};
pub use backing::{Backing, SystemBacking};
pub use error::AllocError;
