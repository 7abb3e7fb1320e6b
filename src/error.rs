//! Error types returned by the circular-buffer allocator.
use thiserror::Error;

/// Failure modes for [`crate::CircularAllocator::alloc`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    /// The backing allocator refused to hand out a new chunk.
    #[error("backing allocator failed to provide {requested} bytes")]
    Backing {
        /// Number of bytes that were requested from the backing allocator.
        requested: usize,
    },
    /// The chunk vector has reached its cap; a payload trailer only has a single byte to
    /// spare for the chunk index, so growth must stop there.
    #[error("chunk vector exhausted (at most {max} chunks)")]
    ChunkVectorExhausted {
        /// The configured cap.
        max: usize,
    },
}
