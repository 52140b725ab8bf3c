//! Error types for the core domain.

use thiserror::Error;

/// Errors reported by [`crate::ring::RingBuffer`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingBufferError {
    /// A push would exceed capacity and the buffer is not overwriting.
    #[error("ring buffer overflow: {requested} bytes requested, {available} available")]
    Overflow {
        /// Bytes the caller tried to store.
        requested: usize,
        /// Free bytes at the time of the push.
        available: usize,
    },
}
