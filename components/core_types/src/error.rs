//! Error types for the object-memory core.
//!
//! Running out of memory is the only recoverable failure this layer knows
//! about. Every growth point (cell allocation, property array growth, shape
//! table growth, cache ring growth) validates its allocation before
//! publishing the new structure, so an `OutOfMemory` leaves the previous
//! state intact. Broken invariants are asserted instead.

use std::collections::TryReserveError;

use thiserror::Error;

/// Recoverable memory errors.
///
/// # Examples
///
/// ```
/// use core_types::MemoryError;
///
/// let err = MemoryError::OutOfMemory { requested: 64 };
/// assert_eq!(err.to_string(), "out of memory (64 bytes requested)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// An allocation could not be satisfied, either because the configured
    /// memory limit would be exceeded or because the allocator refused.
    #[error("out of memory ({requested} bytes requested)")]
    OutOfMemory {
        /// Number of bytes the failed operation asked for
        requested: usize,
    },
}

impl MemoryError {
    /// Builds an `OutOfMemory` error for a failed `try_reserve` of
    /// `additional` elements of `elem_size` bytes each.
    pub fn from_reserve(_err: TryReserveError, additional: usize, elem_size: usize) -> Self {
        MemoryError::OutOfMemory {
            requested: additional.saturating_mul(elem_size),
        }
    }
}

/// Result type for fallible heap operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
