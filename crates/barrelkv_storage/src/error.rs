//! Error types for backend operations.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur inside an I/O backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An append would exceed the fixed capacity of a memory-mapped backend.
    #[error("write of {requested} bytes at cursor {cursor} exceeds mmap capacity {capacity}")]
    WriteBeyondCapacity {
        /// Size of the rejected append.
        requested: usize,
        /// Current write cursor.
        cursor: u64,
        /// Fixed capacity of the mapping.
        capacity: u64,
    },

    /// A file is larger than the capacity configured for its mapping.
    #[error("file is {actual} bytes, larger than the configured mmap capacity {capacity}")]
    FileExceedsCapacity {
        /// On-disk file size.
        actual: u64,
        /// Configured mapping capacity.
        capacity: u64,
    },

    /// The backend has been closed.
    #[error("backend is closed")]
    Closed,
}
