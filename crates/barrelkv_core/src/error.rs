//! Error types for the BarrelKV engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in BarrelKV engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An empty key was passed to put, get, or delete.
    #[error("key is empty")]
    EmptyKey,

    /// The key has no live entry, or the located record was a tombstone.
    #[error("key not found")]
    KeyNotFound,

    /// The options passed to open are invalid.
    #[error("invalid options: {message}")]
    InvalidOptions {
        /// Description of the invalid option.
        message: String,
    },

    /// The target directory does not exist.
    #[error("directory does not exist: {path}")]
    DirectoryMissing {
        /// The missing directory.
        path: PathBuf,
    },

    /// Another engine instance holds the directory lock.
    #[error("directory locked: another engine has exclusive access")]
    DirectoryLocked,

    /// A record header could not be decoded.
    #[error("corrupt record header: {message}")]
    CorruptHeader {
        /// Description of the corruption.
        message: String,
    },

    /// A record failed CRC verification.
    #[error("record checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// The checksum stored on disk.
        expected: u32,
        /// The checksum computed from the record bytes.
        actual: u32,
    },

    /// A merge was requested while one is already running.
    #[error("merge already in progress")]
    MergeInProgress,

    /// I/O backend error.
    #[error("storage error: {0}")]
    Storage(#[from] barrelkv_storage::StorageError),

    /// Filesystem error outside the backends (directory listing, rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invariant violation (index and segments disagree).
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl EngineError {
    /// Creates an invalid options error.
    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }

    /// Creates a corrupt header error.
    pub fn corrupt_header(message: impl Into<String>) -> Self {
        Self::CorruptHeader {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
