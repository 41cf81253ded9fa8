//! Engine configuration.

use barrelkv_storage::BackendKind;
use std::path::PathBuf;

/// Default maximum size of a segment file before rotation: 256 MiB.
pub const DEFAULT_DATA_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Configuration for opening an engine.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory where the engine stores its segment files. Must exist.
    pub dir_path: PathBuf,

    /// Maximum size of a segment file before the engine rotates to a new
    /// one. Must be greater than zero.
    pub data_file_size: u64,

    /// Whether every append is followed by an fsync before the write
    /// returns (safer but slower).
    pub sync_write: bool,

    /// Which I/O backend segment files are opened with.
    pub backend: BackendKind,
}

impl Options {
    /// Creates options for the given directory with default values.
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            data_file_size: DEFAULT_DATA_FILE_SIZE,
            sync_write: false,
            backend: BackendKind::Standard,
        }
    }

    /// Sets the maximum segment file size.
    #[must_use]
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.data_file_size = size;
        self
    }

    /// Sets whether every write is synced to disk before returning.
    #[must_use]
    pub fn sync_write(mut self, value: bool) -> Self {
        self.sync_write = value;
        self
    }

    /// Sets the I/O backend used for segment files.
    #[must_use]
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }
}

/// Configuration for engine iteration.
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only keys beginning with this prefix are visited. Default is empty
    /// (every key).
    pub prefix: Vec<u8>,

    /// Whether to iterate in descending key order.
    pub reverse: bool,
}

impl IteratorOptions {
    /// Creates iterator options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts iteration to keys beginning with `prefix`.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets descending key order.
    #[must_use]
    pub fn reverse(mut self, value: bool) -> Self {
        self.reverse = value;
        self
    }
}
