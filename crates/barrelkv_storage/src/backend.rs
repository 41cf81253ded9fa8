//! I/O backend trait definition and selection.

use crate::buffered::BufferedBackend;
use crate::error::StorageResult;
use crate::mmap::MmapBackend;
use crate::standard::StandardBackend;
use std::path::Path;

/// A low-level I/O backend over a single append-only file.
///
/// Backends are **opaque byte stores**. They provide positional reads,
/// pure appends, and durability control. BarrelKV owns all file format
/// interpretation - backends do not understand records or segments.
///
/// # Invariants
///
/// - `append` always writes at the current end of data
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - `sync` ensures all appended data is durable before returning
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`StandardBackend`] - positional read, append-mode write, explicit fsync
/// - [`BufferedBackend`] - standard I/O behind a write buffer
/// - [`MmapBackend`] - fixed-capacity read-write memory mapping
pub trait IoBackend: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes actually read, which may be smaller
    /// than `buf.len()` when the read reaches the end of the data.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs or the backend is closed.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize>;

    /// Appends `data` to the end of the file.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs, the backend is closed, or
    /// (for [`MmapBackend`]) the write would exceed the fixed capacity.
    fn append(&mut self, data: &[u8]) -> StorageResult<usize>;

    /// Flushes all appended data to stable storage.
    ///
    /// After this returns successfully, previously appended data is
    /// guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails or the backend is closed.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the stored data in bytes.
    ///
    /// This is the offset at which the next `append` will land.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&mut self) -> StorageResult<u64>;

    /// Truncates the stored data to `new_len` bytes.
    ///
    /// Used by recovery to drop a corrupt tail so that the next append
    /// lands at the last known-good offset.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_len` is larger than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_len: u64) -> StorageResult<()>;

    /// Flushes and closes the backend.
    ///
    /// Every operation after a successful close fails with
    /// [`StorageError::Closed`](crate::StorageError::Closed).
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    fn close(&mut self) -> StorageResult<()>;
}

/// Which I/O backend implementation a file is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Positional read, append-mode write, explicit fsync.
    #[default]
    Standard,
    /// Standard I/O behind a write buffer.
    Buffered,
    /// Fixed-capacity read-write memory mapping.
    Mmap,
}

/// Opens the backend selected by `kind` for the file at `path`.
///
/// `capacity` is only meaningful for [`BackendKind::Mmap`], where it fixes
/// the size of the mapping; the other backends ignore it.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or mapped.
pub fn open_backend(
    path: &Path,
    kind: BackendKind,
    capacity: u64,
) -> StorageResult<Box<dyn IoBackend>> {
    Ok(match kind {
        BackendKind::Standard => Box::new(StandardBackend::open(path)?),
        BackendKind::Buffered => Box::new(BufferedBackend::open(path)?),
        BackendKind::Mmap => Box::new(MmapBackend::open(path, capacity)?),
    })
}
