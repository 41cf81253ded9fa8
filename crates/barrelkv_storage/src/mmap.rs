//! Memory-mapped I/O.

use crate::backend::IoBackend;
use crate::error::{StorageError, StorageResult};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// A fixed-capacity memory-mapped backend.
///
/// On open the file is grown to `capacity` bytes and mapped read-write;
/// the pre-existing length becomes the write cursor. Appends copy into the
/// mapping at the cursor and are rejected once they would exceed the
/// capacity - the engine rotates to a new segment before that happens.
///
/// A dirty flag makes `sync` a no-op when nothing changed since the last
/// flush. `close` flushes the mapping, unmaps, truncates the file back to
/// the bytes actually written, and syncs, so a closed segment is
/// indistinguishable from one written by the other backends.
#[derive(Debug)]
pub struct MmapBackend {
    path: PathBuf,
    file: Option<File>,
    map: Option<MmapMut>,
    dirty: bool,
    cursor: u64,
    capacity: u64,
}

impl MmapBackend {
    /// Opens or creates the file at `path` and maps it at `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is already larger than `capacity`, or
    /// if it cannot be opened, resized, or mapped.
    pub fn open(path: &Path, capacity: u64) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let used = file.metadata()?.len();
        if used > capacity {
            return Err(StorageError::FileExceedsCapacity {
                actual: used,
                capacity,
            });
        }

        file.set_len(capacity)?;
        // Safety: the mapping lives inside this backend together with the
        // file handle, and the engine never resizes a file while its
        // backend is open.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            map: Some(map),
            dirty: false,
            cursor: used,
            capacity,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the fixed capacity of the mapping.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

impl IoBackend for MmapBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let map = self.map.as_ref().ok_or(StorageError::Closed)?;

        if offset >= self.capacity {
            return Ok(0);
        }
        let end = self.capacity.min(offset + buf.len() as u64);
        let n = (end - offset) as usize;
        buf[..n].copy_from_slice(&map[offset as usize..end as usize]);
        Ok(n)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<usize> {
        let map = self.map.as_mut().ok_or(StorageError::Closed)?;

        let new_cursor = self.cursor + data.len() as u64;
        if new_cursor > self.capacity {
            return Err(StorageError::WriteBeyondCapacity {
                requested: data.len(),
                cursor: self.cursor,
                capacity: self.capacity,
            });
        }

        map[self.cursor as usize..new_cursor as usize].copy_from_slice(data);
        self.cursor = new_cursor;
        self.dirty = true;
        Ok(data.len())
    }

    fn sync(&mut self) -> StorageResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.map.as_ref().ok_or(StorageError::Closed)?.flush()?;
        self.dirty = false;
        Ok(())
    }

    fn size(&mut self) -> StorageResult<u64> {
        if self.map.is_none() {
            return Err(StorageError::Closed);
        }
        Ok(self.cursor)
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        if self.map.is_none() {
            return Err(StorageError::Closed);
        }
        if new_len > self.cursor {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate {} written bytes to {new_len}", self.cursor),
            )));
        }
        // The stale bytes stay in the mapping but are unreachable: reads
        // of record data are bounded by the cursor-derived size, and the
        // next append overwrites them.
        self.cursor = new_len;
        self.dirty = true;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        let Some(map) = self.map.take() else {
            return Ok(());
        };
        if self.dirty {
            map.flush()?;
            self.dirty = false;
        }
        drop(map);

        if let Some(file) = self.file.take() {
            // Shrink the file from the mapped capacity back to the bytes
            // actually written, then make the new length durable.
            file.set_len(self.cursor)?;
            file.sync_all()?;
        }
        Ok(())
    }
}
