//! Buffered file-backed I/O.

use crate::backend::IoBackend;
use crate::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A buffered variant of the standard backend.
///
/// Appends accumulate in a [`BufWriter`] and reach the OS in larger writes.
/// Positional reads and size queries flush the writer first so they always
/// observe every byte appended so far; `close` flushes, syncs, then closes.
///
/// The write handle shares one file description with the read handle, so
/// append-mode writes land at the true end of the file no matter where the
/// read side last seeked.
#[derive(Debug)]
pub struct BufferedBackend {
    path: PathBuf,
    file: Option<File>,
    writer: Option<BufWriter<File>>,
}

impl BufferedBackend {
    /// Opens or creates the file at `path` for buffered appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let writer = BufWriter::new(file.try_clone()?);

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            writer: Some(writer),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_writer(&mut self) -> StorageResult<()> {
        self.writer
            .as_mut()
            .ok_or(StorageError::Closed)?
            .flush()?;
        Ok(())
    }
}

impl IoBackend for BufferedBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        // The writer must be drained before a positional read, otherwise
        // recently appended records are invisible to the read side.
        self.flush_writer()?;

        let file = self.file.as_mut().ok_or(StorageError::Closed)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut read = 0;
        while read < buf.len() {
            let n = file.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<usize> {
        self.writer
            .as_mut()
            .ok_or(StorageError::Closed)?
            .write_all(data)?;
        Ok(data.len())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.flush_writer()?;
        self.file.as_mut().ok_or(StorageError::Closed)?.sync_all()?;
        Ok(())
    }

    fn size(&mut self) -> StorageResult<u64> {
        self.flush_writer()?;
        Ok(self.file.as_mut().ok_or(StorageError::Closed)?.metadata()?.len())
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        self.flush_writer()?;
        let file = self.file.as_mut().ok_or(StorageError::Closed)?;
        let current = file.metadata()?.len();
        if new_len > current {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate {current}-byte file to {new_len} bytes"),
            )));
        }
        file.set_len(new_len)?;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}
