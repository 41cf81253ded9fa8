//! Standard file-backed I/O.

use crate::backend::IoBackend;
use crate::error::{StorageError, StorageResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The default I/O backend.
///
/// Uses ordinary OS file APIs: the file is opened in append mode so writes
/// always land at the end, reads seek to their offset, and `sync` maps to
/// `fsync`.
///
/// # Example
///
/// ```no_run
/// use barrelkv_storage::{IoBackend, StandardBackend};
/// use std::path::Path;
///
/// let mut backend = StandardBackend::open(Path::new("000000000.data")).unwrap();
/// backend.append(b"record bytes").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct StandardBackend {
    path: PathBuf,
    file: Option<File>,
}

impl StandardBackend {
    /// Opens or creates the file at `path` for reading and appending.
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

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> StorageResult<&mut File> {
        self.file.as_mut().ok_or(StorageError::Closed)
    }
}

impl IoBackend for StandardBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;

        // read() may return short counts; fill as much of buf as the file
        // has, stopping cleanly at end of data.
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
        let file = self.file()?;
        file.write_all(data)?;
        Ok(data.len())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file()?.sync_all()?;
        Ok(())
    }

    fn size(&mut self) -> StorageResult<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let file = self.file()?;
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
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let mut backend = StandardBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let mut backend = StandardBackend::open(&path).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 5);
        assert_eq!(backend.append(b" world").unwrap(), 6);
        assert_eq!(backend.size().unwrap(), 11);

        let mut buf = [0u8; 5];
        let n = backend.read_at(&mut buf, 6).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn read_past_end_is_short() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let mut backend = StandardBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let mut buf = [0u8; 10];
        let n = backend.read_at(&mut buf, 3).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"lo");

        let n = backend.read_at(&mut buf, 5).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        {
            let mut backend = StandardBackend::open(&path).unwrap();
            backend.append(b"persistent").unwrap();
            backend.close().unwrap();
        }

        let mut backend = StandardBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 10);

        let mut buf = [0u8; 10];
        backend.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"persistent");
    }

    #[test]
    fn reopen_appends_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        {
            let mut backend = StandardBackend::open(&path).unwrap();
            backend.append(b"first").unwrap();
            backend.close().unwrap();
        }

        let mut backend = StandardBackend::open(&path).unwrap();
        backend.append(b"second").unwrap();

        let mut buf = [0u8; 11];
        backend.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"firstsecond");
    }

    #[test]
    fn truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let mut backend = StandardBackend::open(&path).unwrap();
        backend.append(b"keep+drop").unwrap();

        backend.truncate(4).unwrap();
        assert_eq!(backend.size().unwrap(), 4);

        backend.append(b"tail").unwrap();
        let mut buf = [0u8; 8];
        backend.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"keeptail");
    }

    #[test]
    fn truncate_beyond_size_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let mut backend = StandardBackend::open(&path).unwrap();
        backend.append(b"abc").unwrap();

        assert!(backend.truncate(10).is_err());
    }

    #[test]
    fn closed_backend_rejects_operations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");
        let mut backend = StandardBackend::open(&path).unwrap();
        backend.close().unwrap();

        assert!(matches!(
            backend.append(b"x"),
            Err(StorageError::Closed)
        ));
        let mut buf = [0u8; 1];
        assert!(matches!(
            backend.read_at(&mut buf, 0),
            Err(StorageError::Closed)
        ));
    }
}
