//! Segment files.
//!
//! A segment is one append-only `.data` file holding a sequence of encoded
//! records. Exactly one segment per directory is *active* (appendable); the
//! rest are *sealed* and read-only. [`SegmentFile`] wraps an I/O backend
//! with a record-oriented API and tracks the write cursor.
//!
//! The hint file and the merge-completion marker reuse the same record
//! format and therefore the same type, under their fixed file names.

use crate::error::{EngineError, EngineResult};
use crate::record::{
    decode_header, encode_location, encode_record, record_crc, Record, RecordLocation,
    MAX_HEADER_SIZE,
};
use barrelkv_storage::{open_backend, BackendKind, IoBackend};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

/// File-name suffix of segment files.
pub const DATA_FILE_SUFFIX: &str = ".data";
/// File name of the compaction index emitted by merge.
pub const HINT_FILE_NAME: &str = "hintIndex";
/// File name of the merge completion marker.
pub const MERGE_MARKER_NAME: &str = "mergeFina";

/// Returns the path of segment `file_id` inside `dir`.
#[must_use]
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

/// One segment file: a file id, a write cursor, and an I/O backend.
///
/// Reads take `&self` (the backend sits behind its own lock) so sealed
/// segments can be shared across threads; appends take `&mut self` and are
/// only ever issued against the engine's active segment, under the
/// engine's write lock.
pub struct SegmentFile {
    file_id: u32,
    write_off: i64,
    io: RwLock<Box<dyn IoBackend>>,
}

impl SegmentFile {
    /// Opens segment `file_id` in `dir` under the given backend.
    ///
    /// The write cursor starts at zero; recovery advances it to the end of
    /// the valid data after scanning.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be opened.
    pub fn open(
        dir: &Path,
        file_id: u32,
        max_size: u64,
        kind: BackendKind,
    ) -> EngineResult<Self> {
        Self::open_at(&data_file_path(dir, file_id), file_id, max_size, kind)
    }

    /// Opens the hint file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be opened.
    pub fn open_hint(dir: &Path, max_size: u64, kind: BackendKind) -> EngineResult<Self> {
        Self::open_at(&dir.join(HINT_FILE_NAME), 0, max_size, kind)
    }

    /// Opens the merge completion marker in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be opened.
    pub fn open_merge_marker(dir: &Path, max_size: u64, kind: BackendKind) -> EngineResult<Self> {
        Self::open_at(&dir.join(MERGE_MARKER_NAME), 0, max_size, kind)
    }

    fn open_at(path: &Path, file_id: u32, max_size: u64, kind: BackendKind) -> EngineResult<Self> {
        let io = open_backend(path, kind, max_size)?;
        Ok(Self {
            file_id,
            write_off: 0,
            io: RwLock::new(io),
        })
    }

    /// Returns this segment's file id.
    #[must_use]
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the write cursor: the number of bytes written so far.
    #[must_use]
    pub fn write_off(&self) -> i64 {
        self.write_off
    }

    /// Sets the write cursor. Used by recovery after scanning an existing
    /// file.
    pub fn set_write_off(&mut self, offset: i64) {
        self.write_off = offset;
    }

    /// Appends encoded record bytes and advances the write cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn append(&mut self, buf: &[u8]) -> EngineResult<()> {
        let written = self.io.write().append(buf)?;
        self.write_off += written as i64;
        Ok(())
    }

    /// Reads and decodes the record starting at `offset`.
    ///
    /// Returns the record and the total number of bytes it occupies, or
    /// `None` when `offset` is the clean end of the file.
    ///
    /// # Errors
    ///
    /// - `CorruptHeader` for a truncated, malformed, or all-zero header, a
    ///   truncated record body, or an offset past the end of the file.
    /// - `ChecksumMismatch` when the stored CRC does not match the bytes.
    pub fn read_record(&self, offset: i64) -> EngineResult<Option<(Record, i64)>> {
        let mut io = self.io.write();

        let file_size = io.size()? as i64;
        if offset == file_size {
            return Ok(None);
        }
        if offset > file_size {
            return Err(EngineError::corrupt_header(format!(
                "offset {offset} beyond segment end {file_size}"
            )));
        }

        // The header is variable-length; read its maximum, bounded by what
        // the file still has.
        let header_cap = MAX_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_cap];
        let n = io.read_at(&mut header_buf, offset as u64)?;

        let (header, header_len) = decode_header(&header_buf[..n])?;
        if header.is_empty() {
            return Err(EngineError::corrupt_header("empty record header"));
        }

        let key_len = header.key_len as usize;
        let value_len = header.value_len as usize;
        let total = header_len as i64 + key_len as i64 + value_len as i64;
        if offset + total > file_size {
            return Err(EngineError::corrupt_header("truncated record body"));
        }

        let mut kv_buf = vec![0u8; key_len + value_len];
        if !kv_buf.is_empty() {
            let n = io.read_at(&mut kv_buf, (offset + header_len as i64) as u64)?;
            if n < kv_buf.len() {
                return Err(EngineError::corrupt_header("truncated record body"));
            }
        }

        let value = kv_buf.split_off(key_len);
        let record = Record {
            key: kv_buf,
            value,
            kind: header.kind,
        };

        let actual = record_crc(&record, &header_buf[4..header_len]);
        if actual != header.crc {
            return Err(EngineError::ChecksumMismatch {
                expected: header.crc,
                actual,
            });
        }

        Ok(Some((record, total)))
    }

    /// Appends a hint record: `key` mapped to the varint-encoded `loc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails.
    pub fn write_hint_record(&mut self, key: &[u8], loc: &RecordLocation) -> EngineResult<()> {
        let record = Record::normal(key.to_vec(), encode_location(loc));
        let (encoded, _) = encode_record(&record);
        self.append(&encoded)
    }

    /// Flushes this segment to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend sync fails.
    pub fn sync(&self) -> EngineResult<()> {
        self.io.write().sync()?;
        Ok(())
    }

    /// Truncates this segment to `new_len` bytes and rewinds the write
    /// cursor. Recovery uses this to drop a corrupt tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend truncate fails.
    pub fn truncate(&mut self, new_len: i64) -> EngineResult<()> {
        self.io.write().truncate(new_len as u64)?;
        self.write_off = new_len;
        Ok(())
    }

    /// Flushes and closes this segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend close fails.
    pub fn close(&self) -> EngineResult<()> {
        self.io.write().close()?;
        Ok(())
    }
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("file_id", &self.file_id)
            .field("write_off", &self.write_off)
            .finish_non_exhaustive()
    }
}
