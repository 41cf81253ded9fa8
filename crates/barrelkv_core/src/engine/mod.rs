//! The storage engine.
//!
//! The engine ties the pieces together: appends go to the single *active*
//! segment (rotating when it fills), the index maps every live key to the
//! location of its newest record, and reads resolve locations back through
//! the segment registry.
//!
//! ## Write Path
//!
//! 1. Tag the key with its sequence prefix and encode the record.
//! 2. Under the write lock: rotate the active segment if the append would
//!    exceed `data_file_size`, then append (optionally fsync).
//! 3. Point the index at the new location.
//!
//! ## Read Path
//!
//! 1. Look the key up in the index.
//! 2. Under the read lock: resolve the segment by file id, read the record
//!    at the stored offset, verify its CRC.
//! 3. A tombstone at the located offset reports the key as missing.
//!
//! ## Recovery
//!
//! On open, finished merge output is adopted first, then all `.data` files
//! are opened (largest id becomes the active segment), the hint file is
//! replayed if present, and the remaining segments are scanned in id order
//! to rebuild the index. A corrupt or truncated record stops its segment's
//! scan; the active segment is truncated to the last good offset so the
//! next append lands where the index expects it.

mod iterator;
mod merge;

pub use iterator::EngineIterator;

use crate::config::{IteratorOptions, Options};
use crate::dir::{self, DirLock};
use crate::error::{EngineError, EngineResult};
use crate::index::{BTreeIndex, Indexer};
use crate::record::{
    encode_key_with_seq, encode_record, split_key_seq, Record, RecordLocation,
    NON_TRANSACTION_SEQ,
};
use crate::segment::SegmentFile;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Segment registry: the appendable active segment plus the sealed,
/// read-only rest.
struct EngineInner {
    active: Option<SegmentFile>,
    sealed: HashMap<u32, Arc<SegmentFile>>,
}

/// A BarrelKV storage engine rooted at one directory.
///
/// All operations are safe to call from multiple threads. Writes serialize
/// on the engine's write lock; reads share its read lock. The index holds
/// an independent lock so iteration never contends with the write path.
pub struct Engine {
    options: Options,
    inner: RwLock<EngineInner>,
    index: Box<dyn Indexer>,
    is_merging: AtomicBool,
    /// Segment ids found on disk at open time, ascending.
    file_ids: Vec<u32>,
    _dir_lock: DirLock,
}

impl Engine {
    /// Opens an engine on an existing directory, rebuilding the index from
    /// the segment files (via the hint file where one exists).
    ///
    /// # Errors
    ///
    /// - `InvalidOptions` for an empty `dir_path` or zero `data_file_size`.
    /// - `DirectoryMissing` if the directory does not exist.
    /// - `DirectoryLocked` if another engine owns the directory.
    /// - Corruption and I/O errors from the recovery scan.
    pub fn open(options: Options) -> EngineResult<Self> {
        check_options(&options)?;

        let dir_path = options.dir_path.clone();
        if !dir_path.is_dir() {
            return Err(EngineError::DirectoryMissing { path: dir_path });
        }
        let dir_lock = DirLock::acquire(&dir_path)?;

        info!(path = %dir_path.display(), "opening engine");

        merge::adopt_finished_merge(&options)?;

        let file_ids = dir::list_segment_ids(&dir_path)?;
        let mut sealed = HashMap::new();
        let mut active = None;
        for (i, &file_id) in file_ids.iter().enumerate() {
            let segment =
                SegmentFile::open(&dir_path, file_id, options.data_file_size, options.backend)?;
            if i == file_ids.len() - 1 {
                active = Some(segment);
            } else {
                sealed.insert(file_id, Arc::new(segment));
            }
        }

        let engine = Self {
            options,
            inner: RwLock::new(EngineInner { active, sealed }),
            index: Box::new(BTreeIndex::new()),
            is_merging: AtomicBool::new(false),
            file_ids,
            _dir_lock: dir_lock,
        };

        merge::load_index_from_hint_file(&engine)?;
        engine.load_index_from_segments()?;

        info!(
            segments = engine.file_ids.len(),
            keys = engine.index.len(),
            "engine recovered"
        );
        Ok(engine)
    }

    /// Stores `value` under `key`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Returns `EmptyKey` for an empty key, or the append/sync failure.
    pub fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        debug!(key = ?String::from_utf8_lossy(key), "put");
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }

        let record = Record::normal(
            encode_key_with_seq(key, NON_TRANSACTION_SEQ),
            value.to_vec(),
        );
        let loc = self.append_record_with_lock(&record)?;

        if !self.index.put(key.to_vec(), loc) {
            return Err(EngineError::internal("index put failed"));
        }
        Ok(())
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `EmptyKey` for an empty key, `KeyNotFound` when the key has
    /// no live value, and corruption errors when the located record fails
    /// its CRC check.
    pub fn get(&self, key: &[u8]) -> EngineResult<Vec<u8>> {
        debug!(key = ?String::from_utf8_lossy(key), "get");
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }

        let loc = self.index.get(key).ok_or(EngineError::KeyNotFound)?;

        let inner = self.inner.read();
        self.read_value_at(&inner, loc)
    }

    /// Removes `key`. Deleting a key that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `EmptyKey` for an empty key, or the tombstone append
    /// failure.
    pub fn delete(&self, key: &[u8]) -> EngineResult<()> {
        debug!(key = ?String::from_utf8_lossy(key), "delete");
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }

        let record = Record::tombstone(encode_key_with_seq(key, NON_TRANSACTION_SEQ));
        self.append_record_with_lock(&record)?;

        if !self.index.delete(key) {
            return Err(EngineError::internal("index delete failed"));
        }
        Ok(())
    }

    /// Returns every live key in ascending order.
    #[must_use]
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.index.iter(false);
        let mut keys = Vec::with_capacity(self.index.len());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    /// Calls `f` with every live key-value pair in ascending key order,
    /// stopping early when `f` returns `false`.
    ///
    /// # Errors
    ///
    /// Returns the first value-resolution failure.
    pub fn fold<F>(&self, mut f: F) -> EngineResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let inner = self.inner.read();

        let mut iter = self.index.iter(false);
        while iter.valid() {
            let value = self.read_value_at(&inner, iter.value())?;
            if !f(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Creates an iterator over live keys per `options` (prefix filter,
    /// direction). The iterator sees a snapshot of the keyspace.
    #[must_use]
    pub fn iter(&self, options: IteratorOptions) -> EngineIterator<'_> {
        EngineIterator::new(self, options)
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn size(&self) -> usize {
        self.index.len()
    }

    /// Flushes the active segment to stable storage.
    ///
    /// # Errors
    ///
    /// Returns the sync failure.
    pub fn sync(&self) -> EngineResult<()> {
        let inner = self.inner.read();
        if let Some(active) = &inner.active {
            active.sync()?;
        }
        Ok(())
    }

    /// Triggers an offline merge: live records from sealed segments are
    /// rewritten into fresh segments in a sibling directory, together with
    /// a hint file, and the output is adopted on the next open.
    ///
    /// # Errors
    ///
    /// Returns `MergeInProgress` when a merge is already running, or the
    /// first failure of the rewrite.
    pub fn merge(&self) -> EngineResult<()> {
        merge::run(self)
    }

    /// Syncs and closes the active segment and every sealed segment.
    ///
    /// # Errors
    ///
    /// Returns the first close failure.
    pub fn close(&self) -> EngineResult<()> {
        info!(path = %self.options.dir_path.display(), "closing engine");
        let inner = self.inner.write();

        if let Some(active) = &inner.active {
            active.sync()?;
            active.close()?;
        }
        for segment in inner.sealed.values() {
            segment.close()?;
        }
        Ok(())
    }

    /// Appends a record under the engine write lock and returns where it
    /// landed.
    fn append_record_with_lock(&self, record: &Record) -> EngineResult<RecordLocation> {
        let mut inner = self.inner.write();
        self.append_record(&mut inner, record)
    }

    /// Appends a record to the active segment, rotating first when the
    /// append would push the segment past `data_file_size`. The caller
    /// holds the write lock.
    fn append_record(
        &self,
        inner: &mut EngineInner,
        record: &Record,
    ) -> EngineResult<RecordLocation> {
        if inner.active.is_none() {
            inner.active = Some(self.open_segment(0)?);
        }

        let (encoded, size) = encode_record(record);

        let over_limit = {
            let active = active_ref(inner)?;
            active.write_off() + size > self.options.data_file_size as i64
        };
        if over_limit {
            self.rotate_active(inner)?;
        }

        let active = active_mut(inner)?;
        let offset = active.write_off();
        active.append(&encoded)?;

        if self.options.sync_write {
            active.sync()?;
        }

        Ok(RecordLocation {
            file_id: active.file_id(),
            offset,
        })
    }

    /// Seals the active segment and opens a fresh one with the next id.
    /// The caller holds the write lock.
    fn rotate_active(&self, inner: &mut EngineInner) -> EngineResult<u32> {
        let old = inner
            .active
            .take()
            .ok_or_else(|| EngineError::internal("rotation without an active segment"))?;

        // Existing data must be durable before the segment is retired.
        old.sync()?;

        let old_id = old.file_id();
        let new_id = old_id + 1;
        inner.sealed.insert(old_id, Arc::new(old));
        inner.active = Some(self.open_segment(new_id)?);

        debug!(sealed = old_id, active = new_id, "rotated segment");
        Ok(new_id)
    }

    fn open_segment(&self, file_id: u32) -> EngineResult<SegmentFile> {
        SegmentFile::open(
            &self.options.dir_path,
            file_id,
            self.options.data_file_size,
            self.options.backend,
        )
    }

    /// Resolves a location to its record's value bytes. The caller holds
    /// at least the read lock.
    fn read_value_at(&self, inner: &EngineInner, loc: RecordLocation) -> EngineResult<Vec<u8>> {
        let segment: &SegmentFile = match &inner.active {
            Some(active) if active.file_id() == loc.file_id => active,
            _ => inner
                .sealed
                .get(&loc.file_id)
                .map(Arc::as_ref)
                .ok_or_else(|| {
                    EngineError::internal(format!("no segment for file id {}", loc.file_id))
                })?,
        };

        let (record, _) = segment.read_record(loc.offset)?.ok_or_else(|| {
            EngineError::internal(format!(
                "no record at indexed location {}:{}",
                loc.file_id, loc.offset
            ))
        })?;

        if record.is_tombstone() {
            // The index never points at tombstones; a stale location is
            // treated as missing rather than surfacing deleted data.
            return Err(EngineError::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Scans segment files in id order and rebuilds the index. Segments
    /// below the merge marker's non-merged id are covered by the hint file
    /// and skipped.
    fn load_index_from_segments(&self) -> EngineResult<()> {
        if self.file_ids.is_empty() {
            return Ok(());
        }

        let non_merged_id =
            merge::read_adopted_non_merged_id(&self.options.dir_path, self.options.data_file_size)?;
        let last_id = self.file_ids.last().copied();

        let mut inner = self.inner.write();
        for &file_id in &self.file_ids {
            if let Some(non_merged) = non_merged_id {
                if file_id < non_merged {
                    continue;
                }
            }

            let (end_offset, stopped) = {
                let segment: &SegmentFile = match &inner.active {
                    Some(active) if active.file_id() == file_id => active,
                    _ => inner
                        .sealed
                        .get(&file_id)
                        .map(Arc::as_ref)
                        .ok_or_else(|| {
                            EngineError::internal(format!("no segment for file id {file_id}"))
                        })?,
                };
                self.scan_segment(segment, file_id)?
            };

            if Some(file_id) == last_id {
                let active = active_mut(&mut inner)?;
                active.set_write_off(end_offset);
                if stopped {
                    // Drop the corrupt tail so the next append lands at
                    // the offset the index will record for it.
                    active.truncate(end_offset)?;
                }
            }
        }
        Ok(())
    }

    /// Replays one segment into the index. Returns the offset after the
    /// last good record and whether the scan stopped early on corruption.
    fn scan_segment(&self, segment: &SegmentFile, file_id: u32) -> EngineResult<(i64, bool)> {
        let mut offset: i64 = 0;
        loop {
            match segment.read_record(offset) {
                Ok(Some((record, size))) => {
                    let Some((real_key, _seq)) = split_key_seq(&record.key) else {
                        warn!(file_id, offset, "unparsable key prefix, truncating scan");
                        return Ok((offset, true));
                    };

                    if record.is_tombstone() {
                        self.index.delete(real_key);
                    } else if !self.index.put(
                        real_key.to_vec(),
                        RecordLocation { file_id, offset },
                    ) {
                        return Err(EngineError::internal("index update failed during recovery"));
                    }
                    offset += size;
                }
                Ok(None) => return Ok((offset, false)),
                Err(err) if is_scan_stop(&err) => {
                    warn!(file_id, offset, %err, "corrupt record, truncating scan");
                    return Ok((offset, true));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir_path", &self.options.dir_path)
            .field("data_file_size", &self.options.data_file_size)
            .field("sync_write", &self.options.sync_write)
            .field("backend", &self.options.backend)
            .field("keys", &self.index.len())
            .finish_non_exhaustive()
    }
}

fn check_options(options: &Options) -> EngineResult<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(EngineError::invalid_options("dir_path is empty"));
    }
    if options.data_file_size == 0 {
        return Err(EngineError::invalid_options(
            "data_file_size must be greater than zero",
        ));
    }
    Ok(())
}

fn active_ref(inner: &EngineInner) -> EngineResult<&SegmentFile> {
    inner
        .active
        .as_ref()
        .ok_or_else(|| EngineError::internal("active segment missing"))
}

fn active_mut(inner: &mut EngineInner) -> EngineResult<&mut SegmentFile> {
    inner
        .active
        .as_mut()
        .ok_or_else(|| EngineError::internal("active segment missing"))
}

/// Whether a decode failure ends a recovery scan (corrupt or truncated
/// data) rather than aborting the open (I/O failure).
fn is_scan_stop(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::CorruptHeader { .. } | EngineError::ChecksumMismatch { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_engine(dir: &std::path::Path) -> Engine {
        Engine::open(Options::new(dir)).unwrap()
    }

    #[test]
    fn open_rejects_bad_options() {
        let err = Engine::open(Options::new("")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOptions { .. }));

        let err = Engine::open(Options::new("/tmp/x").data_file_size(0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOptions { .. }));
    }

    #[test]
    fn open_rejects_missing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        let err = Engine::open(Options::new(&missing)).unwrap_err();
        assert!(matches!(err, EngineError::DirectoryMissing { .. }));
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let _engine = open_engine(dir.path());

        let err = Engine::open(Options::new(dir.path())).unwrap_err();
        assert!(matches!(err, EngineError::DirectoryLocked));
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.put(b"name", b"barrelkv").unwrap();
        assert_eq!(engine.get(b"name").unwrap(), b"barrelkv");
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        assert!(matches!(engine.put(b"", b"v"), Err(EngineError::EmptyKey)));
        assert!(matches!(engine.get(b""), Err(EngineError::EmptyKey)));
        assert!(matches!(engine.delete(b""), Err(EngineError::EmptyKey)));
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        assert!(matches!(
            engine.get(b"missing"),
            Err(EngineError::KeyNotFound)
        ));
    }

    #[test]
    fn overwrite_returns_newest() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.put(b"k", b"v1").unwrap();
        engine.put(b"k", b"v2").unwrap();

        assert_eq!(engine.get(b"k").unwrap(), b"v2");
        assert_eq!(engine.list_keys(), vec![b"k".to_vec()]);
    }

    #[test]
    fn delete_then_reput() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.put(b"k", b"v1").unwrap();
        engine.delete(b"k").unwrap();
        assert!(matches!(engine.get(b"k"), Err(EngineError::KeyNotFound)));
        assert_eq!(engine.size(), 0);

        engine.put(b"k", b"v2").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), b"v2");
    }

    #[test]
    fn delete_of_absent_key_is_noop() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        engine.delete(b"never-existed").unwrap();
    }

    #[test]
    fn rotation_keeps_everything_readable() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(Options::new(dir.path()).data_file_size(64)).unwrap();

        for i in 0..20u32 {
            let key = format!("key-{i:03}");
            let value = format!("val-{i:03}");
            engine.put(key.as_bytes(), value.as_bytes()).unwrap();
        }

        let data_files = dir::list_segment_ids(dir.path()).unwrap();
        assert!(data_files.len() >= 2, "expected rotation to have happened");

        for i in 0..20u32 {
            let key = format!("key-{i:03}");
            let expected = format!("val-{i:03}");
            assert_eq!(engine.get(key.as_bytes()).unwrap(), expected.as_bytes());
        }
    }

    #[test]
    fn fold_visits_in_order_and_stops_early() {
        let dir = tempdir().unwrap();
        let engine = open_engine(dir.path());

        for key in [&b"a"[..], b"b", b"c"] {
            engine.put(key, b"v").unwrap();
        }

        let mut seen = Vec::new();
        engine
            .fold(|key, _value| {
                seen.push(key.to_vec());
                seen.len() < 2
            })
            .unwrap();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn reopen_recovers_state() {
        let dir = tempdir().unwrap();

        {
            let engine = open_engine(dir.path());
            engine.put(b"persist", b"me").unwrap();
            engine.put(b"gone", b"soon").unwrap();
            engine.delete(b"gone").unwrap();
            engine.close().unwrap();
        }

        let engine = open_engine(dir.path());
        assert_eq!(engine.get(b"persist").unwrap(), b"me");
        assert!(matches!(engine.get(b"gone"), Err(EngineError::KeyNotFound)));
        assert_eq!(engine.size(), 1);
    }

    #[test]
    fn sync_write_mode_roundtrips() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(Options::new(dir.path()).sync_write(true)).unwrap();

        engine.put(b"k", b"v").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), b"v");
    }
}
