//! Engine directory management.
//!
//! An engine directory holds:
//!
//! ```text
//! <dir_path>/
//! ├─ LOCK             # advisory lock for single-engine access
//! ├─ 000000000.data   # segment files, 9-digit zero-padded ids
//! ├─ 000000001.data
//! ├─ hintIndex        # optional: compaction index
//! └─ mergeFina        # optional: compaction completion marker
//! ```
//!
//! The LOCK file ensures only one engine instance can own the directory at
//! a time; it is held for the engine's lifetime.

use crate::error::{EngineError, EngineResult};
use crate::segment::DATA_FILE_SUFFIX;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Exclusive ownership of an engine directory.
///
/// Dropping the lock releases it.
#[derive(Debug)]
pub(crate) struct DirLock {
    _lock_file: File,
}

impl DirLock {
    /// Acquires the advisory lock in `path`.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryLocked` if another engine holds the lock, or an
    /// I/O error if the lock file cannot be opened.
    pub(crate) fn acquire(path: &Path) -> EngineResult<Self> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(EngineError::DirectoryLocked);
        }

        Ok(Self {
            _lock_file: lock_file,
        })
    }
}

/// Returns whether `name` is a file the engine owns and merge adoption may
/// move between directories.
pub(crate) fn is_engine_file(name: &str) -> bool {
    name.ends_with(DATA_FILE_SUFFIX)
        || name == crate::segment::HINT_FILE_NAME
        || name == crate::segment::MERGE_MARKER_NAME
}

/// Lists the segment file ids in `dir`, sorted ascending.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or a `.data` file has
/// a name that does not parse as a numeric id.
pub(crate) fn list_segment_ids(dir: &Path) -> EngineResult<Vec<u32>> {
    let mut ids = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) else {
            continue;
        };

        let id = stem.parse::<u32>().map_err(|_| {
            EngineError::internal(format!("invalid segment file name: {name}"))
        })?;
        ids.push(id);
    }

    ids.sort_unstable();
    Ok(ids)
}

/// Returns the sibling directory a merge writes into.
pub(crate) fn merge_dir_path(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push("mergedb");

    match dir.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Fsyncs a directory so entry creations, renames, and deletions are
/// durable.
#[cfg(unix)]
pub(crate) fn sync_dir(path: &Path) -> EngineResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_path: &Path) -> EngineResult<()> {
    // NTFS journaling covers metadata durability; directory handles cannot
    // be fsynced on Windows.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_prevents_second_acquire() {
        let dir = tempdir().unwrap();

        let _held = DirLock::acquire(dir.path()).unwrap();
        let second = DirLock::acquire(dir.path());
        assert!(matches!(second, Err(EngineError::DirectoryLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();

        {
            let _held = DirLock::acquire(dir.path()).unwrap();
        }
        let _reacquired = DirLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn list_segment_ids_sorted() {
        let dir = tempdir().unwrap();
        for name in ["000000002.data", "000000000.data", "000000001.data"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::write(dir.path().join("hintIndex"), b"").unwrap();
        std::fs::write(dir.path().join("LOCK"), b"").unwrap();

        let ids = list_segment_ids(dir.path()).unwrap();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn list_rejects_unparsable_segment_name() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("garbage.data"), b"").unwrap();

        assert!(list_segment_ids(dir.path()).is_err());
    }

    #[test]
    fn merge_dir_is_a_sibling() {
        let path = Path::new("/var/lib/barrel/db");
        assert_eq!(merge_dir_path(path), Path::new("/var/lib/barrel/dbmergedb"));
    }

    #[test]
    fn engine_file_names() {
        assert!(is_engine_file("000000004.data"));
        assert!(is_engine_file("hintIndex"));
        assert!(is_engine_file("mergeFina"));
        assert!(!is_engine_file("LOCK"));
        assert!(!is_engine_file("stray.txt"));
    }
}
