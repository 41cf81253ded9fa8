//! Offline compaction.
//!
//! Merge reclaims the space held by superseded and deleted records. It
//! runs concurrently with foreground writes: the engine seals its active
//! segment up front, and every segment below the new active id becomes a
//! merge candidate. Live records are rewritten through a second engine
//! instance rooted at a sibling directory (`<dir>mergedb`), a hint file
//! maps each live key to its post-merge location, and a completion marker
//! records the oldest segment id that did not participate.
//!
//! Nothing in the main directory changes during the merge itself. The next
//! open *adopts* a finished merge: pre-merge segments are deleted, the
//! merge outputs move into the main directory, and recovery replays the
//! hint file instead of re-scanning the merged data. A sibling left behind
//! by a failed merge has no completion marker and is simply removed.

use crate::dir;
use crate::engine::{Engine, EngineInner};
use crate::error::{EngineError, EngineResult};
use crate::record::{
    decode_location, encode_key_with_seq, split_key_seq, Record, RecordKind, RecordLocation,
    NON_TRANSACTION_SEQ,
};
use crate::segment::{data_file_path, SegmentFile, MERGE_MARKER_NAME};
use barrelkv_storage::BackendKind;
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

/// Key stored in the merge completion marker record.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Runs a merge on `engine`. See the module docs for the algorithm.
pub(super) fn run(engine: &Engine) -> EngineResult<()> {
    // Seal the active segment and snapshot the candidates under the write
    // lock; the rewrite below runs without it.
    let (candidates, non_merged_id) = {
        let mut inner = engine.inner.write();
        if inner.active.is_none() {
            return Ok(());
        }
        if engine.is_merging.swap(true, Ordering::SeqCst) {
            return Err(EngineError::MergeInProgress);
        }

        match seal_for_merge(engine, &mut inner) {
            Ok(prepared) => prepared,
            Err(err) => {
                engine.is_merging.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }
    };

    info!(
        candidates = candidates.len(),
        non_merged_id, "starting merge"
    );
    let result = rewrite_into_sibling(engine, &candidates, non_merged_id);
    engine.is_merging.store(false, Ordering::SeqCst);

    match &result {
        Ok(()) => info!(non_merged_id, "merge finished"),
        Err(err) => warn!(%err, "merge failed; sibling directory is removed on next open"),
    }
    result
}

/// Seals the active segment, opens its successor, and returns the sealed
/// candidates in ascending id order plus the first non-merged id.
fn seal_for_merge(
    engine: &Engine,
    inner: &mut EngineInner,
) -> EngineResult<(Vec<Arc<SegmentFile>>, u32)> {
    let old = inner
        .active
        .take()
        .ok_or_else(|| EngineError::internal("active segment missing"))?;
    old.sync()?;

    let old_id = old.file_id();
    let non_merged_id = old_id + 1;
    inner.sealed.insert(old_id, Arc::new(old));
    inner.active = Some(engine.open_segment(non_merged_id)?);

    let mut candidates: Vec<Arc<SegmentFile>> = inner.sealed.values().cloned().collect();
    candidates.sort_by_key(|segment| segment.file_id());

    Ok((candidates, non_merged_id))
}

/// Rewrites live records into the sibling directory and writes the hint
/// file and completion marker.
fn rewrite_into_sibling(
    engine: &Engine,
    candidates: &[Arc<SegmentFile>],
    non_merged_id: u32,
) -> EngineResult<()> {
    let merge_path = dir::merge_dir_path(&engine.options.dir_path);

    // A leftover sibling belongs to an older (finished or failed) merge.
    if merge_path.exists() {
        fs::remove_dir_all(&merge_path)?;
    }
    fs::create_dir_all(&merge_path)?;

    let mut merge_options = engine.options.clone();
    merge_options.dir_path = merge_path.clone();
    merge_options.sync_write = false;
    let merge_engine = Engine::open(merge_options)?;

    let mut hint_file = SegmentFile::open_hint(
        &merge_path,
        engine.options.data_file_size,
        BackendKind::Standard,
    )?;

    for segment in candidates {
        let mut offset: i64 = 0;
        loop {
            let (record, size) = match segment.read_record(offset) {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                // A corrupt tail was already excluded from the index by
                // recovery; stop this segment like the open scan does.
                Err(err) if super::is_scan_stop(&err) => break,
                Err(err) => return Err(err),
            };

            let Some((real_key, _seq)) = split_key_seq(&record.key) else {
                break;
            };

            // A record is live iff the index still points exactly at it.
            let current = RecordLocation {
                file_id: segment.file_id(),
                offset,
            };
            if engine.index.get(real_key) == Some(current) {
                let rewritten = Record {
                    key: encode_key_with_seq(real_key, NON_TRANSACTION_SEQ),
                    value: record.value,
                    kind: record.kind,
                };
                let new_loc = {
                    let mut merge_inner = merge_engine.inner.write();
                    merge_engine.append_record(&mut merge_inner, &rewritten)?
                };
                hint_file.write_hint_record(real_key, &new_loc)?;
            }

            offset += size;
        }
    }

    merge_engine.sync()?;
    hint_file.sync()?;
    hint_file.close()?;

    write_completion_marker(&merge_path, engine.options.data_file_size, non_merged_id)?;

    merge_engine.close()?;
    Ok(())
}

/// Writes the `mergeFina` record holding the ASCII decimal non-merged id.
fn write_completion_marker(
    merge_path: &Path,
    data_file_size: u64,
    non_merged_id: u32,
) -> EngineResult<()> {
    let mut marker =
        SegmentFile::open_merge_marker(merge_path, data_file_size, BackendKind::Standard)?;

    let record = Record {
        key: MERGE_FINISHED_KEY.to_vec(),
        value: non_merged_id.to_string().into_bytes(),
        kind: RecordKind::Finished,
    };
    let (encoded, _) = crate::record::encode_record(&record);
    marker.append(&encoded)?;
    marker.sync()?;
    marker.close()
}

/// Adopts a finished merge before the directory scan: deletes the
/// pre-merge segments, moves the merge outputs into the main directory,
/// and removes the sibling. A sibling without a completion marker is
/// removed without adoption.
pub(super) fn adopt_finished_merge(options: &crate::config::Options) -> EngineResult<()> {
    let merge_path = dir::merge_dir_path(&options.dir_path);
    if !merge_path.exists() {
        return Ok(());
    }

    let result = (|| {
        if !merge_path.join(MERGE_MARKER_NAME).exists() {
            info!(path = %merge_path.display(), "discarding unfinished merge");
            return Ok(());
        }

        let non_merged_id = read_non_merged_id(&merge_path, options.data_file_size)?;
        info!(non_merged_id, "adopting finished merge");

        for file_id in 0..non_merged_id {
            let path = data_file_path(&options.dir_path, file_id);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        for entry in fs::read_dir(&merge_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if dir::is_engine_file(name) {
                let dest = options.dir_path.join(name);
                if dest.exists() {
                    fs::remove_file(&dest)?;
                }
                fs::rename(entry.path(), dest)?;
            }
        }

        dir::sync_dir(&options.dir_path)
    })();

    // The sibling is spent either way.
    let _ = fs::remove_dir_all(&merge_path);
    result
}

/// Reads the non-merged id from the completion marker in the main
/// directory, if one was adopted there.
pub(super) fn read_adopted_non_merged_id(
    dir_path: &Path,
    data_file_size: u64,
) -> EngineResult<Option<u32>> {
    if !dir_path.join(MERGE_MARKER_NAME).exists() {
        return Ok(None);
    }
    read_non_merged_id(dir_path, data_file_size).map(Some)
}

/// Reads and parses the completion marker record in `dir_path`.
fn read_non_merged_id(dir_path: &Path, data_file_size: u64) -> EngineResult<u32> {
    let marker = SegmentFile::open_merge_marker(dir_path, data_file_size, BackendKind::Standard)?;
    let (record, _) = marker
        .read_record(0)?
        .ok_or_else(|| EngineError::corrupt_header("merge marker is empty"))?;
    marker.close()?;

    std::str::from_utf8(&record.value)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .ok_or_else(|| EngineError::corrupt_header("merge marker value is not a file id"))
}

/// Replays the hint file (if present) into the index: each record's key is
/// a real key and its value decodes to that key's post-merge location.
pub(super) fn load_index_from_hint_file(engine: &Engine) -> EngineResult<()> {
    let hint_path = engine.options.dir_path.join(crate::segment::HINT_FILE_NAME);
    if !hint_path.exists() {
        return Ok(());
    }

    let hint_file = SegmentFile::open_hint(
        &engine.options.dir_path,
        engine.options.data_file_size,
        BackendKind::Standard,
    )?;

    let mut offset: i64 = 0;
    let mut replayed = 0usize;
    while let Some((record, size)) = hint_file.read_record(offset)? {
        let loc = decode_location(&record.value)?;
        engine.index.put(record.key, loc);
        offset += size;
        replayed += 1;
    }
    hint_file.close()?;

    info!(keys = replayed, "replayed hint file");
    Ok(())
}
