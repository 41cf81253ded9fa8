//! Engine iteration.
//!
//! [`EngineIterator`] walks a snapshot of the keyspace in key order,
//! optionally filtered to a key prefix and optionally reversed. Keys come
//! straight from the index snapshot; values are resolved lazily from the
//! segment files on demand.

use crate::config::IteratorOptions;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::index::IndexIterator;

/// A snapshot iterator over an engine's live keys.
///
/// Concurrent puts and deletes do not affect an iterator that is already
/// constructed. Because values are resolved lazily, [`value`](Self::value)
/// can report a key as missing if it was deleted after the snapshot was
/// taken.
pub struct EngineIterator<'a> {
    engine: &'a Engine,
    index_iter: IndexIterator,
    options: IteratorOptions,
}

impl<'a> EngineIterator<'a> {
    pub(super) fn new(engine: &'a Engine, options: IteratorOptions) -> Self {
        let mut iter = Self {
            index_iter: engine.index.iter(options.reverse),
            engine,
            options,
        };
        iter.skip_to_prefixed();
        iter
    }

    /// Returns the cursor to the first matching entry.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_prefixed();
    }

    /// Positions the cursor at the first matching entry `>= key`
    /// (forward) or `<= key` (reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_prefixed();
    }

    /// Advances to the next matching entry.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_prefixed();
    }

    /// Returns whether the cursor points at an entry.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Returns the key at the cursor.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not [`valid`](Self::valid).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Reads the value at the cursor from its segment.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key was deleted after the snapshot was
    /// taken, or a corruption error from the record read.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not [`valid`](Self::valid).
    pub fn value(&self) -> EngineResult<Vec<u8>> {
        let loc = self.index_iter.value();
        let inner = self.engine.inner.read();
        self.engine.read_value_at(&inner, loc)
    }

    /// Releases the snapshot.
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    /// Skips entries whose key does not carry the configured prefix.
    fn skip_to_prefixed(&mut self) {
        let prefix = &self.options.prefix;
        if prefix.is_empty() {
            return;
        }

        while self.index_iter.valid() {
            let key = self.index_iter.key();
            if key.len() >= prefix.len() && &key[..prefix.len()] == prefix.as_slice() {
                break;
            }
            self.index_iter.next();
        }
    }
}
