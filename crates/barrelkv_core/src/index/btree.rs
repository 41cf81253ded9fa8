//! B-tree index implementation.

use crate::index::{IndexIterator, Indexer};
use crate::record::RecordLocation;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An ordered index backed by [`BTreeMap`].
///
/// `BTreeMap` keeps keys in lexicographic byte order, which is exactly the
/// iteration order the engine exposes. A single readers-writer lock
/// protects the map; lookups and snapshot construction take the read
/// lock, mutations the write lock.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    map: RwLock<BTreeMap<Vec<u8>, RecordLocation>>,
}

impl BTreeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, loc: RecordLocation) -> bool {
        self.map.write().insert(key, loc);
        true
    }

    fn get(&self, key: &[u8]) -> Option<RecordLocation> {
        self.map.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.map.write().remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn iter(&self, reverse: bool) -> IndexIterator {
        let map = self.map.read();
        let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
        if reverse {
            entries.reverse();
        }
        IndexIterator::new(entries, reverse)
    }
}
